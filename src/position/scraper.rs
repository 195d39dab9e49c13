//! 席位持仓スクレイパー
//!
//! 認証済みクッキーを復元したブラウザで各ターゲットページを巡回し、
//! ネットワーク応答を傍受して行を集める。JSON から1行も取れなかった
//! 席位ページは描画済みテーブルから抽出する。ログイン操作は行わない。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::capture::{save_artifact, CaptureBatch, CaptureEvent};
use super::classifier::{NetworkExchange, ResponseClassifier};
use super::cleaning::CleaningPipeline;
use super::normalizer::RecordNormalizer;
use super::table::{extract_table_rows, TableSnapshot, TABLE_SNAPSHOT_SCRIPT};
use super::types::{CrawlTarget, Diagnostic, PositionRecord, RawRow, SiteMetadata};
use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::Scraper;

/// 応答本文の取得リトライ（本文の受信完了前に要求すると失敗するため）
const BODY_FETCH_RETRIES: u32 = 5;
const BODY_FETCH_INTERVAL_MS: u64 = 300;

const POLL_INTERVAL_MS: u64 = 500;
/// ページ安定待機のタイムアウト（ミリ秒）
const PAGE_STABLE_TIMEOUT_MS: u64 = 10000;
/// ログイン状態の表示待ち
const SESSION_MARKER_TIMEOUT: Duration = Duration::from_secs(15);

/// ログイン済みの画面にだけ現れる要素
const SESSION_MARKER_SCRIPT: &str = r#"
    (() => {
        const text = document.body ? document.body.innerText : '';
        return text.includes('退出')
            || text.includes('个人中心')
            || document.querySelector('.user-info') !== null;
    })()
"#;

/// 1回の実行結果
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    pub records: Vec<PositionRecord>,
    /// 回復した失敗（応答解析・復号・ターゲット単位）
    pub diagnostics: Vec<Diagnostic>,
    pub metadata: SiteMetadata,
    /// `api_raw_<ts>.json`
    pub raw_capture_path: Option<PathBuf>,
    /// `positions_<ts>.json`
    pub positions_path: Option<PathBuf>,
}

/// 席位持仓スクレイパー
pub struct BrokerPositionScraper {
    config: ScraperConfig,
    classifier: Arc<ResponseClassifier>,
    browser: Option<Browser>,
    page: Option<Page>,
}

impl BrokerPositionScraper {
    pub fn new(config: ScraperConfig) -> Self {
        let normalizer =
            RecordNormalizer::new(config.target_seats.clone(), config.varieties.clone());
        let classifier = ResponseClassifier::new(config.classifier.clone(), normalizer);

        Self {
            config,
            classifier: Arc::new(classifier),
            browser: None,
            page: None,
        }
    }

    fn page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::BrowserInit("Browser not initialized".to_string()))
    }

    /// セッションクッキーを復元
    async fn restore_cookies(&self, page: &Page) {
        for cookie in &self.config.session_cookies {
            let param = CookieParam::builder()
                .name(cookie.name.as_str())
                .value(cookie.value.as_str())
                .domain(cookie.domain.as_str())
                .path(cookie.path.as_str())
                .build();

            match param {
                Ok(param) => {
                    if let Err(e) = page.set_cookie(param).await {
                        debug!("Failed to set cookie {}: {}", cookie.name, e);
                    }
                }
                Err(e) => debug!("Invalid cookie {}: {}", cookie.name, e),
            }
        }
        info!("Restored {} session cookies", self.config.session_cookies.len());
    }

    /// ターゲット1件分の応答リスナーを起動
    ///
    /// 停止シグナル受信後は受信済みの応答だけを処理し、処理中のタスクを待ってから終了する。
    async fn spawn_listener(
        &self,
        page: &Page,
        events: UnboundedSender<CaptureEvent>,
    ) -> Result<(oneshot::Sender<()>, JoinHandle<()>), ScraperError> {
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let page = page.clone();
        let classifier = Arc::clone(&self.classifier);

        let handle = tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = responses.next() => {
                        let Some(event) = event else { break };
                        spawn_exchange(&mut tasks, &event, &page, &classifier, &events);
                    }
                }
            }

            // 停止と同時に届いていた応答も取りこぼさない
            for event in take_ready(&mut responses) {
                spawn_exchange(&mut tasks, &event, &page, &classifier, &events);
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Response handler task failed: {}", e);
                }
            }
        });

        Ok((stop_tx, handle))
    }

    /// ターゲットページを開いて描画が落ち着くまで待つ
    async fn visit(&self, page: &Page, target: &CrawlTarget) -> Result<(), ScraperError> {
        let url = target.page_url(&self.config.base_url);
        info!("Visiting {} ({})", target, url);

        timeout(self.config.timeout, page.goto(url.as_str()))
            .await
            .map_err(|_| ScraperError::Timeout(format!("{} ({:?})", url, self.config.timeout)))?
            .map_err(|e| ScraperError::Navigation(e.to_string()))?;

        if !poll_condition(page, "document.querySelector('table') !== null", self.config.table_wait)
            .await
        {
            debug!("No table rendered for {} within {:?}", target, self.config.table_wait);
        }

        sleep(self.config.settle_delay).await;
        wait_stable(page).await;
        Ok(())
    }

    /// 描画済みテーブルから行を抽出
    async fn snapshot_tables(&self, page: &Page, seat: &str) -> Result<Vec<RawRow>, ScraperError> {
        let result = page
            .evaluate(TABLE_SNAPSHOT_SCRIPT)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        let json = result
            .into_value::<String>()
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        let tables: Vec<TableSnapshot> =
            serde_json::from_str(&json).map_err(|e| ScraperError::Json(e.to_string()))?;

        let rows = extract_table_rows(&tables, seat);
        info!("Extracted {} table rows for {} from {} tables", rows.len(), seat, tables.len());
        Ok(rows)
    }

    /// ターゲット1件を処理してバッチを返す
    ///
    /// 致命的でないナビゲーション失敗は診断情報に変え、そのターゲットの行は捨てる。
    async fn collect_target(
        &self,
        page: &Page,
        target: &CrawlTarget,
        events: &UnboundedSender<CaptureEvent>,
        receiver: &mut UnboundedReceiver<CaptureEvent>,
    ) -> Result<CaptureBatch, ScraperError> {
        let (stop, listener) = self.spawn_listener(page, events.clone()).await?;
        let visited = self.visit(page, target).await;

        let _ = stop.send(());
        if let Err(e) = listener.await {
            warn!("Response listener for {} failed: {}", target, e);
        }
        let mut batch = CaptureBatch::drain(receiver);

        match visited {
            Ok(()) => {
                info!(
                    "{}: {} responses captured, {} rows",
                    target,
                    batch.captures.len(),
                    batch.rows.len()
                );
                if batch.rows.is_empty() {
                    if let Some(seat) = target.seat() {
                        match self.snapshot_tables(page, seat).await {
                            Ok(rows) => batch.rows = rows,
                            Err(e) => {
                                warn!("Table fallback failed for {}: {}", target, e);
                                batch.diagnostics.push(Diagnostic::TargetNavigation {
                                    target: target.to_string(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Target {} failed: {}", target, e);
                batch.rows.clear();
                batch.diagnostics.push(Diagnostic::TargetNavigation {
                    target: target.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(batch)
    }

    /// クリーニングと成果物の保存
    fn finish(&self, batch: CaptureBatch, target_count: usize) -> Result<ScrapeResult, ScraperError> {
        let mut options = self.config.cleaning.clone();
        if self.config.validate_with_metadata && !batch.metadata.varieties.is_empty() {
            options = options
                .with_known_varieties(batch.metadata.varieties.iter().map(|v| v.name.clone()));
        }

        let records = CleaningPipeline::new(options).run(&batch.rows);
        info!(
            "Cleaned {} rows into {} records ({} diagnostics)",
            batch.rows.len(),
            records.len(),
            batch.diagnostics.len()
        );

        let raw_capture_path = if batch.captures.is_empty() {
            None
        } else {
            Some(save_artifact(&self.config.output_dir, "api_raw", &batch.captures)?)
        };

        if records.is_empty() {
            return Err(ScraperError::NoPositionData(format!(
                "{}件のターゲットを巡回, 診断{}件",
                target_count,
                batch.diagnostics.len()
            )));
        }

        let positions_path = save_artifact(&self.config.output_dir, "positions", &records)?;

        Ok(ScrapeResult {
            records,
            diagnostics: batch.diagnostics,
            metadata: batch.metadata,
            raw_capture_path,
            positions_path: Some(positions_path),
        })
    }
}

#[async_trait]
impl Scraper for BrokerPositionScraper {
    async fn initialize(&mut self) -> Result<(), ScraperError> {
        info!("Initializing browser for position scraper...");

        let user_data_dir = std::env::temp_dir().join(format!(
            "broker-position-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));

        let mut builder = BrowserConfig::builder().user_data_dir(&user_data_dir);
        if let Some(chrome_path) = ScraperConfig::chrome_path() {
            builder = builder.chrome_executable(chrome_path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if self.config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder.build().map_err(ScraperError::BrowserInit)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        page.execute(EnableParams::default())
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        self.restore_cookies(&page).await;

        self.browser = Some(browser);
        self.page = Some(page);
        info!("Browser initialized successfully");
        Ok(())
    }

    async fn verify_session(&mut self) -> Result<(), ScraperError> {
        let page = self.page()?;
        let base_url = self.config.base_url.as_str();
        info!("Verifying session at {}", base_url);

        timeout(self.config.timeout, page.goto(base_url))
            .await
            .map_err(|_| ScraperError::Timeout(base_url.to_string()))?
            .map_err(|e| ScraperError::Navigation(e.to_string()))?;

        if !poll_condition(page, "document.readyState === 'complete'", self.config.timeout).await {
            warn!("Page load did not complete, checking session anyway");
        }

        if poll_condition(page, SESSION_MARKER_SCRIPT, SESSION_MARKER_TIMEOUT).await {
            info!("Session is valid");
            Ok(())
        } else {
            error!("Logged-in marker not found at {}", base_url);
            Err(ScraperError::Session(
                "ログイン状態の表示が見つかりません".to_string(),
            ))
        }
    }

    async fn collect(&mut self) -> Result<ScrapeResult, ScraperError> {
        let page = self.page()?.clone();
        let targets = self.config.targets();
        info!("Collecting positions from {} targets", targets.len());

        let (events, mut receiver) = mpsc::unbounded_channel();
        let mut batch = CaptureBatch::default();

        for target in &targets {
            let target_batch = self
                .collect_target(&page, target, &events, &mut receiver)
                .await?;
            batch.absorb(target_batch);
        }
        drop(events);

        for diagnostic in &batch.diagnostics {
            debug!("Diagnostic: {}", diagnostic);
        }

        self.finish(batch, targets.len())
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
        }
        Ok(())
    }
}

/// 関連する応答なら本文取得 + 分類タスクを起動
fn spawn_exchange(
    tasks: &mut JoinSet<()>,
    event: &EventResponseReceived,
    page: &Page,
    classifier: &Arc<ResponseClassifier>,
    events: &UnboundedSender<CaptureEvent>,
) {
    let exchange = NetworkExchange {
        url: event.response.url.clone(),
        status: event.response.status,
        content_type: event.response.mime_type.clone(),
        body: String::new(),
    };
    if !classifier.is_relevant(&exchange) {
        return;
    }

    let page = page.clone();
    let classifier = Arc::clone(classifier);
    let events = events.clone();
    let request_id = event.request_id.clone();

    tasks.spawn(async move {
        let outcome = match fetch_body(&page, request_id).await {
            Ok(body) => classifier.classify(&NetworkExchange { body, ..exchange }),
            Err(reason) => {
                debug!("Response body unavailable for {}: {}", exchange.url, reason);
                vec![CaptureEvent::Diagnostic(Diagnostic::ResponseParse {
                    url: exchange.url,
                    reason,
                })]
            }
        };
        for event in outcome {
            // 受信側はオーケストレータが保持しているので失敗しない
            let _ = events.send(event);
        }
    });
}

/// 待たずに取り出せるイベントをすべて取り出す
fn take_ready<S>(stream: &mut S) -> Vec<S::Item>
where
    S: Stream + Unpin,
{
    let mut ready = Vec::new();
    while let Some(Some(item)) = stream.next().now_or_never() {
        ready.push(item);
    }
    ready
}

/// 応答本文を取得（base64 の場合は復号）
async fn fetch_body(page: &Page, request_id: RequestId) -> Result<String, String> {
    let mut last_error = String::new();

    for attempt in 1..=BODY_FETCH_RETRIES {
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(response) => {
                let body = &response.result;
                if !body.base64_encoded {
                    return Ok(body.body.clone());
                }
                let bytes = STANDARD.decode(&body.body).map_err(|e| e.to_string())?;
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            Err(e) => {
                last_error = e.to_string();
                sleep(Duration::from_millis(BODY_FETCH_INTERVAL_MS * u64::from(attempt))).await;
            }
        }
    }

    Err(last_error)
}

/// 条件式が真になるまでポーリング（タイムアウトで false）
async fn poll_condition(page: &Page, script: &str, limit: Duration) -> bool {
    let start = Instant::now();

    while start.elapsed() < limit {
        match page.evaluate(script).await {
            Ok(value) => {
                if value.into_value::<bool>().unwrap_or(false) {
                    return true;
                }
            }
            Err(e) => debug!("Condition check error: {}", e),
        }
        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
    false
}

/// HTML の長さが連続して変わらなくなるまで待機
async fn wait_stable(page: &Page) {
    let start = Instant::now();
    let limit = Duration::from_millis(PAGE_STABLE_TIMEOUT_MS);

    let mut last_len: Option<usize> = None;
    let mut stable_count = 0;
    const REQUIRED_STABLE_CHECKS: u32 = 3;

    while start.elapsed() < limit {
        match page
            .evaluate("document.documentElement.outerHTML.length")
            .await
        {
            Ok(value) => {
                let current = value.into_value::<usize>().unwrap_or(0);
                if last_len == Some(current) {
                    stable_count += 1;
                    if stable_count >= REQUIRED_STABLE_CHECKS {
                        debug!("Page stable after {:?}", start.elapsed());
                        return;
                    }
                } else {
                    stable_count = 0;
                }
                last_len = Some(current);
            }
            Err(e) => {
                debug!("Page stable check error: {}", e);
                stable_count = 0;
            }
        }
        sleep(Duration::from_millis(300)).await;
    }

    warn!("Page stable timeout after {:?}, proceeding anyway", start.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionCookie;
    use crate::position::types::{label, RawValue, Source};
    use serde_json::json;

    fn scraper(output_dir: PathBuf) -> BrokerPositionScraper {
        BrokerPositionScraper::new(
            ScraperConfig::default()
                .with_target_seats(["中信期货"])
                .with_output_dir(output_dir),
        )
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("position-scraper-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_finish_without_rows_is_no_position_data() {
        let dir = temp_dir("empty");
        let result = scraper(dir.clone()).finish(CaptureBatch::default(), 1);
        assert!(matches!(result, Err(ScraperError::NoPositionData(_))));
        let positions_written = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .any(|e| e.file_name().to_string_lossy().starts_with("positions"))
            })
            .unwrap_or(false);
        assert!(!positions_written);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_finish_cleans_and_saves_artifacts() {
        let dir = temp_dir("finish");
        let mut batch = CaptureBatch::default();
        batch.apply(CaptureEvent::Captured {
            url: "https://www.jiaoyikecha.com/ajax/broker_position.php?broker=中信期货".to_string(),
            body: json!({"code": 0}),
        });
        batch.apply(CaptureEvent::Rows(vec![RawRow::new("中信期货", Source::ApiJson)
            .with_text(label::VARIETY, "螺纹钢")
            .with(label::NET_POSITION, RawValue::Number(200))]));

        let result = scraper(dir.clone()).finish(batch, 1).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].net_position, Some(200));
        assert!(result.raw_capture_path.as_ref().is_some_and(|p| p.exists()));
        assert!(result.positions_path.as_ref().is_some_and(|p| p.exists()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_finish_validates_labels_with_metadata() {
        let dir = temp_dir("metadata");
        let mut config = ScraperConfig::default()
            .with_target_seats(["中信期货"])
            .with_output_dir(dir.clone())
            .with_validate_with_metadata(true);
        config.session_cookies.push(SessionCookie {
            name: "token".to_string(),
            value: "abc".to_string(),
            domain: ".jiaoyikecha.com".to_string(),
            path: "/".to_string(),
        });

        let mut batch = CaptureBatch::default();
        batch.metadata.varieties.push(crate::position::VarietyRef {
            symbol: "RB".to_string(),
            name: "螺纹钢".to_string(),
        });
        batch.rows = vec![
            RawRow::new("中信期货", Source::DomTable).with_text("品种", "合计"),
            RawRow::new("中信期货", Source::DomTable).with_text("总净持仓", "净多100(增5)"),
            RawRow::new("中信期货", Source::DomTable).with_text("品种", "螺纹钢"),
            RawRow::new("中信期货", Source::DomTable).with_text("总净持仓", "净空50(减5)"),
        ];

        let result = BrokerPositionScraper::new(config).finish(batch, 1).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].variety, "螺纹钢");
        assert_eq!(result.records[0].net_position, Some(50));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_take_ready_drains_buffered_events_without_waiting() {
        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        tx.unbounded_send("broker_position").unwrap();
        tx.unbounded_send("search").unwrap();

        // 送信側が生きていても、届いている分だけ返して止まる
        assert_eq!(take_ready(&mut rx), vec!["broker_position", "search"]);
        assert!(take_ready(&mut rx).is_empty());

        tx.unbounded_send("late").unwrap();
        drop(tx);
        assert_eq!(take_ready(&mut rx), vec!["late"]);
    }

    #[tokio::test]
    async fn test_collect_requires_initialize() {
        let mut scraper = scraper(temp_dir("uninit"));
        let result = scraper.collect().await;
        assert!(matches!(result, Err(ScraperError::BrowserInit(_))));
    }

    #[tokio::test]
    #[ignore] // 実環境テスト用: POSITION_COOKIES=cookies.json cargo test test_live_scrape -- --ignored --nocapture
    async fn test_live_scrape() {
        tracing_subscriber::fmt()
            .with_env_filter("info,broker_position_scraper=debug")
            .init();

        let path = std::env::var("POSITION_COOKIES").expect("POSITION_COOKIES not set");
        let cookies: Vec<SessionCookie> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        let config = ScraperConfig::new(cookies).with_debug(true);
        let mut scraper = BrokerPositionScraper::new(config);

        match scraper.execute().await {
            Ok(result) => {
                println!("\n=== Scrape Result ===");
                println!("Records: {}", result.records.len());
                println!("Diagnostics: {}", result.diagnostics.len());
                for record in result.records.iter().take(20) {
                    println!(
                        "  - {} {} {} {:?}",
                        record.seat,
                        record.variety,
                        record.direction.glyph(),
                        record.net_position
                    );
                }
            }
            Err(e) => panic!("Scrape failed: {:?}", e),
        }
    }
}
