use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::config::{ScraperConfig, SessionCookie};
use crate::error::ScraperError;
use crate::position::{BrokerPositionScraper, ScrapeResult};
use crate::traits::Scraper;

/// スクレイピングリクエスト
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub session_cookies: Vec<SessionCookie>,
    /// 空なら既定の席位
    pub target_seats: Vec<String>,
    pub crawl_varieties: bool,
    pub output_dir: PathBuf,
    pub headless: bool,
}

impl ScrapeRequest {
    pub fn new(session_cookies: Vec<SessionCookie>) -> Self {
        Self {
            session_cookies,
            target_seats: Vec::new(),
            crawl_varieties: false,
            output_dir: PathBuf::from("./data"),
            headless: true,
        }
    }

    pub fn with_target_seats<I, S>(mut self, seats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_seats = seats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_crawl_varieties(mut self, crawl: bool) -> Self {
        self.crawl_varieties = crawl;
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

impl From<ScrapeRequest> for ScraperConfig {
    fn from(req: ScrapeRequest) -> Self {
        let mut config = ScraperConfig::new(req.session_cookies)
            .with_crawl_varieties(req.crawl_varieties)
            .with_output_dir(req.output_dir)
            .with_headless(req.headless);
        if !req.target_seats.is_empty() {
            config = config.with_target_seats(req.target_seats);
        }
        config
    }
}

/// tower::Serviceを実装した持仓スクレイパーサービス
#[derive(Debug, Clone, Default)]
pub struct PositionService;

impl PositionService {
    pub fn new() -> Self {
        Self
    }
}

impl Service<ScrapeRequest> for PositionService {
    type Response = ScrapeResult;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ScrapeRequest) -> Self::Future {
        info!(
            "スクレイピングリクエスト受信: cookies={}, seats={:?}",
            req.session_cookies.len(),
            req.target_seats
        );

        Box::pin(async move {
            let config: ScraperConfig = req.into();
            let mut scraper = BrokerPositionScraper::new(config);

            let result = scraper.execute().await?;

            info!(
                "スクレイピング完了: records={}, diagnostics={}, path={:?}",
                result.records.len(),
                result.diagnostics.len(),
                result.positions_path
            );

            Ok(result)
        })
    }
}
