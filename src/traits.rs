use async_trait::async_trait;
use tracing::warn;

use crate::error::ScraperError;
use crate::position::ScrapeResult;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// ブラウザ初期化（クッキー復元を含む）
    async fn initialize(&mut self) -> Result<(), ScraperError>;

    /// ログイン状態の確認（無効なら `ScraperError::Session`）
    async fn verify_session(&mut self) -> Result<(), ScraperError>;

    /// 全ターゲットの巡回と正規化
    async fn collect(&mut self) -> Result<ScrapeResult, ScraperError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScraperError>;

    /// 一括実行（initialize → verify_session → collect → close）
    ///
    /// 途中で失敗してもブラウザは閉じる。
    async fn execute(&mut self) -> Result<ScrapeResult, ScraperError> {
        self.initialize().await?;

        let result = match self.verify_session().await {
            Ok(()) => self.collect().await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.close().await {
            warn!("Failed to close scraper: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// 呼び出し順を記録するだけのスクレイパー
    struct Recording {
        calls: Arc<Mutex<Vec<&'static str>>>,
        session_valid: bool,
    }

    #[async_trait]
    impl Scraper for Recording {
        async fn initialize(&mut self) -> Result<(), ScraperError> {
            self.calls.lock().unwrap().push("initialize");
            Ok(())
        }

        async fn verify_session(&mut self) -> Result<(), ScraperError> {
            self.calls.lock().unwrap().push("verify_session");
            if self.session_valid {
                Ok(())
            } else {
                Err(ScraperError::Session("expired".to_string()))
            }
        }

        async fn collect(&mut self) -> Result<ScrapeResult, ScraperError> {
            self.calls.lock().unwrap().push("collect");
            Ok(ScrapeResult::default())
        }

        async fn close(&mut self) -> Result<(), ScraperError> {
            self.calls.lock().unwrap().push("close");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_execute_runs_all_steps() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scraper = Recording {
            calls: Arc::clone(&calls),
            session_valid: true,
        };
        scraper.execute().await.unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["initialize", "verify_session", "collect", "close"]
        );
    }

    #[tokio::test]
    async fn test_invalid_session_skips_collect_but_closes() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scraper = Recording {
            calls: Arc::clone(&calls),
            session_valid: false,
        };
        let result = scraper.execute().await;
        assert!(matches!(result, Err(ScraperError::Session(_))));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["initialize", "verify_session", "close"]
        );
    }
}
