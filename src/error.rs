use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("セッション無効: {0}（ログイン状態を再取得してください）")]
    Session(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("JSON解析エラー: {0}")]
    Json(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("持仓データなし: {0}")]
    NoPositionData(String),
}

impl ScraperError {
    /// 実行全体を中断すべきエラーか（ターゲット単位で回復できないもの）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScraperError::BrowserInit(_) | ScraperError::Session(_) | ScraperError::FileIO(_)
        )
    }
}
