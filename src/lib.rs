//! 期货席位持仓スクレイパーライブラリ
//!
//! - 認証済みクッキーでブラウザを起動し、席位・品種ページを巡回
//! - API応答を傍受して正規化、取れなければ描画済みテーブルから抽出
//! - 複合セル文字列（"净多12345\n(增999)" など）を数値に分解し、
//!   (席位, 品種) ごとに重複排除した `PositionRecord` を返す
//!
//! # 使用例
//!
//! ```rust,ignore
//! use broker_position_scraper::{PositionService, ScrapeRequest, SessionCookie};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cookies: Vec<SessionCookie> = load_cookies();
//!     let mut service = PositionService::new();
//!
//!     let request = ScrapeRequest::new(cookies)
//!         .with_target_seats(["中信期货", "摩根大通"])
//!         .with_output_dir("./data");
//!
//!     let result = service.call(request).await.unwrap();
//!     println!("Records: {}", result.records.len());
//! }
//! ```
//!
//! # パイプラインのみ使う場合
//!
//! ```rust
//! use broker_position_scraper::position::{CleaningPipeline, RawRow, Source};
//!
//! let rows = vec![
//!     RawRow::new("中信期货", Source::DomTable).with_text("品种", "螺纹钢"),
//!     RawRow::new("中信期货", Source::DomTable)
//!         .with_text("总净持仓", "净多12345\n(增999)")
//!         .with_text("合约", "rb2501"),
//! ];
//! let records = CleaningPipeline::default().run(&rows);
//! assert_eq!(records[0].variety, "螺纹钢");
//! assert_eq!(records[0].net_change, Some(999));
//! ```

pub mod config;
pub mod error;
pub mod position;
pub mod service;
pub mod traits;

// 主要な型をリエクスポート
pub use config::{ScraperConfig, SessionCookie};
pub use error::ScraperError;
pub use position::{BrokerPositionScraper, Diagnostic, PositionRecord, ScrapeResult};
pub use service::{PositionService, ScrapeRequest};
pub use traits::Scraper;
