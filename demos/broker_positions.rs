//! 席位持仓の取得デモ
//!
//! ```text
//! POSITION_COOKIES=cookies.json cargo run --example broker_positions -- 中信期货 摩根大通
//! ```
//!
//! `cookies.json` はログイン済みブラウザから書き出した `SessionCookie` の配列。

use broker_position_scraper::{PositionService, ScrapeRequest, ScraperError, SessionCookie};
use tower::Service;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn load_cookies() -> Result<Vec<SessionCookie>, Box<dyn std::error::Error>> {
    let path = std::env::var("POSITION_COOKIES").unwrap_or_else(|_| "cookies.json".to_string());
    let json = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&json)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cookies = load_cookies()?;
    let seats: Vec<String> = std::env::args().skip(1).collect();
    let headless = std::env::var("HEADLESS").map(|v| v != "0").unwrap_or(true);

    let request = ScrapeRequest::new(cookies)
        .with_target_seats(seats)
        .with_crawl_varieties(std::env::var("CRAWL_VARIETIES").is_ok())
        .with_headless(headless);

    let mut service = PositionService::new();
    match service.call(request).await {
        Ok(result) => {
            for diagnostic in &result.diagnostics {
                warn!("{}", diagnostic);
            }
            for record in &result.records {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    record.seat,
                    record.variety,
                    record.direction.glyph(),
                    record.net_position.map_or("-".to_string(), |n| n.to_string()),
                    record.net_change.map_or("-".to_string(), |n| format!("{:+}", n)),
                );
            }
            info!("{} records written to {:?}", result.records.len(), result.positions_path);
            Ok(())
        }
        Err(ScraperError::Session(reason)) => {
            error!("セッションが無効です。クッキーを書き出し直してください: {}", reason);
            Err(ScraperError::Session(reason).into())
        }
        Err(e) => Err(e.into()),
    }
}
