//! 期货席位持仓の取得と正規化
//!
//! ネットワーク応答の傍受（JSON）とテーブルのスナップショット（DOM）から
//! 行を集め、最後に一度だけクリーニングして `PositionRecord` にまとめる。

pub mod capture;
pub mod classifier;
pub mod cleaning;
pub mod decoder;
pub mod normalizer;
pub mod scraper;
pub mod table;
pub mod text;
pub mod types;

pub use capture::{save_artifact, CaptureBatch, CaptureEvent, RawCapture};
pub use classifier::{extract_url_param, ClassifierOptions, NetworkExchange, ResponseClassifier};
pub use cleaning::{CleaningOptions, CleaningPipeline, SourcePrecedence};
pub use decoder::{decode_payload, DecodeError};
pub use normalizer::{extract_site_metadata, RecordNormalizer, Subject};
pub use scraper::{BrokerPositionScraper, ScrapeResult};
pub use table::{extract_table_rows, TableSnapshot, TABLE_SNAPSHOT_SCRIPT};
pub use text::{extract_contract, parse_magnitude, parse_net, MagnitudeField, NetField};
pub use types::{
    ContractRef, CrawlTarget, Diagnostic, Direction, PositionRecord, RawRow, RawValue,
    SiteMetadata, Source, VarietyRef,
};
