//! 応答処理タスクからの集計
//!
//! 応答ハンドラは `CaptureEvent` をチャネルへ送るだけで、集計先には直接触れない。
//! 集計はオーケストレータ側で `CaptureBatch` に取り込む。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use super::types::{Diagnostic, RawRow, SiteMetadata};
use crate::error::ScraperError;

/// URL → 応答本文（デバッグ出力用）
pub type RawCapture = BTreeMap<String, Value>;

/// 応答ハンドラから送られるイベント
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Captured { url: String, body: Value },
    Rows(Vec<RawRow>),
    Metadata(SiteMetadata),
    Diagnostic(Diagnostic),
}

/// イベントの集計結果
#[derive(Debug, Default)]
pub struct CaptureBatch {
    pub captures: RawCapture,
    pub rows: Vec<RawRow>,
    pub metadata: SiteMetadata,
    pub diagnostics: Vec<Diagnostic>,
}

impl CaptureBatch {
    pub fn apply(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Captured { url, body } => {
                self.captures.insert(url, body);
            }
            CaptureEvent::Rows(rows) => self.rows.extend(rows),
            CaptureEvent::Metadata(metadata) => self.metadata.merge(metadata),
            CaptureEvent::Diagnostic(diagnostic) => self.diagnostics.push(diagnostic),
        }
    }

    /// 受信済みのイベントをすべて取り込む
    ///
    /// 送信側タスクの完了を待ってから呼ぶこと（ここでは待たない）。
    pub fn drain(receiver: &mut UnboundedReceiver<CaptureEvent>) -> Self {
        let mut batch = Self::default();
        while let Ok(event) = receiver.try_recv() {
            batch.apply(event);
        }
        batch
    }

    /// 別バッチを後ろに連結
    pub fn absorb(&mut self, other: CaptureBatch) {
        self.captures.extend(other.captures);
        self.rows.extend(other.rows);
        self.metadata.merge(other.metadata);
        self.diagnostics.extend(other.diagnostics);
    }
}

/// JSONファイルをタイムスタンプ付きで保存
pub fn save_artifact<T: Serialize + ?Sized>(
    dir: &Path,
    prefix: &str,
    value: &T,
) -> Result<PathBuf, ScraperError> {
    std::fs::create_dir_all(dir)?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.json", prefix, timestamp));

    let json =
        serde_json::to_string_pretty(value).map_err(|e| ScraperError::Json(e.to_string()))?;
    std::fs::write(&path, json)?;

    info!("Saved {} to {}", prefix, path.display());
    Ok(path)
}
