//! 傍受したネットワーク応答の分類
//!
//! 応答ごとに関連性を判定し、関連する本文は URL をキーに記録する。
//! アプリケーション側の成功コードを持つ応答は正規化へ、
//! search エンドポイントの圧縮ペイロードは復号へ回す。

use serde_json::Value;
use tracing::debug;

use super::capture::CaptureEvent;
use super::decoder::decode_payload;
use super::normalizer::{extract_site_metadata, RecordNormalizer, Subject};
use super::types::Diagnostic;

/// 傍受した1件の応答
#[derive(Debug, Clone)]
pub struct NetworkExchange {
    pub url: String,
    pub status: i64,
    pub content_type: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    /// 持仓データを含むURLのキーワード（大文字小文字無視）
    pub position_keywords: Vec<String>,
    /// 圧縮メタデータを返すURLのキーワード
    pub metadata_keywords: Vec<String>,
    /// 応答本文 `code` の成功値
    pub ok_code: i64,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            position_keywords: vec!["broker".to_string(), "position".to_string()],
            metadata_keywords: vec!["search".to_string()],
            ok_code: 0,
        }
    }
}

/// URL から `key=` の値を取り出す（次の `&` か `/` まで、パーセントデコード済み）
pub fn extract_url_param(url: &str, key: &str) -> Option<String> {
    let marker = format!("{}=", key);
    let start = url.find(&marker)?;
    let rest = &url[start..];
    let end = rest[marker.len()..]
        .find(|c: char| c == '&' || c == '/')
        .map_or(rest.len(), |i| i + marker.len());

    url::form_urlencoded::parse(rest[..end].as_bytes())
        .next()
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 空の `data`（null・空配列・空オブジェクト・空文字列）
fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|keyword| haystack.contains(keyword.to_lowercase().as_str()))
}

/// 応答分類器
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    options: ClassifierOptions,
    normalizer: RecordNormalizer,
}

impl ResponseClassifier {
    pub fn new(options: ClassifierOptions, normalizer: RecordNormalizer) -> Self {
        Self {
            options,
            normalizer,
        }
    }

    /// ステータス・Content-Type・URL による関連性判定
    pub fn is_relevant(&self, exchange: &NetworkExchange) -> bool {
        if !(200..300).contains(&exchange.status) {
            return false;
        }
        if !exchange.content_type.to_ascii_lowercase().contains("json") {
            return false;
        }
        let url = exchange.url.to_lowercase();
        contains_any(&url, &self.options.position_keywords)
            || contains_any(&url, &self.options.metadata_keywords)
    }

    fn subject(url: &str) -> Option<Subject> {
        extract_url_param(url, "broker")
            .map(Subject::Seat)
            .or_else(|| extract_url_param(url, "variety").map(Subject::Variety))
    }

    fn is_ok(&self, body: &Value) -> bool {
        body.get("code").and_then(Value::as_i64) == Some(self.options.ok_code)
    }

    /// 応答を分類してイベント列に変換
    ///
    /// 無関係な応答は空、本文がJSONでなければ診断情報のみを返す。
    pub fn classify(&self, exchange: &NetworkExchange) -> Vec<CaptureEvent> {
        if !self.is_relevant(exchange) {
            return Vec::new();
        }

        let url = exchange.url.as_str();
        let body: Value = match serde_json::from_str(&exchange.body) {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to parse response body from {}: {}", url, e);
                return vec![CaptureEvent::Diagnostic(Diagnostic::ResponseParse {
                    url: url.to_string(),
                    reason: e.to_string(),
                })];
            }
        };

        let mut events = Vec::new();
        let data = if self.is_ok(&body) {
            body.get("data").filter(|d| !is_empty_payload(d)).cloned()
        } else {
            None
        };

        if let Some(data) = data {
            let lower = url.to_lowercase();

            if contains_any(&lower, &self.options.position_keywords) {
                if let Some(subject) = Self::subject(url) {
                    let rows = self.normalizer.normalize(&subject, &data);
                    if !rows.is_empty() {
                        debug!("Normalized {} rows from {}", rows.len(), url);
                        events.push(CaptureEvent::Rows(rows));
                    }
                }
            }

            if contains_any(&lower, &self.options.metadata_keywords) {
                if let Value::String(encoded) = &data {
                    match decode_payload(encoded) {
                        Ok(decoded) => {
                            events.push(CaptureEvent::Metadata(extract_site_metadata(&decoded)))
                        }
                        Err(e) => {
                            debug!("Failed to decode search payload from {}: {}", url, e);
                            events.push(CaptureEvent::Diagnostic(Diagnostic::PayloadDecode {
                                url: url.to_string(),
                                reason: e.to_string(),
                            }));
                        }
                    }
                }
            }
        }

        events.insert(
            0,
            CaptureEvent::Captured {
                url: url.to_string(),
                body,
            },
        );
        events
    }
}
