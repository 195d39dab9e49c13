//! 持仓データ関連の型定義

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 净持仓の方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Unknown,
}

impl Direction {
    /// 方向グリフ（多/空）から変換
    pub fn from_glyph(glyph: &str) -> Self {
        match glyph {
            "多" => Direction::Long,
            "空" => Direction::Short,
            _ => Direction::Unknown,
        }
    }

    /// APIのキー名や表の「方向」列から推定
    ///
    /// `净多` / `long` / `buy` 系は Long、`净空` / `short` / `sell` 系は Short。
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_ascii_lowercase();
        if lower.contains('多') || lower.contains("long") || lower.contains("buy") {
            Direction::Long
        } else if lower.contains('空') || lower.contains("short") || lower.contains("sell") {
            Direction::Short
        } else {
            Direction::Unknown
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Direction::Long => "多",
            Direction::Short => "空",
            Direction::Unknown => "",
        }
    }
}

/// レコードの取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    ApiJson,
    DomTable,
}

/// 正規化済みの持仓レコード（出力単位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub seat: String,
    pub variety: String,
    pub contract: Option<String>,
    pub direction: Direction,
    pub long_position: Option<i64>,
    pub long_change: Option<i64>,
    pub short_position: Option<i64>,
    pub short_change: Option<i64>,
    pub net_position: Option<i64>,
    pub net_change: Option<i64>,
    pub source: Source,
}

/// JSON経路の行で使う正規列ラベル
pub mod label {
    pub const VARIETY: &str = "variety";
    pub const CONTRACT: &str = "contract";
    pub const DIRECTION: &str = "direction";
    pub const LONG_POSITION: &str = "longPosition";
    pub const LONG_CHANGE: &str = "longChange";
    pub const SHORT_POSITION: &str = "shortPosition";
    pub const SHORT_CHANGE: &str = "shortChange";
    pub const NET_POSITION: &str = "netPosition";
    pub const NET_CHANGE: &str = "netChange";
}

/// 生セル値
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Number(i64),
    Null,
}

impl RawValue {
    /// JSON値から変換（オブジェクト・配列はテキスト化）
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => RawValue::Null,
            Value::String(s) => RawValue::Text(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => RawValue::Number(i),
                None => match n.as_f64() {
                    // i64 に収まらない値は丸めずにテキストとして残す
                    Some(f)
                        if f.fract() == 0.0
                            && f >= i64::MIN as f64
                            && f < i64::MAX as f64 =>
                    {
                        RawValue::Number(f as i64)
                    }
                    _ => RawValue::Text(n.to_string()),
                },
            },
            Value::Bool(b) => RawValue::Text(b.to_string()),
            other => RawValue::Text(other.to_string()),
        }
    }

    /// 空白のみのテキストは空扱い
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            RawValue::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 整数として読める値（数値、または整数のみのテキスト）
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(s) => s.trim().trim_start_matches('+').parse().ok(),
            RawValue::Null => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Text(s) => f.write_str(s),
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Null => Ok(()),
        }
    }
}

/// 列ラベル → セル値 の中間行
///
/// JSON経路は英字の正規ラベル、テーブル経路はページ上のヘッダ文字列をそのまま持つ。
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub seat: String,
    pub source: Source,
    pub cells: HashMap<String, RawValue>,
}

impl RawRow {
    pub fn new(seat: impl Into<String>, source: Source) -> Self {
        Self {
            seat: seat.into(),
            source,
            cells: HashMap::new(),
        }
    }

    /// セルを追加（ビルダー形式）
    pub fn with(mut self, label: impl Into<String>, value: RawValue) -> Self {
        self.cells.insert(label.into(), value);
        self
    }

    pub fn with_text(self, label: impl Into<String>, text: impl Into<String>) -> Self {
        self.with(label, RawValue::Text(text.into()))
    }

    pub fn insert(&mut self, label: impl Into<String>, value: RawValue) {
        self.cells.insert(label.into(), value);
    }

    /// 候補ラベルを順に試し、最初に見つかった非空セルを返す
    pub fn first_of(&self, labels: &[&str]) -> Option<&RawValue> {
        labels
            .iter()
            .filter_map(|label| self.cells.get(*label))
            .find(|value| !value.is_blank())
    }
}

/// 品種参照（search ペイロード）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarietyRef {
    pub symbol: String,
    pub name: String,
}

/// 合約参照（search ペイロード）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    pub code: String,
    pub name: String,
}

/// サイトメタデータ（品種・合約・席位の参照リスト）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub varieties: Vec<VarietyRef>,
    pub contracts: Vec<ContractRef>,
    pub brokers: Vec<String>,
}

impl SiteMetadata {
    pub fn is_empty(&self) -> bool {
        self.varieties.is_empty() && self.contracts.is_empty() && self.brokers.is_empty()
    }

    /// 別の取得結果を取り込む（重複は除外）
    pub fn merge(&mut self, other: SiteMetadata) {
        for v in other.varieties {
            if !self.varieties.contains(&v) {
                self.varieties.push(v);
            }
        }
        for c in other.contracts {
            if !self.contracts.contains(&c) {
                self.contracts.push(c);
            }
        }
        for b in other.brokers {
            if !self.brokers.contains(&b) {
                self.brokers.push(b);
            }
        }
    }
}

/// 処理を止めずに回復した失敗の記録
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("レスポンス解析失敗 ({url}): {reason}")]
    ResponseParse { url: String, reason: String },

    #[error("ペイロード復号失敗 ({url}): {reason}")]
    PayloadDecode { url: String, reason: String },

    #[error("ターゲット取得失敗 ({target}): {reason}")]
    TargetNavigation { target: String, reason: String },
}

/// 巡回ターゲット
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    /// 席位ページ（/#/broker/position/broker=...）
    Seat(String),
    /// 品種ページ（/#/position/variety=...）
    Variety { name: String, symbol: String },
}

impl CrawlTarget {
    /// ページURL（ハッシュルート）を構築
    pub fn page_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            CrawlTarget::Seat(seat) => format!("{}/#/broker/position/broker={}", base, seat),
            CrawlTarget::Variety { symbol, .. } => {
                format!("{}/#/position/variety={}", base, symbol)
            }
        }
    }

    /// テーブルフォールバックで行に付与する席位名
    pub fn seat(&self) -> Option<&str> {
        match self {
            CrawlTarget::Seat(seat) => Some(seat.as_str()),
            CrawlTarget::Variety { .. } => None,
        }
    }
}

impl fmt::Display for CrawlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlTarget::Seat(seat) => write!(f, "席位:{}", seat),
            CrawlTarget::Variety { name, symbol } => write!(f, "品種:{}({})", name, symbol),
        }
    }
}
