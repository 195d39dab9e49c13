//! 行データのクリーニング
//!
//! API・テーブル両経路の行を受け取り、セル文字列を解析して `PositionRecord` に変換する。
//! テーブルには数値を持たない「分類行」（品種名だけの行）が挟まるため、
//! 直近の分類行の品種名を後続のデータ行へ引き継ぐ。

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::text::{extract_contract, parse_magnitude, parse_net, MagnitudeField, NetField};
use super::types::{label, Direction, PositionRecord, RawRow, RawValue, Source};

const VARIETY_COLUMNS: &[&str] = &["品种", label::VARIETY];
const CONTRACT_COLUMNS: &[&str] = &["合约", label::CONTRACT];
const DIRECTION_COLUMNS: &[&str] = &["方向", "净方向", label::DIRECTION];
const NET_COLUMNS: &[&str] = &["总净持仓", "净持仓", label::NET_POSITION];
const NET_CHANGE_COLUMNS: &[&str] = &["净变化", label::NET_CHANGE];
const LONG_COLUMNS: &[&str] = &["多头持仓", label::LONG_POSITION];
const LONG_CHANGE_COLUMNS: &[&str] = &["多头变化", label::LONG_CHANGE];
const SHORT_COLUMNS: &[&str] = &["空头持仓", label::SHORT_POSITION];
const SHORT_CHANGE_COLUMNS: &[&str] = &["空头变化", label::SHORT_CHANGE];

/// 表の途中に出る「建仓过程」見出し（品種名ではない）
pub const DEFAULT_NOISE_MARKER: &str = "建仓过程";
/// 分類行として扱うラベルの最大文字数（未満）
pub const DEFAULT_MAX_LABEL_CHARS: usize = 10;

/// 同じ (席位, 品種) が両経路から得られた場合の優先順位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourcePrecedence {
    /// 先に現れたものを残す
    #[default]
    FirstSeen,
    PreferApi,
    PreferDom,
}

impl SourcePrecedence {
    fn replaces(self, kept: Source, incoming: Source) -> bool {
        match self {
            SourcePrecedence::FirstSeen => false,
            SourcePrecedence::PreferApi => kept != Source::ApiJson && incoming == Source::ApiJson,
            SourcePrecedence::PreferDom => {
                kept != Source::DomTable && incoming == Source::DomTable
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleaningOptions {
    pub noise_marker: String,
    pub max_label_chars: usize,
    /// 指定時は分類行ラベルがこの集合に含まれる場合のみ品種として採用
    pub known_varieties: Option<HashSet<String>>,
    pub precedence: SourcePrecedence,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            noise_marker: DEFAULT_NOISE_MARKER.to_string(),
            max_label_chars: DEFAULT_MAX_LABEL_CHARS,
            known_varieties: None,
            precedence: SourcePrecedence::default(),
        }
    }
}

impl CleaningOptions {
    pub fn with_known_varieties<I>(mut self, varieties: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.known_varieties = Some(varieties.into_iter().collect());
        self
    }

    pub fn with_precedence(mut self, precedence: SourcePrecedence) -> Self {
        self.precedence = precedence;
        self
    }
}

fn cell_text(row: &RawRow, columns: &[&str]) -> Option<String> {
    match row.first_of(columns)? {
        RawValue::Text(s) => Some(s.trim().to_string()),
        RawValue::Number(n) => Some(n.to_string()),
        RawValue::Null => None,
    }
}

fn cell_int(row: &RawRow, columns: &[&str]) -> Option<i64> {
    row.first_of(columns).and_then(RawValue::as_int)
}

/// 净持仓列を解析
///
/// API経路の数値セルは文字列文法を通さず、方向は行の方向ラベルから決める。
fn net_field(row: &RawRow) -> NetField {
    match row.first_of(NET_COLUMNS) {
        Some(RawValue::Number(n)) => NetField {
            direction: Some(
                cell_text(row, DIRECTION_COLUMNS)
                    .map(|l| Direction::from_label(&l))
                    .unwrap_or(Direction::Unknown),
            ),
            magnitude: Some(*n),
            change: None,
        },
        Some(RawValue::Text(text)) => parse_net(Some(text)),
        _ => NetField::default(),
    }
}

/// 持仓列を解析（専用の変化列があればそちらを優先）
fn magnitude_field(row: &RawRow, columns: &[&str], change_columns: &[&str]) -> MagnitudeField {
    let mut field = match row.first_of(columns) {
        Some(RawValue::Number(n)) => MagnitudeField {
            value: Some(*n),
            change: None,
        },
        Some(RawValue::Text(text)) => parse_magnitude(Some(text)),
        _ => MagnitudeField::default(),
    };
    if let Some(change) = cell_int(row, change_columns) {
        field.change = Some(change);
    }
    field
}

fn contract_field(row: &RawRow) -> Option<String> {
    row.first_of(CONTRACT_COLUMNS)
        .and_then(RawValue::as_text)
        .and_then(|text| extract_contract(Some(text)))
}

/// 净持仓・合約・多頭持仓のいずれも読めない行は分類行候補
fn is_classification_row(row: &RawRow) -> bool {
    let has_net = net_field(row).is_match();
    let has_contract = contract_field(row).is_some();
    let has_long = match row.first_of(LONG_COLUMNS) {
        Some(RawValue::Number(_)) => true,
        Some(RawValue::Text(text)) => parse_magnitude(Some(text)).is_match(),
        _ => false,
    };
    !has_net && !has_contract && !has_long
}

/// クリーニングパイプライン
#[derive(Debug, Clone, Default)]
pub struct CleaningPipeline {
    options: CleaningOptions,
}

impl CleaningPipeline {
    pub fn new(options: CleaningOptions) -> Self {
        Self { options }
    }

    /// 行列全体を正規化・重複排除してレコード列を返す
    ///
    /// 行単位の解析失敗はその行を飛ばすだけで、処理全体は失敗しない。
    pub fn run(&self, rows: &[RawRow]) -> Vec<PositionRecord> {
        // 席位ごとに元の順序を保って分割（席位の並びは初出順）
        let mut seat_order: Vec<&str> = Vec::new();
        let mut by_seat: HashMap<&str, Vec<&RawRow>> = HashMap::new();
        for row in rows {
            let seat = row.seat.as_str();
            by_seat
                .entry(seat)
                .or_insert_with(|| {
                    seat_order.push(seat);
                    Vec::new()
                })
                .push(row);
        }

        let mut records = Vec::new();
        for seat in seat_order {
            if let Some(seat_rows) = by_seat.get(seat) {
                records.extend(self.clean_seat(seat_rows));
            }
        }

        let cleaned = self.dedup(records);
        debug!(
            "Cleaning produced {} records from {} rows",
            cleaned.len(),
            rows.len()
        );
        cleaned
    }

    fn accepts_label(&self, label: &str) -> bool {
        !label.is_empty()
            && !label.contains(self.options.noise_marker.as_str())
            && label.chars().count() < self.options.max_label_chars
            && self
                .options
                .known_varieties
                .as_ref()
                .map_or(true, |known| known.contains(label))
    }

    fn clean_seat(&self, rows: &[&RawRow]) -> Vec<PositionRecord> {
        let mut carried_variety: Option<String> = None;
        let mut records = Vec::new();

        for row in rows {
            let own_variety = cell_text(row, VARIETY_COLUMNS).filter(|v| !v.is_empty());

            if is_classification_row(row) {
                if let Some(label) = own_variety.filter(|l| self.accepts_label(l)) {
                    carried_variety = Some(label);
                }
                continue;
            }

            let net = net_field(row);
            let Some(direction) = net.direction else {
                continue;
            };

            let variety = own_variety
                .filter(|v| !v.contains(self.options.noise_marker.as_str()))
                .or_else(|| carried_variety.clone());
            let Some(variety) = variety else {
                continue;
            };

            let long = magnitude_field(row, LONG_COLUMNS, LONG_CHANGE_COLUMNS);
            let short = magnitude_field(row, SHORT_COLUMNS, SHORT_CHANGE_COLUMNS);

            records.push(PositionRecord {
                seat: row.seat.clone(),
                variety,
                contract: contract_field(row),
                direction,
                long_position: long.value,
                long_change: long.change,
                short_position: short.value,
                short_change: short.change,
                net_position: net.magnitude,
                net_change: cell_int(row, NET_CHANGE_COLUMNS).or(net.change),
                source: row.source,
            });
        }

        records
    }

    /// (席位, 品種) で重複排除。出力順は各キーの初出順
    fn dedup(&self, records: Vec<PositionRecord>) -> Vec<PositionRecord> {
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut kept: Vec<PositionRecord> = Vec::new();

        for mut record in records {
            record.variety = record.variety.trim().to_string();
            if record.variety.is_empty() {
                continue;
            }

            let key = (record.seat.clone(), record.variety.clone());
            match index.get(&key) {
                Some(&i) => {
                    if self.options.precedence.replaces(kept[i].source, record.source) {
                        kept[i] = record;
                    }
                }
                None => {
                    index.insert(key, kept.len());
                    kept.push(record);
                }
            }
        }

        kept
    }
}
