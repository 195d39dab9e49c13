//! API応答JSONの正規化
//!
//! `data` の形はエンドポイントごとに異なる:
//! - 配列: 要素ひとつが1行
//! - オブジェクト: 配列値のエントリを走査し、キーを方向ラベルとして付与
//!
//! 各フィールドは別名リストを先頭から試し、最初に存在する非nullの値を採用する。

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::debug;

use super::types::{label, ContractRef, RawRow, RawValue, SiteMetadata, Source, VarietyRef};

/// 正規フィールド → 元キーの別名リスト
struct FieldAliases {
    variety: &'static [&'static str],
    contract: &'static [&'static str],
    long_position: &'static [&'static str],
    long_change: &'static [&'static str],
    short_position: &'static [&'static str],
    short_change: &'static [&'static str],
    net_position: &'static [&'static str],
    net_change: &'static [&'static str],
}

/// 席位ページ（broker=...）の応答
const SEAT_ALIASES: FieldAliases = FieldAliases {
    variety: &["variety", "varietyName", "name"],
    contract: &["code", "contract"],
    long_position: &["buy", "long"],
    long_change: &["buy_chge", "buyChg"],
    short_position: &["ss", "sell", "short"],
    short_change: &["ss_chge", "sellChg"],
    net_position: &["net"],
    net_change: &["net_chge", "netChg"],
};

/// 品種ページ（variety=...）の応答
const VARIETY_ALIASES: FieldAliases = FieldAliases {
    variety: &["variety", "symbol"],
    contract: &["code", "contract"],
    long_position: &["long", "buy", "long_position"],
    long_change: &["long_chg", "buy_chg"],
    short_position: &["short", "sell", "short_position"],
    short_change: &["short_chg", "sell_chg"],
    net_position: &["net", "net_position"],
    net_change: &["net_chg", "net_chge"],
};

const MEMBER_KEYS: &[&str] = &["broker", "member", "participant_name"];

/// 応答の対象（URLパラメータから決まる）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// 席位名（broker=）
    Seat(String),
    /// 品種シンボル（variety=）
    Variety(String),
}

/// 別名リストを先頭から試す
fn resolve<'a>(item: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .find(|value| !value.is_null())
}

fn resolve_text(item: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let text = match resolve(item, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// JSONレコード正規化
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    target_seats: HashSet<String>,
    /// 品種シンボル（大文字） → 表示名
    variety_names: HashMap<String, String>,
}

impl RecordNormalizer {
    pub fn new<S, V>(target_seats: S, varieties: V) -> Self
    where
        S: IntoIterator<Item = String>,
        V: IntoIterator<Item = (String, String)>,
    {
        Self {
            target_seats: target_seats.into_iter().collect(),
            variety_names: varieties
                .into_iter()
                .map(|(name, symbol)| (symbol.to_ascii_uppercase(), name))
                .collect(),
        }
    }

    pub fn is_target_seat(&self, seat: &str) -> bool {
        self.target_seats.contains(seat)
    }

    /// `data` ペイロードから行を抽出
    pub fn normalize(&self, subject: &Subject, data: &Value) -> Vec<RawRow> {
        if let Subject::Seat(seat) = subject {
            if !self.is_target_seat(seat) {
                debug!("Skipping response for non-target seat: {}", seat);
                return Vec::new();
            }
        }

        let mut rows = Vec::new();
        match data {
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_object) {
                    rows.extend(self.build_row(subject, item, None));
                }
            }
            Value::Object(groups) => {
                for (key, value) in groups {
                    let Value::Array(items) = value else {
                        continue;
                    };
                    for item in items.iter().filter_map(Value::as_object) {
                        rows.extend(self.build_row(subject, item, Some(key.as_str())));
                    }
                }
            }
            _ => debug!("Unexpected data shape for {:?}", subject),
        }
        rows
    }

    fn build_row(
        &self,
        subject: &Subject,
        item: &Map<String, Value>,
        direction: Option<&str>,
    ) -> Option<RawRow> {
        let (seat, variety, aliases) = match subject {
            Subject::Seat(seat) => (
                seat.clone(),
                resolve_text(item, SEAT_ALIASES.variety),
                &SEAT_ALIASES,
            ),
            Subject::Variety(symbol) => {
                let seat = resolve_text(item, MEMBER_KEYS)?;
                if !self.is_target_seat(&seat) {
                    return None;
                }
                let variety = self
                    .variety_names
                    .get(&symbol.to_ascii_uppercase())
                    .cloned()
                    .or_else(|| resolve_text(item, VARIETY_ALIASES.variety));
                (seat, variety, &VARIETY_ALIASES)
            }
        };
        let variety = variety?;

        let mut row = RawRow::new(seat, Source::ApiJson).with_text(label::VARIETY, variety);

        if let Some(direction) = direction {
            row.insert(label::DIRECTION, RawValue::Text(direction.to_string()));
        }

        let fields = [
            (label::CONTRACT, aliases.contract),
            (label::LONG_POSITION, aliases.long_position),
            (label::LONG_CHANGE, aliases.long_change),
            (label::SHORT_POSITION, aliases.short_position),
            (label::SHORT_CHANGE, aliases.short_change),
            (label::NET_POSITION, aliases.net_position),
            (label::NET_CHANGE, aliases.net_change),
        ];
        for (name, keys) in fields {
            if let Some(value) = resolve(item, keys) {
                row.insert(name, RawValue::from_json(value));
            }
        }

        Some(row)
    }
}

fn objects<'a>(decoded: &'a Value, key: &str) -> Vec<&'a Map<String, Value>> {
    decoded
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

/// 復号済み search ペイロードから参照リストを抽出
pub fn extract_site_metadata(decoded: &Value) -> SiteMetadata {
    let varieties = objects(decoded, "varieties")
        .into_iter()
        .filter_map(|v| {
            Some(VarietyRef {
                symbol: resolve_text(v, &["symbol"])?,
                name: resolve_text(v, &["name"])?,
            })
        })
        .collect();

    let contracts = objects(decoded, "contracts")
        .into_iter()
        .filter_map(|c| {
            Some(ContractRef {
                code: resolve_text(c, &["code"])?,
                name: resolve_text(c, &["name"]).unwrap_or_default(),
            })
        })
        .collect();

    let brokers = objects(decoded, "brokers")
        .into_iter()
        .filter_map(|b| resolve_text(b, &["name"]))
        .collect();

    SiteMetadata {
        varieties,
        contracts,
        brokers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::new(
            vec!["中信期货".to_string(), "国泰君安".to_string()],
            vec![("螺纹钢".to_string(), "RB".to_string())],
        )
    }

    fn seat(name: &str) -> Subject {
        Subject::Seat(name.to_string())
    }

    #[test]
    fn test_list_data_one_row_per_object() {
        let data = json!([
            {"variety": "螺纹钢", "code": "rb2501", "buy": 300, "ss": 100, "net": 200},
            {"varietyName": "铁矿石", "net": -50},
            "not an object"
        ]);
        let rows = normalizer().normalize(&seat("中信期货"), &data);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seat, "中信期货");
        assert_eq!(rows[0].source, Source::ApiJson);
        assert_eq!(
            rows[0].cells[label::CONTRACT],
            RawValue::Text("rb2501".to_string())
        );
        assert_eq!(rows[0].cells[label::LONG_POSITION], RawValue::Number(300));
        assert_eq!(rows[0].cells[label::SHORT_POSITION], RawValue::Number(100));
        assert_eq!(
            rows[1].cells[label::VARIETY],
            RawValue::Text("铁矿石".to_string())
        );
        assert!(!rows[1].cells.contains_key(label::DIRECTION));
    }

    #[test]
    fn test_variety_alias_precedence() {
        let data = json!([{"variety": "螺纹钢", "varietyName": "热卷", "name": "焦炭"}]);
        let rows = normalizer().normalize(&seat("中信期货"), &data);
        assert_eq!(
            rows[0].cells[label::VARIETY],
            RawValue::Text("螺纹钢".to_string())
        );
    }

    #[test]
    fn test_alias_skips_null_but_keeps_zero() {
        let data = json!([{"variety": null, "name": "焦炭", "buy": 0, "long": 9}]);
        let rows = normalizer().normalize(&seat("中信期货"), &data);
        assert_eq!(
            rows[0].cells[label::VARIETY],
            RawValue::Text("焦炭".to_string())
        );
        assert_eq!(rows[0].cells[label::LONG_POSITION], RawValue::Number(0));
    }

    #[test]
    fn test_dict_data_uses_key_as_direction() {
        let data = json!({
            "long": [{"variety": "螺纹钢", "net": 10}],
            "short": [{"variety": "豆粕", "net": 20}, {"code": "m2505"}],
            "total": 3
        });
        let rows = normalizer().normalize(&seat("国泰君安"), &data);
        assert_eq!(rows.len(), 2);
        let directions: Vec<_> = rows
            .iter()
            .map(|r| r.cells[label::DIRECTION].to_string())
            .collect();
        assert!(directions.contains(&"long".to_string()));
        assert!(directions.contains(&"short".to_string()));
    }

    #[test]
    fn test_row_without_variety_dropped() {
        let data = json!([{"code": "rb2501", "net": 5}]);
        assert!(normalizer().normalize(&seat("中信期货"), &data).is_empty());
    }

    #[test]
    fn test_non_target_seat_dropped() {
        let data = json!([{"variety": "螺纹钢"}]);
        assert!(normalizer().normalize(&seat("永安期货"), &data).is_empty());
    }

    #[test]
    fn test_variety_subject_takes_seat_from_item() {
        let data = json!([
            {"broker": "中信期货", "long": 10, "short": 4, "long_chg": 1},
            {"member": "永安期货", "long": 1},
            {"long": 3}
        ]);
        let rows = normalizer().normalize(&Subject::Variety("rb".to_string()), &data);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seat, "中信期货");
        assert_eq!(
            rows[0].cells[label::VARIETY],
            RawValue::Text("螺纹钢".to_string())
        );
        assert_eq!(rows[0].cells[label::LONG_CHANGE], RawValue::Number(1));
    }

    #[test]
    fn test_scalar_data_yields_nothing() {
        assert!(normalizer()
            .normalize(&seat("中信期货"), &json!("abc"))
            .is_empty());
    }

    #[test]
    fn test_extract_site_metadata() {
        let decoded = json!({
            "varieties": [{"symbol": "RB", "name": "螺纹钢"}, {"symbol": "HC"}],
            "contracts": [{"code": "rb2501", "name": "螺纹钢2501"}],
            "brokers": [{"name": "中信期货"}, {"id": 3}]
        });
        let metadata = extract_site_metadata(&decoded);
        assert_eq!(
            metadata.varieties,
            vec![VarietyRef {
                symbol: "RB".to_string(),
                name: "螺纹钢".to_string()
            }]
        );
        assert_eq!(metadata.contracts.len(), 1);
        assert_eq!(metadata.brokers, vec!["中信期货".to_string()]);
    }

    #[test]
    fn test_extract_site_metadata_wrong_shape() {
        assert!(extract_site_metadata(&json!([1, 2])).is_empty());
    }
}
