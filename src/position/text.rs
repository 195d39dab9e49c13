//! セル文字列の解析
//!
//! 表のセルは「净多12345\n(增999)」「300(+5)」のような複合文字列で返ってくる。
//! ここの関数はすべて全域関数で、マッチしない入力は `None` を返す（エラーではない）。

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::Direction;

/// 净持仓: 净 + 多/空 + 数値、続けて任意で (增/减 + 数値)
static NET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"净(多|空)([0-9]+)(?:\s*\n?\(?([增减])少?([0-9]+)\)?)?").expect("net regex")
});

/// 持仓: 数値 + (符号付き変化量)
static MAGNITUDE_WITH_CHANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)\s*\n?\(([+-]?[0-9]+)\)").expect("magnitude regex"));

static LEADING_DIGITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)").expect("digits regex"));

/// 合約コード: 英字 + 数字（rb2501 など）
static CONTRACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+[0-9]+)").expect("contract regex"));

/// 净持仓セルの解析結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetField {
    pub direction: Option<Direction>,
    pub magnitude: Option<i64>,
    /// 增なら正、减なら負。変化量の記載がなければ `None`
    pub change: Option<i64>,
}

impl NetField {
    pub fn is_match(&self) -> bool {
        self.direction.is_some()
    }
}

/// 持仓セルの解析結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MagnitudeField {
    pub value: Option<i64>,
    pub change: Option<i64>,
}

impl MagnitudeField {
    pub fn is_match(&self) -> bool {
        self.value.is_some()
    }
}

/// 全角数字を半角に揃える
fn ascii_digits(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| ('０'..='９').contains(&c)) {
        return Cow::Borrowed(text);
    }
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect::<String>()
        .into()
}

/// 净持仓セルを解析
pub fn parse_net(text: Option<&str>) -> NetField {
    let Some(text) = text.map(ascii_digits) else {
        return NetField::default();
    };

    let Some(caps) = NET_RE.captures(&text) else {
        return NetField::default();
    };

    let direction = Direction::from_glyph(&caps[1]);
    let Ok(magnitude) = caps[2].parse::<i64>() else {
        return NetField::default();
    };

    let change = match (caps.get(3), caps.get(4)) {
        (Some(glyph), Some(digits)) => match digits.as_str().parse::<i64>() {
            Ok(n) if glyph.as_str() == "增" => Some(n),
            Ok(n) => Some(-n),
            Err(_) => return NetField::default(),
        },
        _ => None,
    };

    NetField {
        direction: Some(direction),
        magnitude: Some(magnitude),
        change,
    }
}

/// 持仓セルを解析
///
/// 括弧付きの変化量がなければ先頭の数値だけを読み、変化量は 0 とする。
/// 括弧内が読めない（桁あふれ）場合の変化量は `None`。
pub fn parse_magnitude(text: Option<&str>) -> MagnitudeField {
    let Some(text) = text.map(|t| ascii_digits(t.trim_start())) else {
        return MagnitudeField::default();
    };

    if let Some(caps) = MAGNITUDE_WITH_CHANGE_RE.captures(&text) {
        let Ok(value) = caps[1].parse::<i64>() else {
            return MagnitudeField::default();
        };
        return MagnitudeField {
            value: Some(value),
            change: caps[2].trim_start_matches('+').parse::<i64>().ok(),
        };
    }

    LEADING_DIGITS_RE
        .captures(&text)
        .and_then(|caps| caps[1].parse::<i64>().ok())
        .map(|value| MagnitudeField {
            value: Some(value),
            change: Some(0),
        })
        .unwrap_or_default()
}

/// 合約コードを抽出
pub fn extract_contract(text: Option<&str>) -> Option<String> {
    let text = ascii_digits(text?.trim_start());
    CONTRACT_RE
        .captures(&text)
        .map(|caps| caps[1].to_string())
}
