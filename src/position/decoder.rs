//! search エンドポイントの圧縮ペイロード復号
//!
//! 形式: URL-safe base64（パディングなし）→ raw deflate（zlibヘッダなし）→ UTF-8 JSON

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("base64デコード失敗: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("deflate展開失敗: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("JSON解析失敗: {0}")]
    Json(#[from] serde_json::Error),
}

/// URL-safe 文字を標準 base64 に戻し、4の倍数になるまで `=` を補う
fn restore_base64(encoded: &str) -> String {
    let mut restored: String = encoded
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let remainder = restored.len() % 4;
    if remainder != 0 {
        restored.extend(std::iter::repeat('=').take(4 - remainder));
    }
    restored
}

/// 圧縮ペイロードを JSON に復号
///
/// 途中のどの段階で失敗しても部分結果は返さない。
pub fn decode_payload(encoded: &str) -> Result<serde_json::Value, DecodeError> {
    let compressed = STANDARD.decode(restore_base64(encoded))?;

    let mut json_text = String::new();
    DeflateDecoder::new(compressed.as_slice()).read_to_string(&mut json_text)?;

    Ok(serde_json::from_str(&json_text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use proptest::prelude::*;
    use serde_json::json;
    use std::io::Write;

    fn encode_payload(value: &serde_json::Value) -> String {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_string(value).unwrap().as_bytes())
            .unwrap();
        URL_SAFE_NO_PAD.encode(encoder.finish().unwrap())
    }

    #[test]
    fn test_restore_base64_padding() {
        assert_eq!(restore_base64("abcd"), "abcd");
        assert_eq!(restore_base64("abc"), "abc=");
        assert_eq!(restore_base64("ab"), "ab==");
        assert_eq!(restore_base64("a-_b"), "a+/b");
    }

    #[test]
    fn test_decode_search_payload() {
        let payload = json!({
            "varieties": [{"symbol": "RB", "name": "螺纹钢"}],
            "contracts": [{"code": "rb2501", "name": "螺纹钢2501"}],
            "brokers": [{"name": "中信期货"}]
        });
        let decoded = decode_payload(&encode_payload(&payload)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(matches!(
            decode_payload("!!!not base64!!!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_rejects_zlib_wrapped() {
        // zlib ヘッダ付きのデータは raw deflate としては壊れている
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"a\":1}").unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(encoder.finish().unwrap());
        assert!(decode_payload(&encoded).is_err());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all("净多".as_bytes()).unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(encoder.finish().unwrap());
        assert!(matches!(decode_payload(&encoded), Err(DecodeError::Json(_))));
    }

    fn arb_json() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z0-9螺纹钢净多空]{0,12}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6).prop_map(|m| {
                    serde_json::Value::Object(m.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(value in arb_json()) {
            let decoded = decode_payload(&encode_payload(&value)).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
