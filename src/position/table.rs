//! 描画済みテーブルからの行抽出（API応答が取れなかった場合のフォールバック）

use tracing::debug;

use super::types::{RawRow, RawValue, Source};

/// ヘッダ行と判定するセル文字列
const HEADER_MARKERS: &[&str] = &["品种", "合约", "多头", "空头"];

/// テーブル1つ分のスナップショット（行 → セル文字列）
pub type TableSnapshot = Vec<Vec<String>>;

/// ページ内の全 `<table>` をセル文字列の3次元配列で返すスクリプト
pub const TABLE_SNAPSHOT_SCRIPT: &str = r#"
    (() => {
        const tables = [];
        document.querySelectorAll('table').forEach(table => {
            const rows = [];
            table.querySelectorAll('tr').forEach(row => {
                const cells = [];
                row.querySelectorAll('td, th').forEach(cell => cells.push(cell.innerText.trim()));
                rows.push(cells);
            });
            tables.push(rows);
        });
        return JSON.stringify(tables);
    })()
"#;

fn is_header_row(index: usize, cells: &[String]) -> bool {
    index == 0
        || cells
            .iter()
            .any(|cell| HEADER_MARKERS.iter().any(|marker| cell.contains(marker)))
}

/// テーブルスナップショットから行を抽出
///
/// 直近のヘッダ行のセル文字列を列ラベルとし、以降の行を位置で対応付ける。
/// 値の正規化はここでは行わない。
pub fn extract_table_rows(tables: &[TableSnapshot], seat: &str) -> Vec<RawRow> {
    let mut rows = Vec::new();

    for table in tables {
        let mut headers: Option<&[String]> = None;

        for (index, cells) in table.iter().enumerate() {
            if cells.is_empty() {
                continue;
            }

            if is_header_row(index, cells) {
                headers = Some(cells.as_slice());
                continue;
            }

            let Some(headers) = headers else {
                continue;
            };

            let mut row = RawRow::new(seat, Source::DomTable);
            for (label, text) in headers.iter().zip(cells.iter()) {
                row.insert(label.clone(), RawValue::Text(text.clone()));
            }
            rows.push(row);
        }
    }

    debug!("Extracted {} table rows for {}", rows.len(), seat);
    rows
}
