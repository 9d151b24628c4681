//! Adaptive rendering of result sets.
//!
//! A one-row, one-column result becomes a metric; anything else becomes a
//! table. The interactive display carries more rows than the text persisted
//! in history because history is replayed into every later prompt.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::RenderConfig;
use crate::domain::result::{CellValue, ResultSet};

pub const NO_RECORDS_MARKER: &str = "No records found.";

/// Column names that always denote money.
const MONEY_KEYWORDS: &[&str] = &[
    "valor",
    "vlr",
    "preco",
    "preço",
    "prcven",
    "faturamento",
    "receita",
    "custo",
    "price",
    "revenue",
    "cost",
];

/// Aggregate names that denote money only for fractional values; an integer
/// `TOTAL_PEDIDOS` is a count.
const AGGREGATE_KEYWORDS: &[&str] = &["total", "amount", "value"];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayPayload {
    Text { text: String },
    Metric { label: String, value: String },
    Table { columns: Vec<String>, rows: Vec<Vec<CellValue>>, total_rows: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderedResult {
    pub display: DisplayPayload,
    pub history_text: String,
}

#[derive(Clone, Debug)]
pub struct AdaptiveRenderer {
    config: RenderConfig,
}

impl Default for AdaptiveRenderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

impl AdaptiveRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn render(&self, result: &ResultSet) -> RenderedResult {
        if result.is_empty() {
            return RenderedResult {
                display: DisplayPayload::Text { text: NO_RECORDS_MARKER.to_string() },
                history_text: NO_RECORDS_MARKER.to_string(),
            };
        }

        if let Some((label, value)) = result.scalar() {
            let value = self.format_scalar(label, value);
            return RenderedResult {
                history_text: format!("{label}: {value}"),
                display: DisplayPayload::Metric { label: label.to_string(), value },
            };
        }

        let display_rows =
            result.rows.iter().take(self.config.display_row_limit).cloned().collect::<Vec<_>>();

        RenderedResult {
            display: DisplayPayload::Table {
                columns: result.columns.clone(),
                rows: display_rows,
                total_rows: result.row_count(),
            },
            history_text: self.history_table(result),
        }
    }

    fn format_scalar(&self, label: &str, value: &CellValue) -> String {
        match value {
            _ if is_currency(label, value) => format_currency(value, &self.config.currency_symbol),
            CellValue::Integer(number) => group_thousands(&number.to_string()),
            CellValue::Float(_) => format_decimal(value).unwrap_or_else(|| value.to_string()),
            CellValue::Text(text) => text.trim_end().to_string(),
            CellValue::Null => "-".to_string(),
        }
    }

    fn history_table(&self, result: &ResultSet) -> String {
        let header = result.columns.iter().map(|column| escape_cell(column)).collect::<Vec<_>>();
        let mut lines = vec![
            format!("| {} |", header.join(" | ")),
            format!("|{}|", vec!["---"; result.columns.len()].join("|")),
        ];

        for row in result.rows.iter().take(self.config.history_row_limit) {
            let cells = row.iter().map(|cell| escape_cell(&cell.to_string())).collect::<Vec<_>>();
            lines.push(format!("| {} |", cells.join(" | ")));
        }

        let hidden = result.row_count().saturating_sub(self.config.history_row_limit);
        if hidden > 0 {
            lines.push(format!("... and {hidden} more rows"));
        }

        lines.join("\n")
    }
}

/// Whether a scalar is shown as money, judged by its column label.
pub fn is_currency(label: &str, value: &CellValue) -> bool {
    if !value.is_numeric() {
        return false;
    }
    let label = label.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|keyword| label.contains(keyword));

    let fractional = matches!(value, CellValue::Float(_));
    mentions(MONEY_KEYWORDS) || (fractional && mentions(AGGREGATE_KEYWORDS))
}

/// `R$ 1.500,00` style formatting with two decimal places. Values that have
/// no decimal form (non-finite floats) are returned literally.
pub fn format_currency(value: &CellValue, currency_symbol: &str) -> String {
    let Some(formatted) = format_decimal(value) else {
        return value.to_string();
    };
    if formatted.starts_with('-') {
        format!("-{currency_symbol} {}", &formatted[1..])
    } else {
        format!("{currency_symbol} {formatted}")
    }
}

fn format_decimal(value: &CellValue) -> Option<String> {
    let decimal = match value {
        CellValue::Integer(number) => Decimal::from(*number),
        CellValue::Float(number) => Decimal::from_f64_retain(*number)?,
        CellValue::Text(_) | CellValue::Null => return None,
    };

    let rounded = decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let plain = format!("{rounded:.2}");
    let (sign, digits) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain.as_str()),
    };
    let (integer, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    Some(format!("{sign}{},{fraction}", group_thousands(integer)))
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{sign}{grouped}")
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::{format_currency, is_currency, AdaptiveRenderer, DisplayPayload, NO_RECORDS_MARKER};
    use crate::config::RenderConfig;
    use crate::domain::result::{CellValue, ResultSet};

    fn renderer() -> AdaptiveRenderer {
        AdaptiveRenderer::new(RenderConfig::default())
    }

    #[test]
    fn monetary_scalar_renders_currency_metric() {
        let result =
            ResultSet::new(vec!["Total".to_string()], vec![vec![CellValue::Float(1500.0)]]);

        let rendered = renderer().render(&result);

        assert_eq!(
            rendered.display,
            DisplayPayload::Metric { label: "Total".to_string(), value: "R$ 1.500,00".to_string() }
        );
        assert_eq!(rendered.history_text, "Total: R$ 1.500,00");
    }

    #[test]
    fn count_scalar_renders_plain_number() {
        let result =
            ResultSet::new(vec!["QTD_PEDIDOS".to_string()], vec![vec![CellValue::Integer(12345)]]);

        let rendered = renderer().render(&result);

        assert_eq!(rendered.history_text, "QTD_PEDIDOS: 12.345");
        assert!(matches!(rendered.display, DisplayPayload::Metric { .. }));
    }

    #[test]
    fn text_scalar_is_rendered_literally() {
        let result = ResultSet::new(
            vec!["A1_NOME".to_string()],
            vec![vec![CellValue::Text("MERCADO CENTRAL   ".to_string())]],
        );
        assert_eq!(renderer().render(&result).history_text, "A1_NOME: MERCADO CENTRAL");
    }

    #[test]
    fn empty_result_renders_marker_not_table() {
        let result = ResultSet::new(vec!["C5_NUM".to_string()], Vec::new());

        let rendered = renderer().render(&result);

        assert_eq!(rendered.display, DisplayPayload::Text { text: NO_RECORDS_MARKER.to_string() });
        assert_eq!(rendered.history_text, NO_RECORDS_MARKER);
    }

    #[test]
    fn history_is_truncated_while_display_keeps_more_rows() {
        let rows = (0..30)
            .map(|index| vec![CellValue::Integer(index), CellValue::Text(format!("item {index}"))])
            .collect::<Vec<_>>();
        let result = ResultSet::new(vec!["C6_ITEM".to_string(), "C6_DESCRI".to_string()], rows);

        let rendered = renderer().render(&result);

        let DisplayPayload::Table { rows, total_rows, .. } = &rendered.display else {
            panic!("expected table payload");
        };
        assert_eq!(rows.len(), 30);
        assert_eq!(*total_rows, 30);

        let data_lines = rendered.history_text.lines().filter(|line| line.starts_with("| ")).count();
        assert_eq!(data_lines, 21, "header plus 20 rows");
        assert!(rendered.history_text.ends_with("... and 10 more rows"));
    }

    #[test]
    fn display_rows_are_capped() {
        let rows = (0..80).map(|index| vec![CellValue::Integer(index), CellValue::Null]).collect();
        let result = ResultSet::new(vec!["A".to_string(), "B".to_string()], rows);

        let rendered = renderer().render(&result);

        let DisplayPayload::Table { rows, total_rows, .. } = rendered.display else {
            panic!("expected table payload");
        };
        assert_eq!(rows.len(), 50);
        assert_eq!(total_rows, 80);
    }

    #[test]
    fn small_table_has_no_truncation_note() {
        let result = ResultSet::new(
            vec!["A1_COD".to_string(), "A1_NOME".to_string()],
            vec![
                vec![CellValue::Text("000001".to_string()), CellValue::Text("A|B".to_string())],
                vec![CellValue::Text("000002".to_string()), CellValue::Null],
            ],
        );

        let rendered = renderer().render(&result);

        assert_eq!(
            rendered.history_text,
            "| A1_COD | A1_NOME |\n|---|---|\n| 000001 | A\\|B |\n| 000002 |  |"
        );
    }

    #[test]
    fn currency_formatting_handles_rounding_and_sign() {
        assert_eq!(format_currency(&CellValue::Float(1234567.891), "R$"), "R$ 1.234.567,89");
        assert_eq!(format_currency(&CellValue::Float(-42.5), "R$"), "-R$ 42,50");
        assert_eq!(format_currency(&CellValue::Integer(0), "R$"), "R$ 0,00");
        assert_eq!(format_currency(&CellValue::Integer(999), "US$"), "US$ 999,00");
    }

    #[test]
    fn money_keywords_match_case_insensitively() {
        assert!(is_currency("Total", &CellValue::Float(10.5)));
        assert!(is_currency("VALOR_FATURADO", &CellValue::Integer(1500)));
        assert!(is_currency("C6_PRCVEN", &CellValue::Float(18.9)));
        assert!(!is_currency("QTD_PEDIDOS", &CellValue::Integer(3)));
        assert!(!is_currency("VALOR", &CellValue::Text("abc".to_string())));
    }

    #[test]
    fn integer_total_count_is_not_currency() {
        let result =
            ResultSet::new(vec!["TOTAL_PEDIDOS".to_string()], vec![vec![CellValue::Integer(3)]]);

        let rendered = renderer().render(&result);

        assert_eq!(
            rendered.display,
            DisplayPayload::Metric { label: "TOTAL_PEDIDOS".to_string(), value: "3".to_string() }
        );

        let valor =
            ResultSet::new(vec!["VALOR_TOTAL".to_string()], vec![vec![CellValue::Integer(1500)]]);
        assert_eq!(renderer().render(&valor).history_text, "VALOR_TOTAL: R$ 1.500,00");
    }

    #[test]
    fn non_finite_values_are_shown_literally() {
        assert_eq!(format_currency(&CellValue::Float(f64::NAN), "R$"), "NaN");
        assert_eq!(format_currency(&CellValue::Float(f64::INFINITY), "R$"), "inf");

        let result = ResultSet::new(
            vec!["MEDIA_VALOR".to_string()],
            vec![vec![CellValue::Float(f64::INFINITY)]],
        );
        assert_eq!(renderer().render(&result).history_text, "MEDIA_VALOR: inf");

        let ratio =
            ResultSet::new(vec!["RAZAO".to_string()], vec![vec![CellValue::Float(f64::NAN)]]);
        assert_eq!(renderer().render(&ratio).history_text, "RAZAO: NaN");
    }
}
