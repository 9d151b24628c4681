use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One row of the ERP data dictionary describing a single column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_code: String,
    pub type_code: String,
    pub length: u32,
    pub decimals: u32,
    pub title: String,
    pub description: String,
}

impl FieldSpec {
    /// Dictionary type rendered as `C(6)`, `N(12,2)` or `D(8)`.
    pub fn type_label(&self) -> String {
        let type_code = self.type_code.trim();
        if self.decimals > 0 {
            format!("{type_code}({},{})", self.length, self.decimals)
        } else {
            format!("{type_code}({})", self.length)
        }
    }

    /// Title and description collapsed into one label; identical values are
    /// emitted once so the prompt stays small.
    pub fn label(&self) -> String {
        let title = self.title.trim();
        let description = self.description.trim();

        match (title.is_empty(), description.is_empty()) {
            (true, true) => String::new(),
            (false, true) => title.to_string(),
            (true, false) => description.to_string(),
            (false, false) if title.eq_ignore_ascii_case(description) => title.to_string(),
            (false, false) => format!("{title} - {description}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub logical_table: String,
    pub physical_table: String,
    pub fields: Vec<FieldSpec>,
}

impl SchemaEntry {
    pub fn new(logical_table: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        let logical_table = logical_table.into();
        let physical_table = physical_table_name(&logical_table);
        Self { logical_table, physical_table, fields }
    }
}

/// Protheus physical naming: logical alias plus company `01` and suffix `0`.
pub fn physical_table_name(logical_table: &str) -> String {
    format!("{}010", logical_table.trim().to_ascii_uppercase())
}

/// Immutable, fully built view of the dictionary for a set of logical tables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    entries: BTreeMap<String, SchemaEntry>,
    missing_tables: Vec<String>,
    fetched_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(
        entries: Vec<SchemaEntry>,
        missing_tables: Vec<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.logical_table.clone(), entry))
            .collect::<BTreeMap<_, _>>();
        Self { entries, missing_tables, fetched_at }
    }

    pub fn get(&self, logical_table: &str) -> Option<&SchemaEntry> {
        self.entries.get(logical_table)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.values()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Logical tables for which the dictionary returned no fields.
    pub fn missing_tables(&self) -> &[String] {
        &self.missing_tables
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at >= ttl
    }

    /// Compact `table -> field -> "type, description"` form used verbatim in
    /// the SQL generation prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut output = String::new();
        for entry in self.entries.values() {
            let _ = writeln!(output, "{} ({}):", entry.logical_table, entry.physical_table);
            for field in &entry.fields {
                let label = field.label();
                if label.is_empty() {
                    let _ = writeln!(output, "  {}: {}", field.field_code, field.type_label());
                } else {
                    let _ = writeln!(
                        output,
                        "  {}: {}, {}",
                        field.field_code,
                        field.type_label(),
                        label
                    );
                }
            }
        }
        output.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{physical_table_name, FieldSpec, SchemaEntry, SchemaSnapshot};

    fn field(code: &str, type_code: &str, title: &str, description: &str) -> FieldSpec {
        FieldSpec {
            field_code: code.to_string(),
            type_code: type_code.to_string(),
            length: 6,
            decimals: 0,
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn label_deduplicates_matching_title_and_description() {
        assert_eq!(field("C5_NUM", "C", "Numero", "numero").label(), "Numero");
        assert_eq!(
            field("C5_EMISSAO", "D", "DT Emissao", "Data de emissao").label(),
            "DT Emissao - Data de emissao"
        );
        assert_eq!(field("C5_X", "C", "", "").label(), "");
    }

    #[test]
    fn type_label_includes_decimals_only_when_present() {
        let mut value = field("C6_VALOR", "N", "Valor", "Valor");
        value.length = 12;
        value.decimals = 2;
        assert_eq!(value.type_label(), "N(12,2)");
        assert_eq!(field("C5_NUM", "C", "", "").type_label(), "C(6)");
    }

    #[test]
    fn prompt_text_lists_tables_in_stable_order() {
        let fetched_at = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).single().expect("valid time");
        let snapshot = SchemaSnapshot::new(
            vec![
                SchemaEntry::new("SC5", vec![field("C5_NUM", "C", "Numero", "Numero do pedido")]),
                SchemaEntry::new("SA1", vec![field("A1_COD", "C", "Codigo", "Codigo")]),
            ],
            vec!["SB2".to_string()],
            fetched_at,
        );

        let text = snapshot.to_prompt_text();
        assert_eq!(
            text,
            "SA1 (SA1010):\n  A1_COD: C(6), Codigo\nSC5 (SC5010):\n  C5_NUM: C(6), Numero - Numero do pedido"
        );
        assert_eq!(snapshot.missing_tables(), ["SB2".to_string()]);
        assert_eq!(snapshot.table_names(), vec!["SA1", "SC5"]);
    }

    #[test]
    fn expiry_is_measured_from_fetch_time() {
        let fetched_at = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).single().expect("valid time");
        let snapshot = SchemaSnapshot::new(Vec::new(), Vec::new(), fetched_at);
        let ttl = Duration::seconds(3600);

        assert!(!snapshot.is_expired(fetched_at + Duration::seconds(3599), ttl));
        assert!(snapshot.is_expired(fetched_at + Duration::seconds(3600), ttl));
    }

    #[test]
    fn physical_name_appends_company_suffix() {
        assert_eq!(physical_table_name("sc5"), "SC5010");
    }
}
