//! Declarative Protheus conventions.
//!
//! The catalog renders the business-rule text injected into the SQL
//! generation prompt and backs a post-generation check that looks for the
//! soft-deletion and branch predicates the model was told to include.

use std::fmt::Write as _;

use serde::Serialize;

use crate::sql_guard::word_tokens;

pub const SOFT_DELETE_FIELD: &str = "D_E_L_E_T_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    /// Mode `C`: rows are shared by every branch.
    Shared,
    /// Mode `E`: rows belong to one branch.
    Exclusive,
}

impl TableMode {
    pub fn code(&self) -> char {
        match self {
            Self::Shared => 'C',
            Self::Exclusive => 'E',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:1")]
    ManyToOne,
}

impl Cardinality {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OneToMany => "1:N",
            Self::ManyToOne => "N:1",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub target: String,
    pub source_fields: Vec<String>,
    pub target_fields: Vec<String>,
    pub cardinality: Cardinality,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableRule {
    pub alias: String,
    pub description: String,
    pub physical_table: String,
    pub mode: TableMode,
    pub unique_key: Vec<String>,
    pub relationships: Vec<Relationship>,
}

impl TableRule {
    /// Column prefix: `SA1` -> `A1`; aliases outside the `S` family keep
    /// their full name.
    pub fn field_prefix(&self) -> String {
        let alias = self.alias.to_ascii_uppercase();
        match alias.strip_prefix('S') {
            Some(rest) if rest.len() == 2 => rest.to_string(),
            _ => alias,
        }
    }

    pub fn branch_field(&self) -> String {
        format!("{}_FILIAL", self.field_prefix())
    }

    pub fn branch_predicate(&self, default_branch: &str) -> String {
        match self.mode {
            TableMode::Shared => format!("{} = ''", self.branch_field()),
            TableMode::Exclusive => format!("{} = '{default_branch}'", self.branch_field()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleFinding {
    MissingSoftDeleteFilter { expected: usize, found: usize },
    MissingBranchFilter { table: String, predicate: String },
}

impl RuleFinding {
    pub fn message(&self) -> String {
        match self {
            Self::MissingSoftDeleteFilter { expected, found } => format!(
                "expected a `{SOFT_DELETE_FIELD} = ' '` filter for each of {expected} table(s), found {found}"
            ),
            Self::MissingBranchFilter { table, predicate } => {
                format!("{table} is queried without a branch filter (expected `{predicate}`)")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessRules {
    default_branch: String,
    tables: Vec<TableRule>,
    override_text: Option<String>,
}

impl BusinessRules {
    pub fn new(default_branch: impl Into<String>, tables: Vec<TableRule>) -> Self {
        Self { default_branch: default_branch.into(), tables, override_text: None }
    }

    /// Replaces the generated prompt text. Predicate checks still use the
    /// catalog.
    pub fn with_override_text(mut self, text: impl Into<String>) -> Self {
        self.override_text = Some(text.into());
        self
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn tables(&self) -> &[TableRule] {
        &self.tables
    }

    pub fn table(&self, alias: &str) -> Option<&TableRule> {
        self.tables.iter().find(|table| table.alias.eq_ignore_ascii_case(alias))
    }

    pub fn protheus_default(default_branch: impl Into<String>) -> Self {
        let tables = vec![
            table(
                "SA1",
                "Customers",
                TableMode::Shared,
                &["A1_FILIAL", "A1_COD", "A1_LOJA"],
                vec![
                    one_to_many("SC5", &["A1_COD", "A1_LOJA"], &["C5_CLIENTE", "C5_LOJACLI"]),
                    one_to_many("SF2", &["A1_COD", "A1_LOJA"], &["F2_CLIENTE", "F2_LOJA"]),
                ],
            ),
            table(
                "SA2",
                "Suppliers",
                TableMode::Shared,
                &["A2_FILIAL", "A2_COD", "A2_LOJA"],
                vec![
                    one_to_many("SF2", &["A2_COD", "A2_LOJA"], &["F2_CLIENTE", "F2_LOJA"]),
                    one_to_many("SC5", &["A2_COD"], &["C5_FORNISS"]),
                ],
            ),
            table(
                "SB1",
                "Products",
                TableMode::Shared,
                &["B1_COD"],
                vec![
                    one_to_many("SC6", &["B1_COD"], &["C6_PRODUTO"]),
                    one_to_many("SD2", &["B1_COD"], &["D2_COD"]),
                ],
            ),
            table(
                "SB2",
                "Stock balances",
                TableMode::Exclusive,
                &["B2_FILIAL", "B2_COD", "B2_LOCAL"],
                Vec::new(),
            ),
            table(
                "SC5",
                "Sales orders (header)",
                TableMode::Exclusive,
                &["C5_FILIAL", "C5_NUM"],
                vec![one_to_many("SC6", &["C5_NUM"], &["C6_NUM"])],
            ),
            table(
                "SC6",
                "Sales order items",
                TableMode::Exclusive,
                &["C6_FILIAL", "C6_NUM", "C6_ITEM"],
                Vec::new(),
            ),
            table(
                "SF2",
                "Outbound invoices (header)",
                TableMode::Exclusive,
                &["F2_FILIAL", "F2_DOC", "F2_SERIE"],
                vec![one_to_many(
                    "SD2",
                    &["F2_DOC", "F2_SERIE", "F2_CLIENTE", "F2_LOJA"],
                    &["D2_DOC", "D2_SERIE", "D2_CLIENTE", "D2_LOJA"],
                )],
            ),
            table(
                "SD2",
                "Outbound invoice items",
                TableMode::Exclusive,
                &["D2_FILIAL", "D2_DOC", "D2_ITEM"],
                Vec::new(),
            ),
        ];

        Self::new(default_branch, tables)
    }

    /// Rule text for the generation prompt.
    pub fn prompt_text(&self) -> String {
        if let Some(text) = &self.override_text {
            return text.clone();
        }

        let branch = &self.default_branch;
        let mut text = String::new();

        text.push_str("# BUSINESS RULES - TOTVS PROTHEUS\n\n");
        text.push_str(
            "You are a specialist in the TOTVS Protheus ERP and only answer requests for data.\n\
             Translate each request into a correct SQL Server (T-SQL) SELECT statement that\n\
             follows Protheus conventions.\n\n",
        );

        text.push_str("## General principles\n\n");
        let _ = writeln!(text, "1. Generate only SELECT statements. Never UPDATE, DELETE, INSERT or DDL.");
        let _ = writeln!(text, "2. Always filter soft-deleted rows: `{SOFT_DELETE_FIELD} = ' '` on every table.");
        let _ = writeln!(text, "3. Default branch: '{branch}'.");
        let _ = writeln!(text, "4. The branch field depends on the table mode (see branch rules).");
        let _ = writeln!(text, "5. Join only through the keys listed below. Never invent joins.");
        let _ = writeln!(text, "6. Return the SQL inside a ```sql fenced block.");
        let _ = writeln!(text, "7. Use only fields listed in the data dictionary.");
        let _ = writeln!(text, "8. Always use physical table names (suffix 010).");
        let _ = writeln!(text, "9. Dates are stored as `YYYYMMDD` text (e.g. `C5_EMISSAO = '20240131'`).\n");

        text.push_str("## Logical tables\n\n");
        text.push_str("| Alias | Description | Physical table | Mode | Unique key |\n");
        text.push_str("|-------|-------------|----------------|------|------------|\n");
        for table in &self.tables {
            let _ = writeln!(
                text,
                "| {} | {} | {} | {} | {} |",
                table.alias,
                table.description,
                table.physical_table,
                table.mode.code(),
                table.unique_key.join(", ")
            );
        }

        text.push_str("\n## Join keys\n\n");
        for table in &self.tables {
            for relation in &table.relationships {
                let _ = writeln!(
                    text,
                    "- {} -> {} ({}): {} = {}",
                    table.alias,
                    relation.target,
                    relation.cardinality.label(),
                    relation.source_fields.join(" + "),
                    relation.target_fields.join(" + ")
                );
            }
        }

        text.push_str("\n## Branch rules\n\n");
        text.push_str("- Mode C (shared): `<prefix>_FILIAL = ''`\n");
        let _ = writeln!(text, "- Mode E (exclusive): `<prefix>_FILIAL = '{branch}'`");
        for table in &self.tables {
            let _ = writeln!(text, "- {}: `{}`", table.alias, table.branch_predicate(branch));
        }

        text.push_str("\n## Query guidance\n\n");
        text.push_str(
            "1. Prefer header tables over item tables (orders -> SC5, not SC6).\n\
             2. For \"latest\" records, order by date descending (e.g. C5_EMISSAO DESC).\n\
             3. When the user mentions a customer, relate to SA1.\n\
             4. For products of an order, relate SC5 -> SC6 -> SB1.\n\
             5. For invoices use SF2, adding SD2 only for items.\n\
             6. Avoid unnecessary joins.\n",
        );

        text.push_str("\n## Physical names\n\n");
        for table in &self.tables {
            let _ = writeln!(text, "{} -> {}", table.alias, table.physical_table);
        }

        text
    }

    /// Textual check for the predicates the rules require on every catalogued
    /// table the statement references.
    pub fn check(&self, sql: &str) -> Vec<RuleFinding> {
        let upper = sql.to_uppercase();
        let tokens = word_tokens(&upper);

        let referenced = self
            .tables
            .iter()
            .filter(|table| tokens.contains(&table.physical_table.as_str()))
            .collect::<Vec<_>>();
        if referenced.is_empty() {
            return Vec::new();
        }

        let mut findings = Vec::new();

        let soft_delete_filters = tokens.iter().filter(|token| **token == SOFT_DELETE_FIELD).count();
        if soft_delete_filters < referenced.len() {
            findings.push(RuleFinding::MissingSoftDeleteFilter {
                expected: referenced.len(),
                found: soft_delete_filters,
            });
        }

        for table in referenced {
            let branch_field = table.branch_field();
            if !tokens.contains(&branch_field.as_str()) {
                findings.push(RuleFinding::MissingBranchFilter {
                    table: table.physical_table.clone(),
                    predicate: table.branch_predicate(&self.default_branch),
                });
            }
        }

        findings
    }
}

fn table(
    alias: &str,
    description: &str,
    mode: TableMode,
    unique_key: &[&str],
    relationships: Vec<Relationship>,
) -> TableRule {
    TableRule {
        alias: alias.to_string(),
        description: description.to_string(),
        physical_table: format!("{alias}010"),
        mode,
        unique_key: unique_key.iter().map(|field| (*field).to_string()).collect(),
        relationships,
    }
}

fn one_to_many(target: &str, source_fields: &[&str], target_fields: &[&str]) -> Relationship {
    Relationship {
        target: target.to_string(),
        source_fields: source_fields.iter().map(|field| (*field).to_string()).collect(),
        target_fields: target_fields.iter().map(|field| (*field).to_string()).collect(),
        cardinality: Cardinality::OneToMany,
    }
}
