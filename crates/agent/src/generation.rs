//! Grounded SQL generation: prompt assembly and candidate extraction.

use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tera::{Context, Tera};
use tracing::{debug, warn};

use askerp_core::domain::schema::SchemaSnapshot;
use askerp_core::errors::PipelineError;
use askerp_core::rules::BusinessRules;

use crate::llm::LlmClient;

pub const SQL_TEMPLATE: &str = "sql_generation.txt";
pub const CONVERSATION_TEMPLATE: &str = "conversation.txt";

/// Prompt templates shared by generation and conversational replies.
pub fn prompt_templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template(SQL_TEMPLATE, include_str!("../templates/sql_generation.txt"))?;
    tera.add_raw_template(CONVERSATION_TEMPLATE, include_str!("../templates/conversation.txt"))?;
    Ok(tera)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub candidates: Vec<String>,
    /// Completion text outside the SQL blocks.
    pub preamble: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub raw_text: String,
    pub extraction: Extraction,
}

pub struct PromptInputs<'a> {
    pub schema: &'a SchemaSnapshot,
    pub today: NaiveDate,
    pub history: &'a str,
    pub question: &'a str,
}

pub struct SqlGenerator {
    llm: Arc<dyn LlmClient>,
    rules: Arc<BusinessRules>,
    templates: Arc<Tera>,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, rules: Arc<BusinessRules>, templates: Arc<Tera>) -> Self {
        Self { llm, rules, templates }
    }

    pub fn build_prompt(&self, inputs: &PromptInputs<'_>) -> Result<String, PipelineError> {
        let mut context = Context::new();
        context.insert("rules", &self.rules.prompt_text());
        context.insert("schema", &inputs.schema.to_prompt_text());
        context.insert("today", &inputs.today.format("%Y-%m-%d").to_string());
        context.insert("history", inputs.history);
        context.insert("question", inputs.question);

        self.templates
            .render(SQL_TEMPLATE, &context)
            .map_err(|error| PipelineError::Internal(format!("prompt rendering failed: {error}")))
    }

    pub async fn generate(&self, inputs: &PromptInputs<'_>) -> Result<Generation, PipelineError> {
        let prompt = self.build_prompt(inputs)?;
        let raw_text = self.llm.complete(&prompt).await.map_err(|error| {
            warn!(event_name = "sql.generate.failed", error = %error, "generation call failed");
            PipelineError::Generation(error.to_string())
        })?;

        let extraction = extract_sql(&raw_text);
        debug!(
            event_name = "sql.generated",
            candidates = extraction.candidates.len(),
            has_preamble = !extraction.preamble.is_empty(),
            "completion parsed"
        );
        Ok(Generation { raw_text, extraction })
    }
}

/// Fence tags whose body is read as SQL.
const SQL_TAGS: &[&str] = &["sql", "tsql", "t-sql", "mssql", "sqlserver", "sqlite"];

/// Languages recognised as a tag even on a one-line fence.
const OTHER_TAGS: &[&str] = &[
    "json", "python", "py", "bash", "sh", "shell", "text", "txt", "markdown", "md", "csv", "yaml",
    "xml", "javascript", "js",
];

/// First words of a statement; never read as a fence tag.
const STATEMENT_WORDS: &[&str] = &["select", "with"];

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```(.*?)```").ok()).as_ref()
}

fn info_string_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[ \t]*([A-Za-z0-9_+#.-]+)[ \t]*(\r?\n)?").ok())
        .as_ref()
}

/// Body of a fenced block when it holds SQL, `None` for another language.
///
/// The word after the opening backticks is a tag when it is a known language
/// or when a newline follows it; otherwise it is the start of the body.
fn sql_body(inner: &str) -> Option<&str> {
    let Some(captures) = info_string_pattern().and_then(|pattern| pattern.captures(inner)) else {
        return Some(inner);
    };
    let (Some(info), Some(word)) = (captures.get(0), captures.get(1)) else {
        return Some(inner);
    };
    let tag = word.as_str().to_ascii_lowercase();

    if SQL_TAGS.contains(&tag.as_str()) {
        return Some(&inner[info.end()..]);
    }
    if STATEMENT_WORDS.contains(&tag.as_str()) {
        return Some(inner);
    }
    if OTHER_TAGS.contains(&tag.as_str()) || captures.get(2).is_some() {
        return None;
    }
    Some(inner)
}

/// Splits a completion into SQL candidates and leftover prose.
///
/// Untagged fenced blocks and blocks tagged with a SQL dialect are
/// candidates. Blocks in other languages stay in the preamble verbatim. When
/// the completion has no fence at all but starts with `SELECT`, the whole text
/// is one candidate.
pub fn extract_sql(completion: &str) -> Extraction {
    let mut candidates = Vec::new();
    let mut prose = String::new();
    let mut last_end = 0;
    let mut saw_fence = false;

    let fences =
        fence_pattern().into_iter().flat_map(|pattern| pattern.captures_iter(completion));
    for captures in fences {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else { continue };
        saw_fence = true;
        prose.push_str(&completion[last_end..whole.start()]);
        last_end = whole.end();

        match sql_body(inner.as_str()).map(str::trim) {
            Some(body) => {
                if !body.is_empty() {
                    candidates.push(body.to_string());
                }
            }
            None => {
                prose.push('\n');
                prose.push_str(whole.as_str());
            }
        }
        prose.push('\n');
    }
    prose.push_str(&completion[last_end..]);

    if !saw_fence {
        let trimmed = completion.trim();
        let starts_with_select = trimmed
            .get(..6)
            .map(|head| head.eq_ignore_ascii_case("select"))
            .unwrap_or(false);
        if starts_with_select {
            return Extraction { candidates: vec![trimmed.to_string()], preamble: String::new() };
        }
    }

    Extraction { candidates, preamble: collapse_blank_lines(&prose) }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() && lines.last().map_or(true, |last: &&str| last.is_empty()) {
            continue;
        }
        lines.push(if line.trim().is_empty() { "" } else { line });
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};

    use askerp_core::domain::schema::{FieldSpec, SchemaEntry, SchemaSnapshot};
    use askerp_core::errors::PipelineError;
    use askerp_core::rules::BusinessRules;

    use super::{extract_sql, prompt_templates, PromptInputs, SqlGenerator};
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn snapshot() -> SchemaSnapshot {
        let fetched_at = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).single().expect("valid time");
        let field = FieldSpec {
            field_code: "C5_EMISSAO".to_string(),
            type_code: "D".to_string(),
            length: 8,
            decimals: 0,
            title: "Emissao".to_string(),
            description: "Data de Emissao".to_string(),
        };
        SchemaSnapshot::new(vec![SchemaEntry::new("SC5", vec![field])], Vec::new(), fetched_at)
    }

    fn generator(llm: Arc<ScriptedLlmClient>) -> SqlGenerator {
        SqlGenerator::new(
            llm,
            Arc::new(BusinessRules::protheus_default("01")),
            Arc::new(prompt_templates().expect("templates")),
        )
    }

    #[test]
    fn extracts_single_tagged_block_and_preamble() {
        let extraction = extract_sql(
            "Segue a consulta:\n\n```sql\nSELECT COUNT(*) FROM SC5010 WHERE D_E_L_E_T_ = ' '\n```\n",
        );

        assert_eq!(extraction.candidates, vec!["SELECT COUNT(*) FROM SC5010 WHERE D_E_L_E_T_ = ' '"]);
        assert_eq!(extraction.preamble, "Segue a consulta:");
    }

    #[test]
    fn extracts_every_block_case_insensitively() {
        let completion = "Two options.\n```SQL\nSELECT 1\n```\nor\n```\nSELECT 2\n```";

        let extraction = extract_sql(completion);

        assert_eq!(extraction.candidates, vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(extraction.preamble, "Two options.\n\nor");
    }

    #[test]
    fn one_line_fence_is_accepted() {
        assert_eq!(extract_sql("```sql SELECT 1```").candidates, vec!["SELECT 1"]);
    }

    #[test]
    fn sql_dialect_tags_are_candidates() {
        let completion = "Consulta:\n```tsql\nSELECT COUNT(*) FROM SC5010 WHERE D_E_L_E_T_ = ' '\n```\n\
                          ```T-SQL\nSELECT 2\n```\n```mssql\nSELECT 3\n```\n```sqlserver\nSELECT 4\n```";

        let extraction = extract_sql(completion);

        assert_eq!(
            extraction.candidates,
            vec![
                "SELECT COUNT(*) FROM SC5010 WHERE D_E_L_E_T_ = ' '",
                "SELECT 2",
                "SELECT 3",
                "SELECT 4",
            ]
        );
        assert_eq!(extraction.preamble, "Consulta:");
    }

    #[test]
    fn one_line_untagged_fence_keeps_the_statement() {
        let extraction = extract_sql("```SELECT COUNT(*) FROM SC5010```");
        assert_eq!(extraction.candidates, vec!["SELECT COUNT(*) FROM SC5010"]);
        assert!(extraction.preamble.is_empty());

        let extraction = extract_sql("```with t as (select 1 as n) select n from t```");
        assert_eq!(extraction.candidates, vec!["with t as (select 1 as n) select n from t"]);
    }

    #[test]
    fn untagged_block_starting_with_select_line_is_a_candidate() {
        let extraction = extract_sql("```SELECT\n  A1_NOME\nFROM SA1010\n```");
        assert_eq!(extraction.candidates, vec!["SELECT\n  A1_NOME\nFROM SA1010"]);
    }

    #[test]
    fn other_language_blocks_stay_in_the_preamble() {
        let completion = "Resultado esperado:\n```json\n{\"QTD\": 3}\n```\nConsulta:\n```sql\nSELECT 1\n```\n```python\nprint(1)\n```";

        let extraction = extract_sql(completion);

        assert_eq!(extraction.candidates, vec!["SELECT 1"]);
        assert_eq!(
            extraction.preamble,
            "Resultado esperado:\n\n```json\n{\"QTD\": 3}\n```\n\nConsulta:\n\n```python\nprint(1)\n```"
        );

        let one_line = extract_sql("```json {\"QTD\": 3}```");
        assert!(one_line.candidates.is_empty());
        assert_eq!(one_line.preamble, "```json {\"QTD\": 3}```");
    }

    #[test]
    fn bare_select_without_fence_is_a_candidate() {
        let extraction = extract_sql("  select A1_NOME from SA1010 where D_E_L_E_T_ = ' '  ");
        assert_eq!(extraction.candidates, vec!["select A1_NOME from SA1010 where D_E_L_E_T_ = ' '"]);
        assert!(extraction.preamble.is_empty());
    }

    #[test]
    fn prose_only_completion_has_no_candidates() {
        let extraction = extract_sql("I need the period you are interested in.");
        assert!(extraction.candidates.is_empty());
        assert_eq!(extraction.preamble, "I need the period you are interested in.");
    }

    #[test]
    fn unterminated_fence_yields_no_candidate() {
        let extraction = extract_sql("```sql\nSELECT 1");
        assert!(extraction.candidates.is_empty());
    }

    #[test]
    fn prompt_fills_every_slot() {
        let generator = generator(Arc::new(ScriptedLlmClient::default()));
        let snapshot = snapshot();
        let prompt = generator
            .build_prompt(&PromptInputs {
                schema: &snapshot,
                today: NaiveDate::from_ymd_opt(2026, 3, 10).expect("date"),
                history: "user: quantos pedidos foram feitos hoje?",
                question: "quantos pedidos foram feitos hoje?",
            })
            .expect("prompt");

        assert!(prompt.contains("# BUSINESS RULES - TOTVS PROTHEUS"));
        assert!(prompt.contains("SC5 (SC5010):\n  C5_EMISSAO: D(8), Emissao - Data de Emissao"));
        assert!(prompt.contains("Today's date: 2026-03-10"));
        assert!(prompt.contains("user: quantos pedidos foram feitos hoje?"));
        assert!(prompt.contains("User question: quantos pedidos foram feitos hoje?"));
        assert!(!prompt.contains("&#x27;"), "rule text must not be html-escaped");
    }

    #[test]
    fn empty_history_is_marked() {
        let generator = generator(Arc::new(ScriptedLlmClient::default()));
        let snapshot = snapshot();
        let prompt = generator
            .build_prompt(&PromptInputs {
                schema: &snapshot,
                today: NaiveDate::from_ymd_opt(2026, 3, 10).expect("date"),
                history: "",
                question: "faturamento do mes",
            })
            .expect("prompt");

        assert!(prompt.contains("Recent conversation (context only):\n(none)"));
    }

    #[tokio::test]
    async fn generate_returns_raw_text_and_candidates() {
        let llm = Arc::new(ScriptedLlmClient::new(["```sql\nSELECT 1\n```"]));
        let generator = generator(llm.clone());
        let snapshot = snapshot();

        let generation = generator
            .generate(&PromptInputs {
                schema: &snapshot,
                today: NaiveDate::from_ymd_opt(2026, 3, 10).expect("date"),
                history: "",
                question: "teste",
            })
            .await
            .expect("generation");

        assert_eq!(generation.raw_text, "```sql\nSELECT 1\n```");
        assert_eq!(generation.extraction.candidates, vec!["SELECT 1"]);
        assert_eq!(llm.prompts().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_completion_is_a_generation_error() {
        let llm = Arc::new(ScriptedLlmClient::with_results([Err(LlmError::Timeout)]));
        let generator = generator(llm);
        let snapshot = snapshot();

        let result = generator
            .generate(&PromptInputs {
                schema: &snapshot,
                today: NaiveDate::from_ymd_opt(2026, 3, 10).expect("date"),
                history: "",
                question: "teste",
            })
            .await;

        assert!(matches!(result, Err(PipelineError::Generation(_))));
    }
}
