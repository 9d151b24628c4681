use std::env;
use std::fs;
use std::path::Path;

use askerp_core::config::{resolve_config_path, AppConfig, ConfigOverrides, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let flagged = flagged_keys(&options.overrides);
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];

    for (key, value, env_keys) in entries(&config) {
        let source = if flagged.contains(&key) {
            "flag".to_string()
        } else {
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
        };
        lines.push(render_line(key, &value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn entries(config: &AppConfig) -> Vec<(&'static str, String, &'static [&'static str])> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let rules_path = config
        .rules
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        ("database.url", config.database.url.clone(), &["ASKERP_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["ASKERP_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["ASKERP_DATABASE_TIMEOUT_SECS"],
        ),
        ("llm.provider", config.llm.provider.as_str().to_string(), &["ASKERP_LLM_PROVIDER"]),
        ("llm.model", config.llm.model.clone(), &["ASKERP_LLM_MODEL"]),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["ASKERP_LLM_BASE_URL"],
        ),
        ("llm.api_key", api_key, &["ASKERP_LLM_API_KEY"]),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["ASKERP_LLM_TIMEOUT_SECS"]),
        ("llm.max_retries", config.llm.max_retries.to_string(), &["ASKERP_LLM_MAX_RETRIES"]),
        (
            "schema.dictionary_table",
            config.schema.dictionary_table.clone(),
            &["ASKERP_SCHEMA_DICTIONARY_TABLE"],
        ),
        ("schema.tables", config.schema.tables.join(","), &["ASKERP_SCHEMA_TABLES"]),
        ("schema.ttl_secs", config.schema.ttl_secs.to_string(), &["ASKERP_SCHEMA_TTL_SECS"]),
        (
            "pipeline.history_window",
            config.pipeline.history_window.to_string(),
            &["ASKERP_PIPELINE_HISTORY_WINDOW"],
        ),
        (
            "pipeline.enforce_rule_predicates",
            config.pipeline.enforce_rule_predicates.to_string(),
            &["ASKERP_PIPELINE_ENFORCE_RULE_PREDICATES"],
        ),
        (
            "pipeline.greeting_shortcut",
            config.pipeline.greeting_shortcut.to_string(),
            &["ASKERP_PIPELINE_GREETING_SHORTCUT"],
        ),
        (
            "pipeline.max_sessions",
            config.pipeline.max_sessions.to_string(),
            &["ASKERP_PIPELINE_MAX_SESSIONS"],
        ),
        (
            "render.display_row_limit",
            config.render.display_row_limit.to_string(),
            &["ASKERP_RENDER_DISPLAY_ROW_LIMIT"],
        ),
        (
            "render.history_row_limit",
            config.render.history_row_limit.to_string(),
            &["ASKERP_RENDER_HISTORY_ROW_LIMIT"],
        ),
        (
            "render.currency_symbol",
            config.render.currency_symbol.clone(),
            &["ASKERP_RENDER_CURRENCY_SYMBOL"],
        ),
        (
            "rules.default_branch",
            config.rules.default_branch.clone(),
            &["ASKERP_RULES_DEFAULT_BRANCH"],
        ),
        ("rules.path", rules_path, &["ASKERP_RULES_PATH"]),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["ASKERP_SERVER_BIND_ADDRESS"],
        ),
        ("server.port", config.server.port.to_string(), &["ASKERP_SERVER_PORT"]),
        ("logging.level", config.logging.level.clone(), &["ASKERP_LOGGING_LEVEL", "ASKERP_LOG_LEVEL"]),
        (
            "logging.format",
            config.logging.format.as_str().to_string(),
            &["ASKERP_LOGGING_FORMAT", "ASKERP_LOG_FORMAT"],
        ),
    ]
}

fn flagged_keys(overrides: &ConfigOverrides) -> Vec<&'static str> {
    [
        ("database.url", overrides.database_url.is_some()),
        ("logging.level", overrides.log_level.is_some()),
        ("llm.provider", overrides.llm_provider.is_some()),
        ("llm.model", overrides.llm_model.is_some()),
        ("llm.api_key", overrides.llm_api_key.is_some()),
        ("schema.ttl_secs", overrides.schema_ttl_secs.is_some()),
        ("rules.default_branch", overrides.default_branch.is_some()),
    ]
    .into_iter()
    .filter_map(|(key, set)| set.then_some(key))
    .collect()
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_keep_only_their_prefix() {
        assert_eq!(redact_secret("sk-live-123456"), "sk-***");
        assert_eq!(redact_secret("abcdef"), "<redacted>");
        assert_eq!(redact_secret("   "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_toml() {
        let doc: toml::Value = "[llm]\nmodel = \"gpt-4o\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.provider"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
