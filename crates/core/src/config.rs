use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TABLES: &[&str] = &["SA1", "SA2", "SB1", "SB2", "SC5", "SC6", "SF2", "SD2"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub schema: SchemaConfig,
    pub pipeline: PipelineConfig,
    pub render: RenderConfig,
    pub rules: RulesConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaConfig {
    pub dictionary_table: String,
    pub tables: Vec<String>,
    pub ttl_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub history_window: usize,
    pub enforce_rule_predicates: bool,
    pub greeting_shortcut: bool,
    /// Upper bound on live chat sessions; the least recently active one is
    /// evicted to admit a new session.
    pub max_sessions: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    pub display_row_limit: usize,
    pub history_row_limit: usize,
    pub currency_symbol: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RulesConfig {
    pub default_branch: String,
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
    Gemini,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub schema_ttl_secs: Option<u64>,
    pub default_branch: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://askerp.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            schema: SchemaConfig::default(),
            pipeline: PipelineConfig::default(),
            render: RenderConfig::default(),
            rules: RulesConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            dictionary_table: "SX3010".to_string(),
            tables: DEFAULT_TABLES.iter().map(|table| (*table).to_string()).collect(),
            ttl_secs: 3600,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: 4,
            enforce_rule_predicates: false,
            greeting_shortcut: true,
            max_sessions: 1_000,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { display_row_limit: 50, history_row_limit: 20, currency_symbol: "R$".to_string() }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self { default_branch: "01".to_string(), path: None }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
        }
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama|gemini)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("askerp.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(schema) = patch.schema {
            if let Some(dictionary_table) = schema.dictionary_table {
                self.schema.dictionary_table = dictionary_table;
            }
            if let Some(tables) = schema.tables {
                self.schema.tables = tables;
            }
            if let Some(ttl_secs) = schema.ttl_secs {
                self.schema.ttl_secs = ttl_secs;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(history_window) = pipeline.history_window {
                self.pipeline.history_window = history_window;
            }
            if let Some(enforce) = pipeline.enforce_rule_predicates {
                self.pipeline.enforce_rule_predicates = enforce;
            }
            if let Some(greeting_shortcut) = pipeline.greeting_shortcut {
                self.pipeline.greeting_shortcut = greeting_shortcut;
            }
            if let Some(max_sessions) = pipeline.max_sessions {
                self.pipeline.max_sessions = max_sessions;
            }
        }

        if let Some(render) = patch.render {
            if let Some(display_row_limit) = render.display_row_limit {
                self.render.display_row_limit = display_row_limit;
            }
            if let Some(history_row_limit) = render.history_row_limit {
                self.render.history_row_limit = history_row_limit;
            }
            if let Some(currency_symbol) = render.currency_symbol {
                self.render.currency_symbol = currency_symbol;
            }
        }

        if let Some(rules) = patch.rules {
            if let Some(default_branch) = rules.default_branch {
                self.rules.default_branch = default_branch;
            }
            if let Some(path) = rules.path {
                self.rules.path = Some(path);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ASKERP_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ASKERP_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("ASKERP_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ASKERP_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ASKERP_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ASKERP_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("ASKERP_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ASKERP_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("ASKERP_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("ASKERP_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("ASKERP_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ASKERP_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("ASKERP_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("ASKERP_SCHEMA_DICTIONARY_TABLE") {
            self.schema.dictionary_table = value;
        }
        if let Some(value) = read_env("ASKERP_SCHEMA_TABLES") {
            self.schema.tables = value
                .split(',')
                .map(str::trim)
                .filter(|table| !table.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read_env("ASKERP_SCHEMA_TTL_SECS") {
            self.schema.ttl_secs = parse_u64("ASKERP_SCHEMA_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("ASKERP_PIPELINE_HISTORY_WINDOW") {
            self.pipeline.history_window = parse_usize("ASKERP_PIPELINE_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("ASKERP_PIPELINE_ENFORCE_RULE_PREDICATES") {
            self.pipeline.enforce_rule_predicates =
                parse_bool("ASKERP_PIPELINE_ENFORCE_RULE_PREDICATES", &value)?;
        }
        if let Some(value) = read_env("ASKERP_PIPELINE_GREETING_SHORTCUT") {
            self.pipeline.greeting_shortcut =
                parse_bool("ASKERP_PIPELINE_GREETING_SHORTCUT", &value)?;
        }
        if let Some(value) = read_env("ASKERP_PIPELINE_MAX_SESSIONS") {
            self.pipeline.max_sessions = parse_usize("ASKERP_PIPELINE_MAX_SESSIONS", &value)?;
        }

        if let Some(value) = read_env("ASKERP_RENDER_DISPLAY_ROW_LIMIT") {
            self.render.display_row_limit = parse_usize("ASKERP_RENDER_DISPLAY_ROW_LIMIT", &value)?;
        }
        if let Some(value) = read_env("ASKERP_RENDER_HISTORY_ROW_LIMIT") {
            self.render.history_row_limit = parse_usize("ASKERP_RENDER_HISTORY_ROW_LIMIT", &value)?;
        }
        if let Some(value) = read_env("ASKERP_RENDER_CURRENCY_SYMBOL") {
            self.render.currency_symbol = value;
        }

        if let Some(value) = read_env("ASKERP_RULES_DEFAULT_BRANCH") {
            self.rules.default_branch = value;
        }
        if let Some(value) = read_env("ASKERP_RULES_PATH") {
            self.rules.path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("ASKERP_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ASKERP_SERVER_PORT") {
            self.server.port = parse_u16("ASKERP_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ASKERP_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ASKERP_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("ASKERP_LOGGING_LEVEL").or_else(|| read_env("ASKERP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ASKERP_LOGGING_FORMAT").or_else(|| read_env("ASKERP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(ttl_secs) = overrides.schema_ttl_secs {
            self.schema.ttl_secs = ttl_secs;
        }
        if let Some(default_branch) = overrides.default_branch {
            self.rules.default_branch = default_branch;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_schema(&self.schema)?;
        validate_pipeline(&self.pipeline)?;
        validate_render(&self.render)?;
        validate_rules(&self.rules)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Config file that `load` would read: the explicit path when it exists,
/// otherwise `askerp.toml` or `config/askerp.toml` in the working directory.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("askerp.toml"), PathBuf::from("config/askerp.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic | LlmProvider::Gemini => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic/gemini providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_schema(schema: &SchemaConfig) -> Result<(), ConfigError> {
    if !is_plain_identifier(&schema.dictionary_table) {
        return Err(ConfigError::Validation(
            "schema.dictionary_table must contain only letters, digits and `_`".to_string(),
        ));
    }

    if schema.tables.is_empty() {
        return Err(ConfigError::Validation(
            "schema.tables must list at least one logical table".to_string(),
        ));
    }

    if let Some(table) = schema
        .tables
        .iter()
        .find(|table| table.len() != 3 || !table.chars().all(|ch| ch.is_ascii_alphanumeric()))
    {
        return Err(ConfigError::Validation(format!(
            "schema.tables entry `{table}` must be a 3-character file code (e.g. SA1)"
        )));
    }

    if schema.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "schema.ttl_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.history_window > 50 {
        return Err(ConfigError::Validation(
            "pipeline.history_window must be in range 0..=50".to_string(),
        ));
    }
    if pipeline.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "pipeline.max_sessions must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_render(render: &RenderConfig) -> Result<(), ConfigError> {
    if render.display_row_limit == 0 || render.history_row_limit == 0 {
        return Err(ConfigError::Validation(
            "render.display_row_limit and render.history_row_limit must be greater than zero"
                .to_string(),
        ));
    }

    if render.history_row_limit > render.display_row_limit {
        return Err(ConfigError::Validation(
            "render.history_row_limit must not exceed render.display_row_limit".to_string(),
        ));
    }

    if render.currency_symbol.trim().is_empty() {
        return Err(ConfigError::Validation(
            "render.currency_symbol must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_rules(rules: &RulesConfig) -> Result<(), ConfigError> {
    let branch = rules.default_branch.trim();
    if branch.is_empty() || branch.len() > 8 || !branch.chars().all(|ch| ch.is_ascii_alphanumeric())
    {
        return Err(ConfigError::Validation(
            "rules.default_branch must be 1..=8 alphanumeric characters".to_string(),
        ));
    }

    if let Some(path) = &rules.path {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "rules.path `{}` does not exist",
                path.display()
            )));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

/// Letters, digits and `_` only; table names are interpolated into SQL.
pub fn is_plain_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    schema: Option<SchemaPatch>,
    pipeline: Option<PipelinePatch>,
    render: Option<RenderPatch>,
    rules: Option<RulesPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaPatch {
    dictionary_table: Option<String>,
    tables: Option<Vec<String>>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    history_window: Option<usize>,
    enforce_rule_predicates: Option<bool>,
    greeting_shortcut: Option<bool>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderPatch {
    display_row_limit: Option<usize>,
    history_row_limit: Option<usize>,
    currency_symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesPatch {
    default_branch: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.schema.ttl_secs == 3600, "schema ttl should default to one hour")?;
        ensure(config.schema.dictionary_table == "SX3010", "dictionary table should be SX3010")?;
        ensure(config.schema.tables.len() == 8, "eight core tables should be configured")?;
        ensure(config.render.display_row_limit == 50, "display cap should be 50")?;
        ensure(config.render.history_row_limit == 20, "history cap should be 20")?;
        ensure(config.pipeline.history_window == 4, "history window should be 4 turns")?;
        ensure(config.pipeline.max_sessions == 1_000, "session cap should be 1000")?;
        ensure(config.rules.default_branch == "01", "default branch should be 01")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ASKERP_GEMINI_KEY", "gemini-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("askerp.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "gemini"
model = "gemini-2.5-flash"
api_key = "${TEST_ASKERP_GEMINI_KEY}"

[schema]
tables = ["SA1", "SC5"]
ttl_secs = 600
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::Gemini, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "gemini-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.schema.tables == vec!["SA1", "SC5"], "tables should come from file")?;
            ensure(config.schema.ttl_secs == 600, "ttl should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_ASKERP_GEMINI_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_LOG_LEVEL", "warn");
        env::set_var("ASKERP_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["ASKERP_LOG_LEVEL", "ASKERP_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("ASKERP_RULES_DEFAULT_BRANCH", "02");
        env::set_var("ASKERP_SCHEMA_TABLES", "SA1, SB1 ,SC5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("askerp.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[rules]
default_branch = "03"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.rules.default_branch == "02", "env branch should win over file")?;
            ensure(
                config.schema.tables == vec!["SA1", "SB1", "SC5"],
                "env table list should be split and trimmed",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "ASKERP_DATABASE_URL",
            "ASKERP_RULES_DEFAULT_BRANCH",
            "ASKERP_SCHEMA_TABLES",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["ASKERP_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn dictionary_table_must_be_a_plain_identifier() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_SCHEMA_DICTIONARY_TABLE", "SX3010; DROP TABLE SA1010");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected validation failure".to_string())?;
            ensure(
                error.to_string().contains("schema.dictionary_table"),
                "validation failure should mention schema.dictionary_table",
            )
        })();

        clear_vars(&["ASKERP_SCHEMA_DICTIONARY_TABLE"]);
        result
    }

    #[test]
    fn history_limit_cannot_exceed_display_limit() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_RENDER_HISTORY_ROW_LIMIT", "80");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected validation failure".to_string())?;
            ensure(
                error.to_string().contains("render.history_row_limit"),
                "validation failure should mention render.history_row_limit",
            )
        })();

        clear_vars(&["ASKERP_RENDER_HISTORY_ROW_LIMIT"]);
        result
    }

    #[test]
    fn session_cap_must_be_positive() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_PIPELINE_MAX_SESSIONS", "0");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected validation failure".to_string())?;
            ensure(
                error.to_string().contains("pipeline.max_sessions"),
                "validation failure should mention pipeline.max_sessions",
            )
        })();

        clear_vars(&["ASKERP_PIPELINE_MAX_SESSIONS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ASKERP_LLM_PROVIDER", "anthropic");
        env::set_var("ASKERP_LLM_API_KEY", "sk-ant-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-ant-secret-value"), "debug output should not contain key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["ASKERP_LLM_PROVIDER", "ASKERP_LLM_API_KEY"]);
        result
    }
}
