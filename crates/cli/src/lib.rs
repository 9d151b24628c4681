pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use askerp_core::config::{ConfigOverrides, LoadOptions};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "askerp",
    about = "AskERP operator CLI",
    long_about = "Check readiness, inspect configuration, seed demo data and ask questions against a Protheus ERP database.",
    after_help = "Examples:\n  askerp doctor --json\n  askerp seed\n  askerp ask \"quantos pedidos foram feitos hoje?\""
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Config file to load instead of askerp.toml")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override llm.model")]
    model: Option<String>,
    #[arg(long, global = true, help = "Override rules.default_branch")]
    branch: Option<String>,
}

impl GlobalArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                llm_model: self.model.clone(),
                default_branch: self.branch.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Validate config, LLM provider settings, DB connectivity and the data dictionary")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Load the demo Protheus dataset into the configured database")]
    Seed,
    #[command(about = "Print the schema dictionary text used in SQL generation prompts")]
    Schema,
    #[command(about = "Answer one question and print the structured turn response as JSON")]
    Ask {
        #[arg(help = "Question in natural language")]
        question: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let options = cli.global.load_options();
    let result = match cli.command {
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json, options) }
        }
        Command::Config => commands::config::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Schema => commands::schema::run(options),
        Command::Ask { question } => commands::ask::run(options, &question),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Diagnostics go to stderr so command output stays machine-readable.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
