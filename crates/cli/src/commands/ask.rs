use std::sync::Arc;

use askerp_agent::llm::{HttpLlmClient, LlmClient};
use askerp_agent::runtime::{AgentRuntime, TurnReply};
use askerp_core::config::LoadOptions;
use askerp_core::domain::conversation::ConversationHistory;
use askerp_db::connect_read_only;

use crate::commands::{block_on, load_config, CommandResult};

pub fn run(options: LoadOptions, question: &str) -> CommandResult {
    let config = match load_config("ask", options.clone()) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => run_with_llm(options, question, Arc::new(client)),
        Err(error) => CommandResult::failure("ask", "llm_configuration", error.to_string(), 2),
    }
}

/// Runs a single turn against `llm` and prints the structured response.
/// Exit code 1 means the turn itself failed.
pub fn run_with_llm(
    options: LoadOptions,
    question: &str,
    llm: Arc<dyn LlmClient>,
) -> CommandResult {
    let config = match load_config("ask", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("ask", async {
        let pool = connect_read_only(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let runtime = AgentRuntime::from_config(&config, pool.clone(), llm)
            .map_err(|error| ("runtime_init", format!("{error:#}"), 3u8))?;
        let mut history = ConversationHistory::new();
        let response = runtime.handle_turn(&mut history, question).await;

        pool.close().await;
        Ok(response)
    });

    let response = match result {
        Ok(Ok(response)) => response,
        Ok(Err((error_class, message, exit_code))) => {
            return CommandResult::failure("ask", error_class, message, exit_code)
        }
        Err(failure) => return failure,
    };

    let exit_code = u8::from(matches!(response.reply, TurnReply::Failed { .. }));
    match serde_json::to_string_pretty(&response) {
        Ok(output) => CommandResult { exit_code, output },
        Err(error) => CommandResult::failure("ask", "serialization", error.to_string(), 1),
    }
}
