use std::sync::Arc;

use askerp_agent::schema_cache::SchemaCache;
use askerp_core::clock::SystemClock;
use askerp_core::config::LoadOptions;
use askerp_db::connect_read_only;
use askerp_db::repositories::SqlDataDictionary;

use crate::commands::{block_on, load_config, CommandResult};

/// Prints the compact dictionary text exactly as it is fed to the
/// generation prompt.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("schema", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("schema", async {
        let pool = connect_read_only(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let dictionary = SqlDataDictionary::new(pool.clone(), config.schema.dictionary_table.clone())
            .map_err(|error| ("config_validation", error.to_string(), 2u8))?;
        let cache = SchemaCache::new(
            Arc::new(dictionary),
            config.schema.tables.clone(),
            chrono::Duration::seconds(1),
            Arc::new(SystemClock),
        );
        let snapshot = cache
            .get_schema()
            .await
            .map_err(|error| ("schema", error.to_string(), 5u8));

        pool.close().await;
        snapshot
    });

    match result {
        Ok(Ok(snapshot)) => {
            let mut output = snapshot.to_prompt_text();
            if !snapshot.missing_tables().is_empty() {
                output.push_str(&format!(
                    "\n\n(no dictionary entries for: {})",
                    snapshot.missing_tables().join(", ")
                ));
            }
            CommandResult { exit_code: 0, output }
        }
        Ok(Err((error_class, message, exit_code))) => {
            CommandResult::failure("schema", error_class, message, exit_code)
        }
        Err(failure) => failure,
    }
}
