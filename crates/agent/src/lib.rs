//! Question-answering runtime for the Protheus ERP.
//!
//! The model is only used as a translator: it classifies a message, writes
//! SQL against the dictionary snapshot and phrases small talk. Whether a
//! statement runs is decided here, by [`guardrails::GuardrailPolicy`], and
//! every result shown to the user comes from the database.
//!
//! - `intent` routes a message to the data path or to conversation
//! - `schema_cache` keeps the dictionary snapshot fed into prompts
//! - `generation` builds the grounded prompt and extracts SQL candidates
//! - `guardrails` decides which candidates may reach the executor
//! - `runtime` runs one turn end to end and records it in history
//! - `sessions` holds per-session histories for multi-user front ends

pub mod generation;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod runtime;
pub mod schema_cache;
pub mod sessions;

pub use llm::{HttpLlmClient, LlmClient, LlmError, RetryPolicy, ScriptedLlmClient};
pub use runtime::{AgentRuntime, CandidateOutcome, RuntimeDeps, TurnReply, TurnResponse};
pub use sessions::SessionStore;
