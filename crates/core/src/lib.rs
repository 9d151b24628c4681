pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod render;
pub mod rules;
pub mod sql_guard;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::conversation::{ConversationHistory, ConversationTurn, Role};
pub use domain::intent::IntentLabel;
pub use domain::result::{CellValue, ResultSet};
pub use domain::schema::{FieldSpec, SchemaEntry, SchemaSnapshot};
pub use errors::{ExecutionError, InterfaceError, PipelineError};
pub use render::{AdaptiveRenderer, DisplayPayload, RenderedResult};
pub use rules::{BusinessRules, RuleFinding};
pub use sql_guard::SqlRejection;
