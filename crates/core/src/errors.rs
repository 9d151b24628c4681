use thiserror::Error;

/// Failures that abort a turn. Validation rejections are not listed here:
/// they are per-candidate outcomes carried in the turn response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("intent classification failed: {0}")]
    Classification(String),
    #[error("sql generation failed: {0}")]
    Generation(String),
    #[error("schema dictionary unavailable: {0}")]
    Schema(String),
    #[error("conversational answer failed: {0}")]
    Conversation(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("internal pipeline failure: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Classification(_) => "classification",
            Self::Generation(_) => "generation",
            Self::Schema(_) => "schema",
            Self::Conversation(_) => "conversation",
            Self::Execution(_) => "execution",
            Self::Internal(_) => "internal",
        }
    }

    /// Non-technical text safe to show and persist in history.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Classification(_) | Self::Conversation(_) => {
                "I could not understand the request right now. Please try again in a moment."
            }
            Self::Generation(_) => {
                "I could not build a query for that question. Please try rephrasing it."
            }
            Self::Schema(_) => "The ERP data dictionary is unavailable right now. Please retry shortly.",
            Self::Execution(_) => "The query failed to run. Please try rephrasing the question.",
            Self::Internal(_) => "An unexpected error occurred while answering. Please try again.",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.user_message().to_owned();
        match self {
            Self::Classification(_)
            | Self::Generation(_)
            | Self::Conversation(_)
            | Self::Schema(_)
            | Self::Execution(_) => InterfaceError::ServiceUnavailable { message, correlation_id },
            Self::Internal(_) => InterfaceError::Internal { message, correlation_id },
        }
    }
}

/// Database failure after validation. `Display` is deliberately opaque; the
/// driver text is only reachable through [`ExecutionError::cause`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("query execution failed")]
pub struct ExecutionError {
    cause: String,
}

impl ExecutionError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self { cause: cause.into() }
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}
