use thiserror::Error;

/// Failures reported by the mail provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The session is invalid and could not be renewed. Aborts the whole run.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("label operation failed: {0}")]
    Label(String),
}

impl GatewayError {
    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "auth",
            GatewayError::Transport(_) => "transport",
            GatewayError::Label(_) => "label",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier service error: {0}")]
    Service(String),
    #[error("classifier did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("classifier requested an unsupported tool call")]
    RequiresAction,
    #[error("classifier returned {0:?}, expected high, medium or low")]
    OutOfRange(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors that end a workflow run early. Per-thread failures never surface here.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("mail session rejected: {0}")]
    Auth(String),
    #[error("could not list unread messages: {0}")]
    Listing(GatewayError),
}
