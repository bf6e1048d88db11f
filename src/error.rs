use thiserror::Error;

/// Failures raised by a [`crate::page::Page`] implementation.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("unexpected page response: {0}")]
    InvalidResponse(String),

    #[error("browser tab is no longer reachable")]
    Disconnected,
}

/// Failures of the automation engine itself.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error(transparent)]
    Page(#[from] PageError),

    #[error("no element matched {selector} within {timeout_ms}ms")]
    ElementTimeout { selector: String, timeout_ms: u64 },

    #[error("neither {selector} nor {fallback} is available")]
    NoActionTarget { selector: String, fallback: String },

    #[error("not on the 'CONTROLE DE LA FICHE' page")]
    NotOnControlSheet,

    #[error("an automation sequence is already running")]
    Busy,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures loading the sensitive-code reference list.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reading {path} failed: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reference payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay answered with status {0}")]
    Status(u16),

    #[error("no relay configured for the reference list")]
    NoRelay,
}
