//! Typed messages exchanged with the popup and background collaborators.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::page::ModalChoice;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    Ping,
    TestMessaging {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    StartScript {
        script: String,
    },
    StopScript {
        script: String,
    },
    CheckAlphaNumeric,
    NextStep,
    Reset,
    Verify,
    StartLoopProcessing,
    StopLoopProcessing,
    ResolveErrors {
        choice: ModalChoice,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerifyStatus {
    Verified,
    Error,
    ResetComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Pong {
        pong: bool,
        version: String,
    },
    Echo {
        success: bool,
        #[serde(rename = "receivedTimestamp")]
        received_timestamp: Option<i64>,
        #[serde(rename = "responseTimestamp")]
        response_timestamp: i64,
    },
    Outcome {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Loop {
        success: bool,
        #[serde(rename = "validationResult")]
        validation_result: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Status {
        status: VerifyStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Vec<String>>,
    },
    Accepted {
        accepted: bool,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Outcome {
            success: true,
            result: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Response::Outcome {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ProcessingCompleted,
    #[serde(rename = "initialization_not_on_controle_fiche_page")]
    InitializationNotOnControlSheet,
    #[serde(rename = "not_on_controle_fiche_page")]
    NotOnControlSheet,
    ErrorDuringStep,
    ErrorWindowPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        step_index: usize,
        step_name: String,
        next_step_index: usize,
        elapsed_time: u64,
    },
    #[serde(rename_all = "camelCase")]
    ActionsComplete {
        final_step_index: usize,
        all_steps_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    ProgressUpdate {
        progress_percentage: u8,
        current_dossier: u32,
        total_dossiers: u32,
        dossier_text: String,
    },
    #[serde(rename_all = "camelCase")]
    LoopProcessingStopped {
        reason: StopReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    StartFinalWait,
    #[serde(rename_all = "camelCase")]
    Done {
        progress_percentage: Option<u8>,
    },
}

impl Notification {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::StepCompleted { .. } => "stepCompleted",
            Notification::ActionsComplete { .. } => "actionsComplete",
            Notification::ProgressUpdate { .. } => "progressUpdate",
            Notification::LoopProcessingStopped { .. } => "loopProcessingStopped",
            Notification::StartFinalWait => "startFinalWait",
            Notification::Done { .. } => "done",
        }
    }
}

/// Best-effort fan-out. Nobody listening is not an error.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(tx: broadcast::Sender<Notification>) -> Self {
        Self { tx }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(broadcast::channel(capacity).0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        let name = notification.name();
        if self.tx.send(notification).is_err() {
            debug!(event = name, "no listener for notification");
        }
    }
}
