//! The DOM seam between the engine and whatever renders the FAED form.
//!
//! Every method is a point-in-time probe or a single mutation. Waiting,
//! retrying and pacing live in the engine, never behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PageError;

pub mod memory;

pub use memory::MemoryPage;

/// Synthetic events dispatched after writing a value so the host page's
/// framework notices the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEvent {
    Input,
    Change,
    Blur,
}

impl DomEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            DomEvent::Input => "input",
            DomEvent::Change => "change",
            DomEvent::Blur => "blur",
        }
    }
}

/// How an input is located relative to a label whose text matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelProximity {
    /// The label's next element sibling, when it is an `input`.
    NextSibling,
    /// The element named by the label's `for` attribute, overridden by the
    /// first text input in the label's table row.
    ForOrRow,
}

/// Button picked by the user in the on-page error window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalChoice {
    Continue,
    Fix,
}

/// "Dossier en cours" counter rendered by the host page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DossierProgress {
    pub current: u32,
    pub total: u32,
    pub text: String,
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn exists(&self, selector: &str) -> Result<bool, PageError>;

    /// The element's `value`, or `None` when nothing matches.
    async fn value(&self, selector: &str) -> Result<Option<String>, PageError>;

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, PageError>;

    /// `Some(false)` when the element carries `disabled` or
    /// `aria-disabled="true"`.
    async fn is_enabled(&self, selector: &str) -> Result<Option<bool>, PageError>;

    /// Whether the element sits in a tab header marked `ui-state-disabled`.
    async fn in_disabled_tab(&self, selector: &str) -> Result<bool, PageError>;

    /// Fails with [`PageError::NotFound`] when nothing matches.
    async fn click(&self, selector: &str) -> Result<(), PageError>;

    /// Writes the value then dispatches `events` in order. Returns false
    /// when nothing matches.
    async fn set_value(
        &self,
        selector: &str,
        value: &str,
        events: &[DomEvent],
    ) -> Result<bool, PageError>;

    /// Text content of every match.
    async fn texts(&self, selector: &str) -> Result<Vec<String>, PageError>;

    async fn value_near_label(
        &self,
        label_text: &str,
        proximity: LabelProximity,
    ) -> Result<Option<String>, PageError>;

    /// Toggles the error styling and warning glyph. Returns false when
    /// nothing matches.
    async fn set_highlight(&self, selector: &str, on: bool) -> Result<bool, PageError>;

    /// Replaces any existing error window.
    async fn show_error_window(&self, errors: &[String]) -> Result<(), PageError>;

    async fn error_window_present(&self) -> Result<bool, PageError>;

    async fn close_error_window(&self) -> Result<(), PageError>;

    /// Returns and clears the last button clicked in the error window.
    async fn take_modal_choice(&self) -> Result<Option<ModalChoice>, PageError>;

    /// True exactly once per loaded document.
    async fn take_page_load(&self) -> Result<bool, PageError>;

    /// Forwards progress to the in-page progress bar. Returns false when the
    /// bar is not installed.
    async fn push_progress(&self, progress: &DossierProgress) -> Result<bool, PageError>;

    /// Write lock the in-page bar checks before polling on its own.
    async fn set_progress_lock(&self, locked: bool) -> Result<(), PageError>;

    async fn cleanup_progress_bar(&self) -> Result<(), PageError>;
}
