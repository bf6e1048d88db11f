//! Automation engine for the FAED "CONTROLE DE LA FICHE" validation form.

pub mod config;
pub mod corrector;
pub mod error;
pub mod gate;
pub mod locator;
pub mod natinf;
pub mod page;
pub mod progress;
pub mod protocol;
pub mod rules;
pub mod session;
pub mod steps;
pub mod store;

pub use error::{AutomationError, PageError};
pub use page::{MemoryPage, Page};
pub use protocol::{Command, Notification, Notifier, Response};
pub use session::AutomationSession;
