//! Loop-mode continuation across page reloads, and progress reporting.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AutomationSession, AutomationState};
use crate::gate::pause;
use crate::locator::is_control_sheet;
use crate::progress;
use crate::protocol::{Notification, StopReason};

impl AutomationSession {
    /// Counterpart of a fresh document: drops every in-memory bit of the
    /// previous page, then resumes loop mode if the persisted flag says so.
    pub async fn on_page_load(self: &Arc<Self>) {
        self.cancel_in_flight();
        self.stop_progress_timer();

        let loop_active = self.store.loop_active().unwrap_or_else(|e| {
            warn!(error = %e, "could not read persisted loop flag");
            false
        });
        *self.state.lock() = AutomationState::new(loop_active);
        info!(loop_mode = loop_active, "page loaded, session reset");

        if !loop_active {
            return;
        }
        if !is_control_sheet(self.page.as_ref()).await {
            self.stop_loop(StopReason::InitializationNotOnControlSheet, None);
            return;
        }
        match self.page.error_window_present().await {
            Ok(false) => {}
            Ok(true) => {
                info!(loop_mode = true, "unresolved error window found, not resuming");
                self.stop_loop(StopReason::ErrorWindowPresent, None);
                return;
            }
            Err(e) => warn!(error = %e, "error window probe failed, resuming anyway"),
        }

        if !pause(self.timings.resume_settle, &self.token()).await {
            return;
        }
        info!(loop_mode = true, "resuming loop processing");
        self.activate();
        self.start_progress_timer();
        match self.verify_alpha_numeric().await {
            Ok(ok) => debug!(ok, "resumed verification finished"),
            Err(e) => warn!(error = %e, "resumed verification failed"),
        }
    }

    /// Replaces any running timer. The timer ends itself once loop mode is
    /// off.
    pub(super) fn start_progress_timer(self: &Arc<Self>) {
        let session = Arc::downgrade(self);
        let period = self.timings.progress_interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    return;
                };
                if !session.loop_active() {
                    return;
                }
                session.report_progress().await;
            }
        });
        if let Some(previous) = self.progress_timer.lock().replace(task) {
            previous.abort();
        }
    }

    pub(super) fn stop_progress_timer(&self) {
        if let Some(task) = self.progress_timer.lock().take() {
            task.abort();
            debug!("progress timer stopped");
        }
    }

    /// Reads the dossier counter and pushes it to the popup and the in-page
    /// bar.
    pub async fn report_progress(&self) -> Option<u8> {
        let dossier = progress::read_dossier(self.page.as_ref()).await?;
        let percentage = progress::percentage(&dossier)?;
        debug!(percentage, current = dossier.current, total = dossier.total, "progress");
        self.notifier.send(Notification::ProgressUpdate {
            progress_percentage: percentage,
            current_dossier: dossier.current,
            total_dossiers: dossier.total,
            dossier_text: dossier.text.clone(),
        });
        progress::push_to_page(self.page.clone(), &dossier, self.timings.progress_lock_release).await;
        Some(percentage)
    }
}

/// Polls the page for reloads and error-window choices until cancelled.
pub async fn watch(session: Arc<AutomationSession>, cancel: CancellationToken) {
    let mut ticker = interval(session.timings.watch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("page watcher started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match session.page.take_page_load().await {
            Ok(true) => {
                let session = session.clone();
                tokio::spawn(async move { session.on_page_load().await });
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "page load probe failed"),
        }

        match session.page.take_modal_choice().await {
            Ok(Some(choice)) => {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.resolve_errors(choice).await {
                        warn!(error = %e, "error window choice failed");
                    }
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "modal choice probe failed"),
        }
    }
    info!("page watcher stopped");
}
