//! One automation session per attached tab.
//!
//! All mutable engine state lives in [`AutomationSession`]. Collaborators
//! talk to it through [`AutomationSession::handle`] and hear back through
//! the [`Notifier`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{SCRIPT_NAME, Timings, VERSION};
use crate::corrector::{apply_corrections, highlight_errors};
use crate::error::AutomationError;
use crate::gate::{Idle, LoadingGate, pause};
use crate::locator::{PageLayout, detect_layout, diagnose, is_control_sheet, read_field};
use crate::natinf::{self, SensitiveCodes};
use crate::page::{ModalChoice, Page};
use crate::progress;
use crate::protocol::{Command, Notification, Notifier, Response, StopReason, VerifyStatus};
use crate::rules::{FieldValues, VALIDATED_FIELDS, ValidationResult, validate};
use crate::steps::{SEQUENCE, StepExecutor, StepOutcome};
use crate::store::StateStore;

pub mod loop_ctl;

pub use loop_ctl::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A verification pass is reading and validating the form.
    Verifying,
    /// The step runner is executing.
    Running,
    /// A step failed. Terminal for this page load until the user acts.
    Failed,
}

#[derive(Debug, Clone)]
pub struct AutomationState {
    pub current_step: usize,
    pub sequence_start: Option<Instant>,
    pub is_active: bool,
    pub loop_active: bool,
    pub phase: Phase,
    pub layout: Option<PageLayout>,
    /// Errors listed in the on-page window, used by the "fix" choice.
    pub pending_errors: Vec<String>,
}

impl AutomationState {
    fn new(loop_active: bool) -> Self {
        Self {
            current_step: 0,
            sequence_start: None,
            is_active: false,
            loop_active,
            phase: Phase::Idle,
            layout: None,
            pending_errors: Vec::new(),
        }
    }
}

pub struct AutomationSession {
    page: Arc<dyn Page>,
    gate: LoadingGate,
    timings: Timings,
    store: StateStore,
    codes: SensitiveCodes,
    notifier: Notifier,
    state: Mutex<AutomationState>,
    cancel: Mutex<CancellationToken>,
    progress_timer: Mutex<Option<JoinHandle<()>>>,
}

impl AutomationSession {
    pub fn new(
        page: Arc<dyn Page>,
        store: StateStore,
        codes: SensitiveCodes,
        notifier: Notifier,
        timings: Timings,
    ) -> Arc<Self> {
        let loop_active = store.loop_active().unwrap_or_else(|e| {
            warn!(error = %e, "could not read persisted loop flag");
            false
        });
        Arc::new(Self {
            gate: LoadingGate::new(page.clone(), timings.clone()),
            page,
            timings,
            store,
            codes,
            notifier,
            state: Mutex::new(AutomationState::new(loop_active)),
            cancel: Mutex::new(CancellationToken::new()),
            progress_timer: Mutex::new(None),
        })
    }

    pub fn state(&self) -> AutomationState {
        self.state.lock().clone()
    }

    pub fn loop_active(&self) -> bool {
        self.state.lock().loop_active
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Cancels whatever is in flight and arms a fresh token.
    fn cancel_in_flight(&self) {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    fn persist_loop(&self, active: bool) {
        self.state.lock().loop_active = active;
        if let Err(e) = self.store.set_loop_active(active) {
            warn!(active, error = %e, "could not persist loop flag");
        }
    }

    /// Clears the loop flag and tells the popup why.
    fn stop_loop(&self, reason: StopReason, details: Option<String>) {
        self.persist_loop(false);
        self.stop_progress_timer();
        info!(loop_mode = true, ?reason, "loop processing stopped");
        self.notifier
            .send(Notification::LoopProcessingStopped { reason, details });
    }

    pub fn activate(&self) {
        let mut state = self.state.lock();
        state.is_active = true;
        state.current_step = 0;
        state.sequence_start = None;
        state.layout = None;
        if state.phase != Phase::Verifying && state.phase != Phase::Running {
            state.phase = Phase::Idle;
        }
        info!(loop_mode = state.loop_active, "session activated");
    }

    pub fn deactivate(&self) {
        self.cancel_in_flight();
        let mut state = self.state.lock();
        state.is_active = false;
        state.current_step = 0;
        state.sequence_start = None;
        state.phase = Phase::Idle;
        info!(loop_mode = state.loop_active, "session deactivated");
    }

    fn enter_verification(&self) -> Result<(), AutomationError> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Verifying | Phase::Running => Err(AutomationError::Busy),
            _ => {
                state.phase = Phase::Verifying;
                Ok(())
            }
        }
    }

    async fn layout(&self) -> PageLayout {
        let cached = self.state.lock().layout;
        if let Some(layout) = cached {
            return layout;
        }
        let layout = detect_layout(self.page.as_ref()).await;
        if !layout.is_resolved() {
            diagnose(self.page.as_ref()).await;
        }
        self.state.lock().layout = Some(layout);
        layout
    }

    /// Reads every validated field, waiting out the busy overlay before each
    /// read, and applies the business rules.
    async fn check_fields(
        &self,
        layout: PageLayout,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult, AutomationError> {
        let mut values = FieldValues::default();
        for field in VALIDATED_FIELDS {
            if self.gate.await_idle(cancel).await == Idle::Cancelled {
                return Err(AutomationError::Cancelled);
            }
            values.set(field, read_field(self.page.as_ref(), field, layout).await);
        }
        let result = validate(&values);
        info!(?layout, errors = result.errors.len(), "fields validated");
        Ok(result)
    }

    /// Automatic entry point. Returns the validation verdict, false when not
    /// on the control sheet.
    pub async fn verify_alpha_numeric(self: &Arc<Self>) -> Result<bool, AutomationError> {
        if !is_control_sheet(self.page.as_ref()).await {
            info!("not on the control sheet, verification skipped");
            if self.loop_active() {
                self.stop_loop(StopReason::ProcessingCompleted, None);
            }
            return Ok(false);
        }
        if self.gate.await_idle(&self.token()).await == Idle::Cancelled {
            return Ok(false);
        }
        match self.perform_verification().await {
            Ok(ok) => Ok(ok),
            Err(AutomationError::Cancelled) => {
                info!("verification cancelled");
                Ok(false)
            }
            Err(AutomationError::Busy) => Err(AutomationError::Busy),
            Err(e) => {
                error!(error = %e, "verification failed");
                let message = format!("Erreur technique lors de la vérification: {e}");
                if let Err(e) = self.page.show_error_window(std::slice::from_ref(&message)).await {
                    warn!(error = %e, "error window could not be shown");
                }
                self.state.lock().pending_errors = vec![message];
                Ok(false)
            }
        }
    }

    /// Full pass: validate, correct, flag sensitive codes, then hand over to
    /// the step runner at index 0 (clean) or 1 (corrected).
    async fn perform_verification(self: &Arc<Self>) -> Result<bool, AutomationError> {
        self.enter_verification()?;
        let cancel = self.token();
        match self.verification_pass(&cancel).await {
            Ok(result) => {
                if cancel.is_cancelled() {
                    self.state.lock().phase = Phase::Idle;
                    return Err(AutomationError::Cancelled);
                }
                let start = if result.ok() { 0 } else { 1 };
                self.state.lock().phase = Phase::Running;
                let session = Arc::clone(self);
                tokio::spawn(async move { session.run_automated_steps(start, cancel).await });
                Ok(result.ok())
            }
            Err(e) => {
                self.state.lock().phase = Phase::Idle;
                Err(e)
            }
        }
    }

    async fn verification_pass(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult, AutomationError> {
        let layout = self.layout().await;
        let result = self.check_fields(layout, cancel).await?;
        let verdict = natinf::evaluate(self.page.as_ref(), layout, &self.codes).await;

        if !result.ok() {
            for message in &result.errors {
                info!(loop_mode = self.loop_active(), %message, "validation error");
            }
            highlight_errors(self.page.as_ref(), layout, &result).await;
            if !apply_corrections(
                self.page.as_ref(),
                &result.errors,
                self.timings.correction_pause,
                cancel,
            )
            .await
            {
                return Err(AutomationError::Cancelled);
            }
        }

        if verdict.should_write {
            natinf::ensure_comment(self.page.as_ref(), &verdict.message, !result.ok()).await?;
        }
        Ok(result)
    }

    /// Manual `verify`: highlight and surface errors, never run steps.
    pub async fn validate_only(&self) -> Result<ValidationResult, AutomationError> {
        self.enter_verification()?;
        let cancel = self.token();
        let layout = self.layout().await;
        let outcome = self.check_fields(layout, &cancel).await;
        self.state.lock().phase = Phase::Idle;
        let result = outcome?;

        if !result.ok() {
            highlight_errors(self.page.as_ref(), layout, &result).await;
            self.page.show_error_window(&result.errors).await?;
            self.state.lock().pending_errors = result.errors.clone();
        }
        Ok(result)
    }

    fn elapsed_ms(&self) -> u64 {
        self.state
            .lock()
            .sequence_start
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Runs the step at the current index and reports it. Returns the index
    /// that just ran.
    async fn run_current_step(&self, cancel: &CancellationToken) -> Result<usize, (usize, AutomationError)> {
        let index = self.state.lock().current_step;
        let step = &SEQUENCE[index];
        let executor = StepExecutor::new(self.page.as_ref(), &self.gate, &self.timings);
        let outcome = executor.run(step, cancel).await.map_err(|e| (index, e))?;
        if outcome == StepOutcome::Skipped {
            info!(step = step.name(), "step skipped");
        }

        let next = index + 1;
        self.state.lock().current_step = next;
        let elapsed = self.elapsed_ms();
        info!(loop_mode = self.loop_active(), index, step = step.name(), elapsed_ms = elapsed, "step completed");
        self.notifier.send(Notification::StepCompleted {
            step_index: index,
            step_name: step.name().to_string(),
            next_step_index: next,
            elapsed_time: elapsed,
        });
        Ok(index)
    }

    /// Automatic mode. Chains steps while loop mode is on, otherwise stops
    /// after one step and waits for `nextStep`.
    async fn run_automated_steps(self: Arc<Self>, start: usize, cancel: CancellationToken) {
        {
            let mut state = self.state.lock();
            state.phase = Phase::Running;
            state.current_step = start;
            state.sequence_start.get_or_insert_with(Instant::now);
        }
        info!(loop_mode = self.loop_active(), start, "automated steps started");

        loop {
            if self.gate.await_idle(&cancel).await == Idle::Cancelled {
                return;
            }
            if self.state.lock().current_step >= SEQUENCE.len() {
                break;
            }
            match self.run_current_step(&cancel).await {
                Ok(index) if index + 1 >= SEQUENCE.len() => break,
                Ok(_) => {}
                Err((_, AutomationError::Cancelled)) => {
                    info!("automated steps cancelled");
                    return;
                }
                Err((index, e)) => {
                    self.fail_sequence(index, &e).await;
                    return;
                }
            }

            if !self.loop_active() {
                self.state.lock().phase = Phase::Idle;
                info!(loop_mode = false, "waiting for nextStep");
                return;
            }
            if self.gate.await_idle(&cancel).await == Idle::Cancelled
                || !pause(self.timings.step_pacing, &cancel).await
            {
                return;
            }
        }

        self.notifier.send(Notification::ActionsComplete {
            final_step_index: SEQUENCE.len() - 1,
            all_steps_count: SEQUENCE.len(),
        });
        self.finish_sequence(&cancel).await;
    }

    /// Manual mode: exactly one step per call.
    pub async fn next_step(self: &Arc<Self>) -> Result<(), AutomationError> {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Verifying | Phase::Running) {
                return Err(AutomationError::Busy);
            }
            if !state.is_active && state.current_step == 0 {
                info!("auto-activating for step 0");
                state.is_active = true;
                state.sequence_start = None;
            }
            if state.current_step == 0 && state.sequence_start.is_none() {
                state.sequence_start = Some(Instant::now());
            }
            state.phase = Phase::Running;
        }
        let cancel = self.token();

        if self.state.lock().current_step >= SEQUENCE.len() {
            self.finish_sequence(&cancel).await;
            return Ok(());
        }
        match self.run_current_step(&cancel).await {
            Ok(index) if index + 1 >= SEQUENCE.len() => {
                self.finish_sequence(&cancel).await;
                Ok(())
            }
            Ok(_) => {
                self.state.lock().phase = Phase::Idle;
                Ok(())
            }
            Err((_, AutomationError::Cancelled)) => {
                self.state.lock().phase = Phase::Idle;
                Err(AutomationError::Cancelled)
            }
            Err((index, e)) => {
                self.fail_sequence(index, &e).await;
                Err(e)
            }
        }
    }

    /// Pads the sequence to the minimum duration, then reports `done`.
    async fn finish_sequence(&self, cancel: &CancellationToken) {
        let elapsed = self
            .state
            .lock()
            .sequence_start
            .map(|start| start.elapsed())
            .unwrap_or_default();
        if elapsed < self.timings.min_sequence {
            let remaining = self.timings.min_sequence - elapsed;
            info!(remaining_ms = remaining.as_millis() as u64, "padding sequence to minimum duration");
            self.notifier.send(Notification::StartFinalWait);
            if !pause(remaining, cancel).await {
                return;
            }
        }

        let percentage = progress::read_dossier(self.page.as_ref())
            .await
            .as_ref()
            .and_then(progress::percentage);
        {
            let mut state = self.state.lock();
            state.current_step = 0;
            state.sequence_start = None;
            state.phase = Phase::Idle;
        }
        info!(loop_mode = self.loop_active(), ?percentage, "sequence done");
        self.notifier.send(Notification::Done {
            progress_percentage: percentage,
        });
    }

    async fn fail_sequence(&self, index: usize, err: &AutomationError) {
        let name = SEQUENCE[index].name();
        error!(loop_mode = self.loop_active(), index, step = name, error = %err, "step failed");
        self.state.lock().phase = Phase::Failed;

        if self.loop_active() {
            self.stop_loop(StopReason::ErrorDuringStep, Some(err.to_string()));
        }
        let errors = vec![format!("Erreur lors de l'exécution de l'étape : {name} ({err})")];
        if let Err(e) = self.page.show_error_window(&errors).await {
            warn!(error = %e, "error window could not be shown");
        }
        self.state.lock().pending_errors = errors;
    }

    pub async fn start_loop_processing(self: &Arc<Self>) -> Response {
        if !is_control_sheet(self.page.as_ref()).await {
            info!("loop mode not started, not on the control sheet");
            self.persist_loop(false);
            return Response::Loop {
                success: false,
                validation_result: false,
                error: Some(AutomationError::NotOnControlSheet.to_string()),
            };
        }
        self.persist_loop(true);
        {
            let mut state = self.state.lock();
            state.current_step = 0;
            state.sequence_start = Some(Instant::now());
        }
        self.start_progress_timer();
        info!(loop_mode = true, "loop processing started");

        match self.verify_alpha_numeric().await {
            Ok(validation_result) => Response::Loop {
                success: true,
                validation_result,
                error: None,
            },
            Err(e) => Response::Loop {
                success: false,
                validation_result: false,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn stop_loop_processing(&self) -> Response {
        self.persist_loop(false);
        self.stop_progress_timer();
        if let Err(e) = self.page.cleanup_progress_bar().await {
            warn!(error = %e, "progress bar cleanup failed");
        }
        self.deactivate();
        info!(loop_mode = false, "loop processing stopped by request");
        Response::ok()
    }

    /// Buttons of the on-page error window.
    pub async fn resolve_errors(self: &Arc<Self>, choice: ModalChoice) -> Result<(), AutomationError> {
        info!(?choice, "error window choice");
        match choice {
            ModalChoice::Continue => {
                self.page.close_error_window().await?;
                self.state.lock().pending_errors.clear();
                self.next_step().await
            }
            ModalChoice::Fix => {
                let errors = std::mem::take(&mut self.state.lock().pending_errors);
                apply_corrections(
                    self.page.as_ref(),
                    &errors,
                    self.timings.correction_pause,
                    &self.token(),
                )
                .await;
                self.page.close_error_window().await?;
                Ok(())
            }
        }
    }

    /// Dispatches one collaborator command. Always produces a response.
    pub async fn handle(self: &Arc<Self>, command: Command) -> Response {
        match command {
            Command::Ping => Response::Pong {
                pong: true,
                version: VERSION.to_string(),
            },
            Command::TestMessaging { timestamp } => Response::Echo {
                success: true,
                received_timestamp: timestamp,
                response_timestamp: now_millis(),
            },
            Command::StartScript { script } if script == SCRIPT_NAME => {
                if let Err(e) = self.store.set_active_script(Some(SCRIPT_NAME)) {
                    warn!(error = %e, "could not persist active script");
                }
                self.activate();
                match self.verify_alpha_numeric().await {
                    Ok(result) => Response::Outcome {
                        success: true,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => Response::failed(e.to_string()),
                }
            }
            Command::StopScript { script } if script == SCRIPT_NAME => {
                self.deactivate();
                if let Err(e) = self.store.set_active_script(None) {
                    warn!(error = %e, "could not clear active script");
                }
                Response::ok()
            }
            Command::StartScript { script } | Command::StopScript { script } => {
                Response::failed(format!("unknown script: {script}"))
            }
            Command::CheckAlphaNumeric => {
                if !is_control_sheet(self.page.as_ref()).await {
                    return Response::Outcome {
                        success: false,
                        result: Some(false),
                        error: Some(AutomationError::NotOnControlSheet.to_string()),
                    };
                }
                match self.verify_alpha_numeric().await {
                    Ok(result) => Response::Outcome {
                        success: true,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => Response::Outcome {
                        success: false,
                        result: Some(false),
                        error: Some(e.to_string()),
                    },
                }
            }
            Command::NextStep => {
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = session.next_step().await {
                        warn!(error = %e, "nextStep not executed");
                    }
                });
                Response::Accepted { accepted: true }
            }
            Command::Reset => {
                self.deactivate();
                self.activate();
                Response::Status {
                    status: VerifyStatus::ResetComplete,
                    details: None,
                }
            }
            Command::Verify => match self.validate_only().await {
                Ok(result) if result.ok() => Response::Status {
                    status: VerifyStatus::Verified,
                    details: None,
                },
                Ok(result) => Response::Status {
                    status: VerifyStatus::Error,
                    details: Some(result.errors),
                },
                Err(e) => Response::Status {
                    status: VerifyStatus::Error,
                    details: Some(vec![e.to_string()]),
                },
            },
            Command::StartLoopProcessing => self.start_loop_processing().await,
            Command::StopLoopProcessing => self.stop_loop_processing().await,
            Command::ResolveErrors { choice } => {
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = session.resolve_errors(choice).await {
                        warn!(error = %e, "error window choice failed");
                    }
                });
                Response::Accepted { accepted: true }
            }
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
