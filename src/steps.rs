//! The fixed click sequence that closes a case record, and its executor.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::error::AutomationError;
use crate::gate::{Idle, LoadingGate, PollOutcome, poll_until};
use crate::page::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    /// Click the primary target when it is enabled, the fallback otherwise.
    ClickEnabledOrFallback { fallback: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// A disabled tab means the step has nothing to do.
    SkipIfTabDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub description: &'static str,
    pub selector: &'static str,
    pub kind: ActionKind,
    pub guard: Option<Guard>,
}

impl Action {
    const fn click(description: &'static str, selector: &'static str) -> Self {
        Self {
            description,
            selector,
            kind: ActionKind::Click,
            guard: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Single(Action),
    Multi {
        name: &'static str,
        actions: &'static [Action],
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Single(action) => action.description,
            Step::Multi { name, .. } => *name,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            Step::Single(action) => std::slice::from_ref(action),
            Step::Multi { actions, .. } => actions,
        }
    }
}

pub const NON_COMPLIANT_ALPHA: &str =
    "label[for='formValidationCorrection:decisionValidationAlphaPortraits:1']";
pub const FINGERPRINTS_TAB: &str = "a[href='#formValidationCorrection:tabViewValidationFiche:tab2']";
pub const PALMS_TAB: &str = "a[href='#formValidationCorrection:tabViewValidationFiche:tab3']";
pub const NON_COMPLIANT_PALMS: &str =
    "label[for='formValidationCorrection:decisionsErreursEmpreintes:1']";
pub const FINISH_CONTROL: &str = "#formValidationCorrection\\:terminerControleBoutton";
pub const OK_AND_NEXT: &str = "#formValidationCorrection\\:okSuivantValidationFicheSignalisation";
pub const OK_ONLY: &str = "#formValidationCorrection\\:terminerValidationFicheSignalisation";

pub static SEQUENCE: [Step; 5] = [
    Step::Multi {
        name: "Cocher 'Non' dans la page alpha numérique",
        actions: &[Action::click("Cocher 'Non'", NON_COMPLIANT_ALPHA)],
    },
    Step::Single(Action::click(
        "Cliquer sur l'onglet Empreintes (doigts)",
        FINGERPRINTS_TAB,
    )),
    Step::Single(Action {
        description: "Cliquer sur l'onglet Empreintes (paumes)",
        selector: PALMS_TAB,
        kind: ActionKind::Click,
        guard: Some(Guard::SkipIfTabDisabled),
    }),
    Step::Multi {
        name: "Cocher 'Non' dans la page paume et cliquer sur 'Terminer'",
        actions: &[
            Action::click("Cocher 'Non' dans la page paume", NON_COMPLIANT_PALMS),
            Action::click("Cliquer sur 'Terminer'", FINISH_CONTROL),
        ],
    },
    Step::Single(Action {
        description: "Cliquer sur 'OK et suivant' ou 'OK'",
        selector: OK_AND_NEXT,
        kind: ActionKind::ClickEnabledOrFallback { fallback: OK_ONLY },
        guard: None,
    }),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepOutcome {
    Completed,
    /// A guard found the step already satisfied.
    Skipped,
}

/// What a wait found ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    primary_enabled: bool,
    fallback_present: bool,
}

pub struct StepExecutor<'a> {
    page: &'a dyn Page,
    gate: &'a LoadingGate,
    timings: &'a Timings,
}

impl<'a> StepExecutor<'a> {
    pub fn new(page: &'a dyn Page, gate: &'a LoadingGate, timings: &'a Timings) -> Self {
        Self { page, gate, timings }
    }

    /// Runs every action of `step` in order. A skipped action skips the
    /// rest of the step.
    pub async fn run(&self, step: &Step, cancel: &CancellationToken) -> Result<StepOutcome, AutomationError> {
        for action in step.actions() {
            debug!(action = action.description, "running action");
            if self.run_action(action, cancel).await? == StepOutcome::Skipped {
                info!(step = step.name(), "step already satisfied, skipping");
                return Ok(StepOutcome::Skipped);
            }
            info!(action = action.description, "action done");
        }
        Ok(StepOutcome::Completed)
    }

    async fn run_action(&self, action: &Action, cancel: &CancellationToken) -> Result<StepOutcome, AutomationError> {
        if action.guard == Some(Guard::SkipIfTabDisabled)
            && self.page.in_disabled_tab(action.selector).await?
        {
            return Ok(StepOutcome::Skipped);
        }

        match action.kind {
            ActionKind::Click => {
                self.wait_for(action.selector, None, cancel).await?;
                self.page.click(action.selector).await?;
            }
            ActionKind::ClickEnabledOrFallback { fallback } => {
                let target = self.wait_for(action.selector, Some(fallback), cancel).await?;
                if target.primary_enabled {
                    self.page.click(action.selector).await?;
                } else if target.fallback_present {
                    info!(selector = action.selector, "primary disabled, using fallback");
                    self.page.click(fallback).await?;
                } else {
                    return Err(AutomationError::NoActionTarget {
                        selector: action.selector.to_string(),
                        fallback: fallback.to_string(),
                    });
                }
            }
        }
        Ok(StepOutcome::Completed)
    }

    /// Waits up to the element timeout for the target. A busy overlay
    /// suspends the wait on the loading gate; time spent there counts
    /// against the budget.
    async fn wait_for(
        &self,
        selector: &str,
        fallback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Target, AutomationError> {
        let timeout = self.timings.element_timeout;
        let outcome = poll_until(
            move || async move {
                if self.gate.is_busy().await && self.gate.await_idle(cancel).await == Idle::Cancelled {
                    return None;
                }
                self.probe(selector, fallback).await
            },
            self.timings.poll_interval,
            timeout,
            cancel,
        )
        .await;

        match outcome {
            PollOutcome::Ready(target) => Ok(target),
            PollOutcome::Cancelled => Err(AutomationError::Cancelled),
            PollOutcome::TimedOut => {
                warn!(selector, ?fallback, "element wait timed out");
                Err(AutomationError::ElementTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn probe(&self, selector: &str, fallback: Option<&str>) -> Option<Target> {
        let enabled = match fallback {
            None => self.page.exists(selector).await.unwrap_or(false),
            Some(_) => matches!(self.page.is_enabled(selector).await, Ok(Some(true))),
        };
        let fallback_present = match fallback {
            Some(fallback) => self.page.exists(fallback).await.unwrap_or(false),
            None => false,
        };
        (enabled || fallback_present).then_some(Target {
            primary_enabled: enabled,
            fallback_present,
        })
    }
}
