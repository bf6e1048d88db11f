//! Busy-overlay detection and the polling primitive every wait is built on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::page::Page;

/// Overlay PrimeFaces shows while a partial-page update is in flight.
pub const BUSY_OVERLAY: &str = ".blockUI.blockMsg.blockElement.pe-blockui";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Runs `probe` immediately and then every `interval` until it yields a
/// value, `timeout` elapses, or `cancel` fires. Cancellation interrupts the
/// sleep between probes.
pub async fn poll_until<T, F, Fut>(
    mut probe: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if let Some(value) = probe().await {
            return PollOutcome::Ready(value);
        }
        if Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }
        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = sleep(interval) => {}
        }
    }
}

/// Sleeps for `duration` unless cancelled first. Returns false on cancel.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idle {
    Ready,
    /// Timed out with the overlay still up; callers proceed anyway.
    TimedOut,
    Cancelled,
}

#[derive(Clone)]
pub struct LoadingGate {
    page: Arc<dyn Page>,
    timings: Timings,
}

impl LoadingGate {
    pub fn new(page: Arc<dyn Page>, timings: Timings) -> Self {
        Self { page, timings }
    }

    /// A probe failure counts as "not busy".
    pub async fn is_busy(&self) -> bool {
        match self.page.exists(BUSY_OVERLAY).await {
            Ok(busy) => {
                if busy {
                    debug!("loading overlay present");
                }
                busy
            }
            Err(e) => {
                warn!(error = %e, "loading overlay probe failed, assuming idle");
                false
            }
        }
    }

    pub async fn await_idle(&self, cancel: &CancellationToken) -> Idle {
        self.await_idle_for(self.timings.idle_timeout, cancel).await
    }

    pub async fn await_idle_for(&self, timeout: Duration, cancel: &CancellationToken) -> Idle {
        let outcome = poll_until(
            move || async move { (!self.is_busy().await).then_some(()) },
            self.timings.idle_poll,
            timeout,
            cancel,
        )
        .await;
        match outcome {
            PollOutcome::Ready(()) => Idle::Ready,
            PollOutcome::TimedOut => {
                warn!(timeout_ms = timeout.as_millis() as u64, "loading overlay still present, continuing");
                Idle::TimedOut
            }
            PollOutcome::Cancelled => {
                info!("wait for loading overlay cancelled");
                Idle::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::memory::{MemoryElement, MemoryPage};

    #[tokio::test(start_paused = true)]
    async fn await_idle_resolves_once_the_overlay_goes_away() {
        let page = Arc::new(MemoryPage::new());
        page.insert(BUSY_OVERLAY, MemoryElement::default());
        let gate = LoadingGate::new(page.clone(), Timings::default());

        let remover = {
            let page = page.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(700)).await;
                page.remove(BUSY_OVERLAY);
            })
        };

        let start = Instant::now();
        assert_eq!(gate.await_idle(&CancellationToken::new()).await, Idle::Ready);
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert!(start.elapsed() < Duration::from_secs(2));
        remover.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn await_idle_never_blocks_past_its_timeout() {
        let page = Arc::new(MemoryPage::new());
        page.insert(BUSY_OVERLAY, MemoryElement::default());
        let gate = LoadingGate::new(page, Timings::default());

        let start = Instant::now();
        let outcome = gate
            .await_idle_for(Duration::from_secs(3), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Idle::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_long_poll() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome: PollOutcome<()> = poll_until(
            || async { None },
            Duration::from_secs(10),
            Duration::from_secs(60),
            &cancel,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
