use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::page::{DossierProgress, LabelProximity, Page};

pub const DOSSIER_COUNTER: &str = "#formValidationCorrection\\:j_idt465";
const DOSSIER_LABEL: &str = "Dossier en cours";

static COUNTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").unwrap());

/// Parses `current/total`.
pub fn parse_counter(text: &str) -> Option<DossierProgress> {
    let caps = COUNTER.captures(text)?;
    let current = caps[1].parse().ok()?;
    let total = caps[2].parse().ok()?;
    Some(DossierProgress {
        current,
        total,
        text: text.trim().to_string(),
    })
}

/// Rounded and clamped to 0..=100. `None` when the total is zero.
pub fn percentage(progress: &DossierProgress) -> Option<u8> {
    if progress.total == 0 {
        return None;
    }
    let ratio = f64::from(progress.current) / f64::from(progress.total) * 100.0;
    Some(ratio.round().clamp(0.0, 100.0) as u8)
}

pub async fn read_dossier(page: &dyn Page) -> Option<DossierProgress> {
    let direct = match page.value(DOSSIER_COUNTER).await {
        Ok(Some(value)) if !value.trim().is_empty() => Some(value),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "dossier counter probe failed");
            None
        }
    };
    let text = match direct {
        Some(text) => text,
        None => match page.value_near_label(DOSSIER_LABEL, LabelProximity::ForOrRow).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "dossier label probe failed");
                return None;
            }
        },
    };
    let parsed = parse_counter(&text);
    if parsed.is_none() {
        debug!(%text, "dossier counter not parsable");
    }
    parsed
}

/// Takes the in-page bar's write lock, pushes, then releases the lock after
/// `release` even when the push fails.
pub async fn push_to_page(page: Arc<dyn Page>, progress: &DossierProgress, release: Duration) {
    if let Err(e) = page.set_progress_lock(true).await {
        warn!(error = %e, "progress lock failed");
    }
    match page.push_progress(progress).await {
        Ok(true) => {}
        Ok(false) => debug!("in-page progress bar not installed"),
        Err(e) => warn!(error = %e, "progress push failed"),
    }
    tokio::spawn(async move {
        tokio::time::sleep(release).await;
        if let Err(e) = page.set_progress_lock(false).await {
            warn!(error = %e, "progress unlock failed");
        }
    });
}
