//! DOM mutations that mark a record compliant and narrate what was wrong.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gate::pause;
use crate::locator::{FieldName, PageLayout, resolve_selector};
use crate::natinf::COMMENT_AREA;
use crate::page::{DomEvent, Page};
use crate::rules::{FieldStatus, ValidationResult};

pub const COMPLIANT_RADIO: &str =
    "input#formValidationCorrection\\:decisionValidationAlphaPortraits\\:0";

pub fn numbered(errors: &[String]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, error)| format!("{}. {error}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ticks the "yes" radio, waits for the host framework, then writes the
/// numbered errors into the comment area. Each half logs its own failure
/// and never stops the other. Returns false only if cancelled mid-way.
pub async fn apply_corrections(
    page: &dyn Page,
    errors: &[String],
    settle: Duration,
    cancel: &CancellationToken,
) -> bool {
    info!(count = errors.len(), "applying automatic corrections");

    match page.is_checked(COMPLIANT_RADIO).await {
        Ok(Some(false)) => match page.click(COMPLIANT_RADIO).await {
            Ok(()) => info!("compliant radio ticked"),
            Err(e) => warn!(error = %e, "compliant radio click failed"),
        },
        Ok(Some(true)) => info!("compliant radio already ticked"),
        Ok(None) => warn!(selector = COMPLIANT_RADIO, "compliant radio not found"),
        Err(e) => warn!(error = %e, "compliant radio probe failed"),
    }

    if !pause(settle, cancel).await {
        return false;
    }

    match page
        .set_value(COMMENT_AREA, &numbered(errors), &[DomEvent::Blur])
        .await
    {
        Ok(true) => info!("numbered errors written to comments"),
        Ok(false) => warn!(selector = COMMENT_AREA, "comment area not found"),
        Err(e) => warn!(error = %e, "writing comments failed"),
    }
    true
}

/// Clears previous markers then flags every field that did not pass,
/// falling back to the tab-scoped selector when the resolved one misses.
pub async fn highlight_errors(page: &dyn Page, layout: PageLayout, result: &ValidationResult) {
    for field in FieldName::ALL {
        for selector in resolve_selector(field, layout) {
            if let Err(e) = page.set_highlight(selector, false).await {
                warn!(?field, error = %e, "clearing highlight failed");
            }
        }
    }

    for (field, status) in &result.per_field_status {
        if *status == FieldStatus::Ok {
            continue;
        }
        let primary = resolve_selector(*field, layout)[0];
        let mut marked = matches!(page.set_highlight(primary, true).await, Ok(true));
        if !marked {
            let alternate = field.tab_view_selector();
            if alternate != primary {
                marked = matches!(page.set_highlight(alternate, true).await, Ok(true));
            }
        }
        if marked {
            info!(?field, ?status, "field highlighted");
        } else {
            info!(?field, "field not found for highlighting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::memory::{MemoryElement, MemoryPage};
    use tokio::time::Instant;

    #[test]
    fn errors_are_numbered_one_per_line() {
        let text = numbered(&["first".into(), "second".into()]);
        assert_eq!(text, "1. first\n2. second");
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_yes_then_writes_comment_after_the_pause() {
        let page = MemoryPage::new();
        page.insert(COMPLIANT_RADIO, MemoryElement::radio(false));
        page.insert(COMMENT_AREA, MemoryElement::input(""));

        let start = Instant::now();
        let done = apply_corrections(
            &page,
            &["a".into(), "b".into()],
            Duration::from_millis(500),
            &CancellationToken::new(),
        )
        .await;

        assert!(done);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(page.checked(COMPLIANT_RADIO), Some(true));
        assert_eq!(page.value_of(COMMENT_AREA).as_deref(), Some("1. a\n2. b"));
        assert_eq!(page.writes()[0].events, vec![DomEvent::Blur]);
    }

    #[tokio::test(start_paused = true)]
    async fn already_ticked_radio_is_left_alone() {
        let page = MemoryPage::new();
        page.insert(COMPLIANT_RADIO, MemoryElement::radio(true));
        apply_corrections(&page, &["a".into()], Duration::ZERO, &CancellationToken::new()).await;
        assert!(page.clicks().is_empty());
    }
}
