use std::sync::Arc;

use async_trait::async_trait;
use faed_autopilot::page::{DomEvent, DossierProgress, LabelProximity, ModalChoice, Page};
use faed_autopilot::PageError;
use headless_chrome::Tab;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Every snippet is an IIFE returning `JSON.stringify(...)`, so the CDP
/// round trip always carries a plain string we decode ourselves.
fn evaluate_json(tab: &Tab, script: &str) -> Result<Value, PageError> {
    let result = tab
        .evaluate(script, false)
        .map_err(|e| PageError::Script(e.to_string()))?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| PageError::InvalidResponse("snippet returned no string".into()))?;
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| PageError::InvalidResponse(e.to_string()))?;
    if let Some(error) = value.get("__error").and_then(Value::as_str) {
        return Err(PageError::Script(error.to_string()));
    }
    Ok(value)
}

/// JS string literal for `s`.
fn lit(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn wrap(body: &str) -> String {
    format!(
        "(() => {{ try {{ return JSON.stringify((() => {{ {body} }})()); }} \
         catch (e) {{ return JSON.stringify({{ __error: String(e && e.message || e) }}); }} }})()"
    )
}

const HIGHLIGHT_ON: &str = r#"
  if (!el) return false;
  el.style.border = '2px solid red';
  el.style.backgroundColor = '#ffeeee';
  el.title = 'Ce champ contient une erreur';
  el.dataset.faedHighlight = '1';
  const next = el.nextElementSibling;
  if (!next || !next.classList.contains('faed-error-indicator')) {
    const mark = document.createElement('span');
    mark.className = 'faed-error-indicator';
    mark.textContent = '⚠️';
    mark.style.marginLeft = '4px';
    el.insertAdjacentElement('afterend', mark);
  }
  return true;
"#;

const HIGHLIGHT_OFF: &str = r#"
  if (!el) return false;
  if (el.dataset.faedHighlight) {
    el.style.border = '';
    el.style.backgroundColor = '';
    el.removeAttribute('title');
    delete el.dataset.faedHighlight;
  }
  const next = el.nextElementSibling;
  if (next && next.classList.contains('faed-error-indicator')) next.remove();
  return true;
"#;

const ERROR_WINDOW_ID: &str = "faed-error-window";

const SHOW_ERROR_WINDOW: &str = r#"
  const old = document.getElementById(ID);
  if (old) old.remove();
  const box = document.createElement('div');
  box.id = ID;
  box.style.cssText = 'position:fixed;top:20%;left:50%;transform:translateX(-50%);z-index:100000;'
    + 'background:#fff;border:2px solid #c62828;border-radius:8px;padding:16px 20px;'
    + 'max-width:600px;box-shadow:0 8px 24px rgba(0,0,0,.3);font-family:sans-serif;';
  const title = document.createElement('h3');
  title.textContent = 'Erreurs détectées dans la fiche';
  title.style.color = '#c62828';
  box.appendChild(title);
  const list = document.createElement('ul');
  for (const error of ERRORS) {
    const item = document.createElement('li');
    item.textContent = error;
    list.appendChild(item);
  }
  box.appendChild(list);
  const button = (label, choice) => {
    const b = document.createElement('button');
    b.textContent = label;
    b.style.margin = '8px 8px 0 0';
    b.addEventListener('click', () => { window.__faedModalChoice = choice; });
    return b;
  };
  box.appendChild(button('Ignorer et continuer', 'continue'));
  box.appendChild(button('Corriger les erreurs', 'fix'));
  document.body.appendChild(box);
  return true;
"#;

/// [`Page`] over a live Chrome tab.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    async fn run(&self, body: String) -> Result<Value, PageError> {
        let tab = self.tab.clone();
        let script = wrap(&body);
        tokio::task::spawn_blocking(move || evaluate_json(&tab, &script))
            .await
            .map_err(|_| PageError::Disconnected)?
    }

    async fn run_as<T: DeserializeOwned>(&self, body: String) -> Result<T, PageError> {
        let value = self.run(body).await?;
        serde_json::from_value(value).map_err(|e| PageError::InvalidResponse(e.to_string()))
    }

    fn select(selector: &str) -> String {
        format!("const el = document.querySelector({});", lit(selector))
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn exists(&self, selector: &str) -> Result<bool, PageError> {
        self.run_as(format!("{} return !!el;", Self::select(selector))).await
    }

    /// Falls back to the trimmed text for elements without a `value`.
    async fn value(&self, selector: &str) -> Result<Option<String>, PageError> {
        self.run_as(format!(
            "{} if (!el) return null; \
             return ('value' in el) ? String(el.value ?? '') : (el.textContent || '').trim();",
            Self::select(selector)
        ))
        .await
    }

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, PageError> {
        self.run_as(format!("{} return el ? !!el.checked : null;", Self::select(selector)))
            .await
    }

    async fn is_enabled(&self, selector: &str) -> Result<Option<bool>, PageError> {
        self.run_as(format!(
            "{} return el ? !(el.disabled || el.getAttribute('aria-disabled') === 'true') : null;",
            Self::select(selector)
        ))
        .await
    }

    async fn in_disabled_tab(&self, selector: &str) -> Result<bool, PageError> {
        self.run_as(format!(
            "{} const li = el && el.closest('li'); \
             return !!(li && li.classList.contains('ui-state-disabled'));",
            Self::select(selector)
        ))
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), PageError> {
        let found: bool = self
            .run_as(format!("{} if (!el) return false; el.click(); return true;", Self::select(selector)))
            .await?;
        if found {
            debug!(selector, "clicked");
            Ok(())
        } else {
            Err(PageError::NotFound(selector.to_string()))
        }
    }

    async fn set_value(
        &self,
        selector: &str,
        value: &str,
        events: &[DomEvent],
    ) -> Result<bool, PageError> {
        let events: Vec<&str> = events.iter().map(|e| e.as_str()).collect();
        let events = serde_json::to_string(&events).map_err(|e| PageError::Script(e.to_string()))?;
        self.run_as(format!(
            "{} if (!el) return false; el.value = {}; \
             for (const name of {events}) el.dispatchEvent(new Event(name, {{ bubbles: true }})); \
             return true;",
            Self::select(selector),
            lit(value)
        ))
        .await
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, PageError> {
        self.run_as(format!(
            "return Array.from(document.querySelectorAll({})).map(e => e.textContent || '');",
            lit(selector)
        ))
        .await
    }

    async fn value_near_label(
        &self,
        label_text: &str,
        proximity: LabelProximity,
    ) -> Result<Option<String>, PageError> {
        let pick = match proximity {
            LabelProximity::NextSibling => {
                "const next = label.nextElementSibling; \
                 if (next && next.tagName === 'INPUT') return (next.value || '').trim();"
            }
            LabelProximity::ForOrRow => {
                "const row = label.closest('tr'); \
                 const rowInput = row && row.querySelector('input[type=\"text\"], input:not([type])'); \
                 const target = rowInput || (label.htmlFor ? document.getElementById(label.htmlFor) : null); \
                 if (target) return (('value' in target ? target.value : target.textContent) || '').trim();"
            }
        };
        self.run_as(format!(
            "for (const label of document.querySelectorAll('label')) {{ \
               if (!(label.textContent || '').includes({})) continue; {pick} }} \
             return null;",
            lit(label_text)
        ))
        .await
    }

    async fn set_highlight(&self, selector: &str, on: bool) -> Result<bool, PageError> {
        let body = if on { HIGHLIGHT_ON } else { HIGHLIGHT_OFF };
        self.run_as(format!("{} {body}", Self::select(selector))).await
    }

    async fn show_error_window(&self, errors: &[String]) -> Result<(), PageError> {
        let errors = serde_json::to_string(errors).map_err(|e| PageError::Script(e.to_string()))?;
        let body = format!(
            "const ID = {}; const ERRORS = {errors}; {SHOW_ERROR_WINDOW}",
            lit(ERROR_WINDOW_ID)
        );
        self.run(body).await.map(|_| ())
    }

    async fn error_window_present(&self) -> Result<bool, PageError> {
        self.run_as(format!("return !!document.getElementById({});", lit(ERROR_WINDOW_ID)))
            .await
    }

    async fn close_error_window(&self) -> Result<(), PageError> {
        self.run(format!(
            "const el = document.getElementById({}); if (el) el.remove(); return true;",
            lit(ERROR_WINDOW_ID)
        ))
        .await
        .map(|_| ())
    }

    async fn take_modal_choice(&self) -> Result<Option<ModalChoice>, PageError> {
        self.run_as(
            "const c = window.__faedModalChoice || null; window.__faedModalChoice = null; return c;".into(),
        )
        .await
    }

    async fn take_page_load(&self) -> Result<bool, PageError> {
        self.run_as(
            "if (window.__faedAgentSeen) return false; window.__faedAgentSeen = true; return true;".into(),
        )
        .await
    }

    async fn push_progress(&self, progress: &DossierProgress) -> Result<bool, PageError> {
        self.run_as(format!(
            "if (typeof window.t41_updateProgressBarFromAlphaMatchers !== 'function') return false; \
             window.t41_updateProgressBarFromAlphaMatchers({}, {}, {}); return true;",
            progress.current,
            progress.total,
            lit(&progress.text)
        ))
        .await
    }

    async fn set_progress_lock(&self, locked: bool) -> Result<(), PageError> {
        self.run(format!("window.t41_isUpdatingProgressBar = {locked}; return true;"))
            .await
            .map(|_| ())
    }

    async fn cleanup_progress_bar(&self) -> Result<(), PageError> {
        self.run(
            "if (typeof window.t41_cleanupProgressBar === 'function') window.t41_cleanupProgressBar(); \
             return true;"
                .into(),
        )
        .await
        .map(|_| ())
    }
}
