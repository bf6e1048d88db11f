//! Sensitive NATINF code detection.
//!
//! The reference list is loaded at most once per session. Concurrent
//! callers share the in-flight load, and a failed load is retried on the
//! next pass.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ReferenceSource;
use crate::error::{PageError, ReferenceError};
use crate::locator::PageLayout;
use crate::page::{DomEvent, Page};

static NATINF_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*([A-Z0-9]{1,6})\s*(?:-|$)").unwrap());

pub const COMMENT_AREA: &str = "textarea#formValidationCorrection\\:commentairesEtapes";

const NATINF_SUFFIXES: [&str; 3] = [
    "CodeNATINF1ListeComplete_input",
    "CodeNATINF2ListeComplete_input",
    "CodeNATINF3ListeComplete_input",
];
const DIRECT_PREFIX: &str = "#formValidationCorrection\\:";
const TAB_PREFIX: &str = "#formValidationCorrection\\:tabViewValidationFiche\\:";

const ADVISORY: &str = "NATINF supposant une enquete administrative, veuillez contacter l'unite pour s'assurer que la signalisation est relative a une procedure judiciaire.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    pub codes: HashSet<String>,
    pub version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceDocument {
    #[serde(default)]
    natinf_codes: Vec<Value>,
    #[serde(default)]
    version: Option<Value>,
}

impl ReferenceSet {
    /// Accepts string, number, and `{ "code": ... }` entries. Anything else
    /// is skipped.
    pub fn from_payload(payload: Value) -> Result<Self, ReferenceError> {
        // The relay may hand back the document as a JSON string.
        let payload = match payload {
            Value::String(raw) => serde_json::from_str(&raw)?,
            other => other,
        };
        let document: ReferenceDocument = serde_json::from_value(payload)?;

        let codes = document
            .natinf_codes
            .iter()
            .filter_map(|entry| match entry {
                Value::String(code) => Some(code.clone()),
                Value::Number(code) => Some(code.to_string()),
                Value::Object(fields) => fields.get("code").and_then(|code| match code {
                    Value::String(code) => Some(code.clone()),
                    Value::Number(code) => Some(code.to_string()),
                    _ => None,
                }),
                _ => None,
            })
            .map(|code| code.trim().to_uppercase())
            .filter(|code| !code.is_empty())
            .collect();

        let version = document.version.and_then(|version| match version {
            Value::String(v) => Some(v),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Ok(Self { codes, version })
    }
}

pub struct SensitiveCodes {
    source: ReferenceSource,
    client: reqwest::Client,
    cell: OnceCell<Arc<ReferenceSet>>,
}

impl SensitiveCodes {
    pub fn new(source: ReferenceSource) -> Self {
        Self {
            source,
            client: reqwest::Client::new(),
            cell: OnceCell::new(),
        }
    }

    pub async fn reference(&self) -> Result<Arc<ReferenceSet>, ReferenceError> {
        self.cell
            .get_or_try_init(|| async {
                let set = self.load().await?;
                info!(
                    total = set.codes.len(),
                    version = set.version.as_deref().unwrap_or("-"),
                    "sensitive NATINF list loaded"
                );
                Ok::<_, ReferenceError>(Arc::new(set))
            })
            .await
            .cloned()
    }

    async fn load(&self) -> Result<ReferenceSet, ReferenceError> {
        match self.load_bundled().await {
            Ok(set) => Ok(set),
            Err(e) => {
                warn!(path = %self.source.path.display(), error = %e, "bundled NATINF list unavailable, asking relay");
                self.load_from_relay().await.inspect_err(|e| {
                    warn!(error = %e, "NATINF relay failed");
                })
            }
        }
    }

    async fn load_bundled(&self) -> Result<ReferenceSet, ReferenceError> {
        let raw = tokio::fs::read_to_string(&self.source.path)
            .await
            .map_err(|source| ReferenceError::Read {
                path: self.source.path.display().to_string(),
                source,
            })?;
        ReferenceSet::from_payload(serde_json::from_str(&raw)?)
    }

    async fn load_from_relay(&self) -> Result<ReferenceSet, ReferenceError> {
        let url = self.source.relay_url.as_deref().ok_or(ReferenceError::NoRelay)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReferenceError::Status(status.as_u16()));
        }
        let payload: Value = response.json().await?;
        ReferenceSet::from_payload(payload)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveVerdict {
    pub should_write: bool,
    pub codes: Vec<String>,
    pub message: String,
}

pub fn natinf_selectors(layout: PageLayout) -> Vec<String> {
    let prefixes: &[&str] = match layout {
        PageLayout::TabView => &[TAB_PREFIX],
        PageLayout::Direct => &[DIRECT_PREFIX],
        PageLayout::Unknown | PageLayout::NotFound => &[TAB_PREFIX, DIRECT_PREFIX],
    };
    NATINF_SUFFIXES
        .iter()
        .flat_map(|suffix| prefixes.iter().map(move |prefix| format!("{prefix}{suffix}")))
        .collect()
}

pub fn extract_code(value: &str) -> Option<String> {
    NATINF_CODE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|code| code.as_str().to_uppercase())
}

pub fn advisory_message(codes: &[String]) -> String {
    if codes.is_empty() {
        ADVISORY.to_string()
    } else {
        format!("{ADVISORY} Code(s) detecte(s) : {}", codes.join(", "))
    }
}

/// Fails open: any load or probe error reads as "nothing sensitive".
pub async fn evaluate(
    page: &dyn Page,
    layout: PageLayout,
    reference: &SensitiveCodes,
) -> SensitiveVerdict {
    let set = match reference.reference().await {
        Ok(set) => set,
        Err(e) => {
            warn!(error = %e, "NATINF check skipped");
            return SensitiveVerdict::default();
        }
    };
    if set.codes.is_empty() {
        info!("sensitive NATINF list is empty");
        return SensitiveVerdict::default();
    }

    let mut found: Vec<String> = Vec::new();
    for selector in natinf_selectors(layout) {
        let value = match page.value(&selector).await {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                warn!(%selector, error = %e, "NATINF field probe failed");
                continue;
            }
        };
        if value.is_empty() {
            continue;
        }
        match extract_code(&value) {
            Some(code) => {
                debug!(%selector, %code, "NATINF code extracted");
                if !found.contains(&code) {
                    found.push(code);
                }
            }
            None => debug!(%selector, %value, "NATINF value not recognised"),
        }
    }

    let matches: Vec<String> = found
        .into_iter()
        .filter(|code| set.codes.contains(code))
        .collect();
    if matches.is_empty() {
        return SensitiveVerdict::default();
    }

    info!(codes = ?matches, version = set.version.as_deref().unwrap_or("-"), "sensitive NATINF detected");
    let message = advisory_message(&matches);
    SensitiveVerdict {
        should_write: true,
        codes: matches,
        message,
    }
}

/// Writes `message` into the comment area. In append mode the message is
/// added after a blank line unless already contained; otherwise it replaces
/// the content unless already equal. Returns whether the field changed.
pub async fn ensure_comment(page: &dyn Page, message: &str, append: bool) -> Result<bool, PageError> {
    let message = message.trim();
    if message.is_empty() {
        return Ok(false);
    }
    let Some(current) = page.value(COMMENT_AREA).await? else {
        info!("comment area not found, NATINF message not written");
        return Ok(false);
    };

    let updated = if append {
        if current.contains(message) {
            debug!("NATINF message already present");
            return Ok(false);
        }
        let separator = if current.trim().is_empty() { "" } else { "\n\n" };
        format!("{current}{separator}{message}")
    } else {
        if current.trim() == message {
            debug!("NATINF message already present");
            return Ok(false);
        }
        message.to_string()
    };

    let written = page
        .set_value(
            COMMENT_AREA,
            &updated,
            &[DomEvent::Input, DomEvent::Change, DomEvent::Blur],
        )
        .await?;
    if written {
        info!(append, "NATINF message written to comments");
    }
    Ok(written)
}
