//! In-memory [`Page`] keyed by literal selector strings.
//!
//! Backs the offline `check` command (a recorded snapshot of the form) and
//! the integration tests. Selectors are matched verbatim, no CSS engine.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{DomEvent, DossierProgress, LabelProximity, ModalChoice, Page};
use crate::error::PageError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryElement {
    pub value: Option<String>,
    pub text: Option<String>,
    pub checked: Option<bool>,
    pub disabled: bool,
    pub in_disabled_tab: bool,
}

impl MemoryElement {
    pub fn input(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn radio(checked: bool) -> Self {
        Self {
            checked: Some(checked),
            ..Self::default()
        }
    }

    pub fn button() -> Self {
        Self::default()
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn in_disabled_tab(mut self) -> Self {
        self.in_disabled_tab = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryLabel {
    pub text: String,
    /// Value of the `input` immediately following the label.
    pub next_input: Option<String>,
    /// Value of the element referenced by `for`.
    pub for_value: Option<String>,
    /// Value of the first text input in the label's table row.
    pub row_input: Option<String>,
}

/// Serialized form of a recorded page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub elements: HashMap<String, MemoryElement>,
    pub labels: Vec<MemoryLabel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueWrite {
    pub selector: String,
    pub value: String,
    pub events: Vec<DomEvent>,
}

#[derive(Default)]
struct Dom {
    elements: HashMap<String, MemoryElement>,
    labels: Vec<MemoryLabel>,
    failing_clicks: HashSet<String>,
    clicks: Vec<String>,
    writes: Vec<ValueWrite>,
    highlighted: BTreeSet<String>,
    error_window: Option<Vec<String>>,
    modal_choice: Option<ModalChoice>,
    fresh_load: bool,
    progress_bar: bool,
    progress_lock: bool,
    pushes: Vec<DossierProgress>,
}

pub struct MemoryPage {
    dom: Mutex<Dom>,
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::from_parts(Snapshot::default())
    }

    pub fn from_parts(snapshot: Snapshot) -> Self {
        Self {
            dom: Mutex::new(Dom {
                elements: snapshot.elements,
                labels: snapshot.labels,
                fresh_load: true,
                ..Dom::default()
            }),
        }
    }

    pub fn from_snapshot_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_parts(serde_json::from_str(json)?))
    }

    pub fn load_snapshot(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_snapshot_json(&raw)?)
    }

    pub fn insert(&self, selector: impl Into<String>, element: MemoryElement) {
        self.dom.lock().elements.insert(selector.into(), element);
    }

    pub fn remove(&self, selector: &str) {
        self.dom.lock().elements.remove(selector);
    }

    pub fn add_label(&self, label: MemoryLabel) {
        self.dom.lock().labels.push(label);
    }

    /// Makes every subsequent click on `selector` fail like a throwing
    /// handler would.
    pub fn fail_clicks_on(&self, selector: impl Into<String>) {
        self.dom.lock().failing_clicks.insert(selector.into());
    }

    pub fn install_progress_bar(&self) {
        self.dom.lock().progress_bar = true;
    }

    /// Simulates a navigation: the next `take_page_load` reports true.
    pub fn reload(&self) {
        self.dom.lock().fresh_load = true;
    }

    /// Simulates the user clicking one of the error window's buttons.
    pub fn choose(&self, choice: ModalChoice) {
        self.dom.lock().modal_choice = Some(choice);
    }

    pub fn clicks(&self) -> Vec<String> {
        self.dom.lock().clicks.clone()
    }

    pub fn writes(&self) -> Vec<ValueWrite> {
        self.dom.lock().writes.clone()
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.dom
            .lock()
            .elements
            .get(selector)
            .and_then(|el| el.value.clone())
    }

    pub fn checked(&self, selector: &str) -> Option<bool> {
        self.dom.lock().elements.get(selector).and_then(|el| el.checked)
    }

    pub fn highlighted(&self) -> BTreeSet<String> {
        self.dom.lock().highlighted.clone()
    }

    pub fn error_window(&self) -> Option<Vec<String>> {
        self.dom.lock().error_window.clone()
    }

    pub fn progress_pushes(&self) -> Vec<DossierProgress> {
        self.dom.lock().pushes.clone()
    }

    pub fn progress_locked(&self) -> bool {
        self.dom.lock().progress_lock
    }
}

#[async_trait]
impl Page for MemoryPage {
    async fn exists(&self, selector: &str) -> Result<bool, PageError> {
        Ok(self.dom.lock().elements.contains_key(selector))
    }

    async fn value(&self, selector: &str) -> Result<Option<String>, PageError> {
        Ok(self
            .dom
            .lock()
            .elements
            .get(selector)
            .map(|el| el.value.clone().unwrap_or_default()))
    }

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, PageError> {
        Ok(self
            .dom
            .lock()
            .elements
            .get(selector)
            .map(|el| el.checked.unwrap_or(false)))
    }

    async fn is_enabled(&self, selector: &str) -> Result<Option<bool>, PageError> {
        Ok(self.dom.lock().elements.get(selector).map(|el| !el.disabled))
    }

    async fn in_disabled_tab(&self, selector: &str) -> Result<bool, PageError> {
        Ok(self
            .dom
            .lock()
            .elements
            .get(selector)
            .is_some_and(|el| el.in_disabled_tab))
    }

    async fn click(&self, selector: &str) -> Result<(), PageError> {
        let mut dom = self.dom.lock();
        if dom.failing_clicks.contains(selector) {
            return Err(PageError::Script(format!("click handler threw on {selector}")));
        }
        let element = dom
            .elements
            .get_mut(selector)
            .ok_or_else(|| PageError::NotFound(selector.to_string()))?;
        if element.checked.is_some() {
            element.checked = Some(true);
        }
        dom.clicks.push(selector.to_string());
        Ok(())
    }

    async fn set_value(
        &self,
        selector: &str,
        value: &str,
        events: &[DomEvent],
    ) -> Result<bool, PageError> {
        let mut dom = self.dom.lock();
        let Some(element) = dom.elements.get_mut(selector) else {
            return Ok(false);
        };
        element.value = Some(value.to_string());
        dom.writes.push(ValueWrite {
            selector: selector.to_string(),
            value: value.to_string(),
            events: events.to_vec(),
        });
        Ok(true)
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, PageError> {
        Ok(self
            .dom
            .lock()
            .elements
            .get(selector)
            .and_then(|el| el.text.clone())
            .into_iter()
            .collect())
    }

    async fn value_near_label(
        &self,
        label_text: &str,
        proximity: LabelProximity,
    ) -> Result<Option<String>, PageError> {
        let dom = self.dom.lock();
        let found = dom
            .labels
            .iter()
            .filter(|label| label.text.contains(label_text))
            .find_map(|label| match proximity {
                LabelProximity::NextSibling => label.next_input.clone(),
                LabelProximity::ForOrRow => {
                    label.row_input.clone().or_else(|| label.for_value.clone())
                }
            });
        Ok(found)
    }

    async fn set_highlight(&self, selector: &str, on: bool) -> Result<bool, PageError> {
        let mut dom = self.dom.lock();
        if !dom.elements.contains_key(selector) {
            return Ok(false);
        }
        if on {
            dom.highlighted.insert(selector.to_string());
        } else {
            dom.highlighted.remove(selector);
        }
        Ok(true)
    }

    async fn show_error_window(&self, errors: &[String]) -> Result<(), PageError> {
        self.dom.lock().error_window = Some(errors.to_vec());
        Ok(())
    }

    async fn error_window_present(&self) -> Result<bool, PageError> {
        Ok(self.dom.lock().error_window.is_some())
    }

    async fn close_error_window(&self) -> Result<(), PageError> {
        self.dom.lock().error_window = None;
        Ok(())
    }

    async fn take_modal_choice(&self) -> Result<Option<ModalChoice>, PageError> {
        Ok(self.dom.lock().modal_choice.take())
    }

    async fn take_page_load(&self) -> Result<bool, PageError> {
        Ok(std::mem::take(&mut self.dom.lock().fresh_load))
    }

    async fn push_progress(&self, progress: &DossierProgress) -> Result<bool, PageError> {
        let mut dom = self.dom.lock();
        if !dom.progress_bar {
            return Ok(false);
        }
        dom.pushes.push(progress.clone());
        Ok(true)
    }

    async fn set_progress_lock(&self, locked: bool) -> Result<(), PageError> {
        self.dom.lock().progress_lock = locked;
        Ok(())
    }

    async fn cleanup_progress_bar(&self) -> Result<(), PageError> {
        let mut dom = self.dom.lock();
        dom.pushes.clear();
        dom.progress_lock = false;
        Ok(())
    }
}
