//! Page-layout detection and logical-field selector resolution.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::page::{LabelProximity, Page};

pub const FORM_ROOT: &str = "#formValidationCorrection";
pub const TAB_VIEW_ANCHOR: &str = "#formValidationCorrection\\:tabViewValidationFiche\\:nom";
pub const DIRECT_ANCHOR: &str = "#formValidationCorrection\\:nom";
pub const TITLE_ZONE: &str = "div.zoneTitre";
pub const CONTROL_SHEET_TITLE: &str = "CONTROLE DE LA FICHE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageLayout {
    /// Fields live under the `tabViewValidationFiche` container.
    TabView,
    Direct,
    /// The form is there but neither anchor field is.
    Unknown,
    NotFound,
}

impl PageLayout {
    pub fn is_resolved(self) -> bool {
        matches!(self, PageLayout::TabView | PageLayout::Direct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    TypeDeSignalisation,
    Nom,
    Prenom,
    ServiceInitiateur,
    Una,
    FicheEtabliePar,
    ServiceRattachement,
    IdentifiantGaspard,
}

impl FieldName {
    pub const ALL: [FieldName; 8] = [
        FieldName::IdentifiantGaspard,
        FieldName::TypeDeSignalisation,
        FieldName::ServiceInitiateur,
        FieldName::Una,
        FieldName::FicheEtabliePar,
        FieldName::ServiceRattachement,
        FieldName::Nom,
        FieldName::Prenom,
    ];

    /// Label shown to the operator in error messages.
    pub fn label(self) -> &'static str {
        match self {
            FieldName::TypeDeSignalisation => "Type de saisie",
            FieldName::Nom => "Nom",
            FieldName::Prenom => "Prénom(s)",
            FieldName::ServiceInitiateur => "Service initiateur",
            FieldName::Una => "Proc/UNA",
            FieldName::FicheEtabliePar => "Fiche établie par",
            FieldName::ServiceRattachement => "Service de rattachement",
            FieldName::IdentifiantGaspard => "IDPP/GASPARD",
        }
    }

    /// (TabView selector, Direct selector).
    fn selectors(self) -> (&'static str, &'static str) {
        match self {
            FieldName::ServiceInitiateur => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:ServiceSignalisationListeActive_input",
                "#formValidationCorrection\\:ServiceSignalisationListeActive_input",
            ),
            FieldName::Una => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:NumeroProcedure",
                "#formValidationCorrection\\:NumeroProcedure",
            ),
            FieldName::ServiceRattachement => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:ServiceRattachement",
                "#formValidationCorrection\\:serviceRattachement",
            ),
            FieldName::FicheEtabliePar => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:ficheEtabliePar",
                "#formValidationCorrection\\:ficheEtabliePar",
            ),
            FieldName::Nom => (TAB_VIEW_ANCHOR, DIRECT_ANCHOR),
            FieldName::Prenom => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:prenom",
                "#formValidationCorrection\\:prenom",
            ),
            FieldName::IdentifiantGaspard => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:identifiantGaspard",
                "#formValidationCorrection\\:identifiantGaspard",
            ),
            FieldName::TypeDeSignalisation => (
                "#formValidationCorrection\\:tabViewValidationFiche\\:typeDeSignalisationValue",
                "#formValidationCorrection\\:typeDeSignalisationValue",
            ),
        }
    }

    pub fn tab_view_selector(self) -> &'static str {
        self.selectors().0
    }

    pub fn direct_selector(self) -> &'static str {
        self.selectors().1
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Candidate selectors for `field`, in probe order.
pub fn resolve_selector(field: FieldName, layout: PageLayout) -> Vec<&'static str> {
    let (tab, direct) = field.selectors();
    match layout {
        PageLayout::TabView if field == FieldName::TypeDeSignalisation => vec![tab, direct],
        PageLayout::TabView => vec![tab],
        PageLayout::Direct => vec![direct],
        PageLayout::Unknown | PageLayout::NotFound => vec![direct, tab],
    }
}

pub async fn detect_layout(page: &dyn Page) -> PageLayout {
    let probe = |selector: &'static str| async move {
        page.exists(selector).await.unwrap_or_else(|e| {
            warn!(selector, error = %e, "layout probe failed");
            false
        })
    };

    let layout = if probe(TAB_VIEW_ANCHOR).await {
        PageLayout::TabView
    } else if probe(DIRECT_ANCHOR).await {
        PageLayout::Direct
    } else if probe(FORM_ROOT).await {
        PageLayout::Unknown
    } else {
        PageLayout::NotFound
    };
    info!(?layout, "page layout detected");
    layout
}

/// Reads a field's trimmed value through its fallback chain, returning an
/// empty string when every candidate misses.
pub async fn read_field(page: &dyn Page, field: FieldName, layout: PageLayout) -> String {
    for selector in resolve_selector(field, layout) {
        match page.value(selector).await {
            Ok(Some(value)) => {
                let value = value.trim().to_string();
                debug!(?field, selector, %value, "field read");
                return value;
            }
            Ok(None) => {}
            Err(e) => warn!(?field, selector, error = %e, "field read failed"),
        }
    }

    if field == FieldName::TypeDeSignalisation {
        match page.value_near_label("Type", LabelProximity::NextSibling).await {
            Ok(Some(value)) => {
                let value = value.trim().to_string();
                debug!(?field, %value, "field read via label");
                return value;
            }
            Ok(None) => {}
            Err(e) => warn!(?field, error = %e, "label search failed"),
        }
    }

    info!(?field, ?layout, "field not present, reading as empty");
    String::new()
}

pub async fn is_control_sheet(page: &dyn Page) -> bool {
    match page.texts(TITLE_ZONE).await {
        Ok(titles) => {
            let found = titles
                .iter()
                .any(|title| title.trim().to_uppercase() == CONTROL_SHEET_TITLE);
            info!(found, "control sheet check");
            found
        }
        Err(e) => {
            warn!(error = %e, "title probe failed");
            false
        }
    }
}

/// Logs which fallback candidates are present. Read-only.
pub async fn diagnose(page: &dyn Page) {
    info!("layout unresolved, scanning candidate selectors");
    let groups: [(&str, [&str; 3]); 2] = [
        (
            "typeDeSignalisation",
            [
                FieldName::TypeDeSignalisation.direct_selector(),
                FieldName::TypeDeSignalisation.tab_view_selector(),
                "input[id*='typeDeSignalisation']",
            ],
        ),
        (
            "serviceRattachement",
            [
                "#formValidationCorrection\\:ServiceRattachement",
                FieldName::ServiceRattachement.tab_view_selector(),
                "input[id*='ServiceRattachement']",
            ],
        ),
    ];

    for (group, selectors) in groups {
        for selector in selectors {
            match page.value(selector).await {
                Ok(Some(value)) => info!(group, selector, %value, "candidate present"),
                Ok(None) => info!(group, selector, "candidate absent"),
                Err(e) => warn!(group, selector, error = %e, "candidate probe failed"),
            }
        }
    }

    match page.value_near_label("Type", LabelProximity::NextSibling).await {
        Ok(Some(value)) => info!(%value, "input found next to a 'Type' label"),
        Ok(None) => info!("no input next to a 'Type' label"),
        Err(e) => warn!(error = %e, "label scan failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::memory::{MemoryElement, MemoryLabel, MemoryPage};

    fn expected_id(field: FieldName) -> &'static str {
        match field {
            FieldName::ServiceInitiateur => "ServiceSignalisationListeActive_input",
            FieldName::Una => "NumeroProcedure",
            FieldName::TypeDeSignalisation => "typeDeSignalisationValue",
            FieldName::ServiceRattachement => "erviceRattachement",
            FieldName::FicheEtabliePar => "ficheEtabliePar",
            FieldName::Nom => "nom",
            FieldName::Prenom => "prenom",
            FieldName::IdentifiantGaspard => "identifiantGaspard",
        }
    }

    #[test]
    fn resolved_layouts_point_at_the_right_field() {
        for field in FieldName::ALL {
            let tab = resolve_selector(field, PageLayout::TabView);
            assert!(tab[0].starts_with("#formValidationCorrection\\:tabViewValidationFiche\\:"));
            assert!(tab[0].ends_with(expected_id(field)), "{field:?} -> {}", tab[0]);

            let direct = resolve_selector(field, PageLayout::Direct);
            assert_eq!(direct.len(), 1);
            assert!(!direct[0].contains("tabViewValidationFiche"));
            assert!(direct[0].ends_with(expected_id(field)), "{field:?} -> {}", direct[0]);
        }
    }

    #[test]
    fn unresolved_layouts_offer_both_variants() {
        for layout in [PageLayout::Unknown, PageLayout::NotFound] {
            let candidates = resolve_selector(FieldName::Una, layout);
            assert_eq!(
                candidates,
                vec![FieldName::Una.direct_selector(), FieldName::Una.tab_view_selector()]
            );
        }
    }

    #[tokio::test]
    async fn detects_each_layout() {
        let page = MemoryPage::new();
        assert_eq!(detect_layout(&page).await, PageLayout::NotFound);
        page.insert(FORM_ROOT, MemoryElement::default());
        assert_eq!(detect_layout(&page).await, PageLayout::Unknown);
        page.insert(DIRECT_ANCHOR, MemoryElement::input("DUPONT"));
        assert_eq!(detect_layout(&page).await, PageLayout::Direct);
        page.insert(TAB_VIEW_ANCHOR, MemoryElement::input("DUPONT"));
        assert_eq!(detect_layout(&page).await, PageLayout::TabView);
    }

    #[tokio::test]
    async fn type_de_signalisation_falls_back_to_direct_then_label() {
        let page = MemoryPage::new();
        page.add_label(MemoryLabel {
            text: "Type de saisie".into(),
            next_input: Some(" SN ".into()),
            ..MemoryLabel::default()
        });
        assert_eq!(
            read_field(&page, FieldName::TypeDeSignalisation, PageLayout::TabView).await,
            "SN"
        );

        page.insert(
            FieldName::TypeDeSignalisation.direct_selector(),
            MemoryElement::input("SM"),
        );
        assert_eq!(
            read_field(&page, FieldName::TypeDeSignalisation, PageLayout::TabView).await,
            "SM"
        );
    }

    #[tokio::test]
    async fn missing_field_reads_empty() {
        let page = MemoryPage::new();
        assert_eq!(read_field(&page, FieldName::Una, PageLayout::NotFound).await, "");
    }

    #[tokio::test]
    async fn control_sheet_title_is_matched_loosely() {
        let page = MemoryPage::new();
        assert!(!is_control_sheet(&page).await);
        page.insert(TITLE_ZONE, MemoryElement::text("  Controle de la fiche \n"));
        assert!(is_control_sheet(&page).await);
    }
}
