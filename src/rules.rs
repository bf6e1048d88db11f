//! Business rules applied to one reading of the form.
//!
//! `serviceInitiateur` backs two concepts: the initiating service (rule D)
//! and, for non SM/SN records, the signalling service (rule E). Both read
//! the same input.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::locator::FieldName;

static NEO_TEST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)NEO-?TEST").unwrap());
static FRANCK_DESMIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)FRANCK DESMIS").unwrap());
static FIVE_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}$").unwrap());
static UNA_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,5}/\d{1,5}/\d{4}$").unwrap());

pub const MSG_FRANCK_DESMIS: &str =
    "La 'Fiche établie par' contient 'FRANCK DESMIS'. (Correction automatique appliquée)";
pub const MSG_RATTACHEMENT_SM: &str = "Lorsque le Type de saisie est 'SM', le champ 'Service de rattachement/Terminal de saisie' doit être vide ou égal à 'NEODK'.";
pub const MSG_RATTACHEMENT_DIGITS: &str =
    "Terminal de saisie = code unité à cinq chiffres (de l'unité dotée du matériel)";
pub const MSG_INITIATEUR_REQUIRED: &str = "Sans IDPP/GASPARD (ou si ignoré), le 'Service initiateur' est obligatoire (quand Type Saisie != SM).";
pub const MSG_INITIATEUR_FORMAT: &str = "Sans IDPP/GASPARD (ou si ignoré), le 'Service initiateur' doit contenir des lettres et des chiffres (quand Type Saisie != SM).";
pub const MSG_SIGNALISATION_RDK: &str = "Service de signalisation = unité qui a réalisé le RDK.";
pub const MSG_UNA_FORMAT: &str = "L'UNA doit être au format 5/5/4";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValues {
    pub type_de_signalisation: String,
    pub nom: String,
    pub prenom: String,
    pub service_initiateur: String,
    pub una: String,
    pub fiche_etablie_par: String,
    pub service_rattachement: String,
}

impl FieldValues {
    pub fn get(&self, field: FieldName) -> &str {
        match field {
            FieldName::TypeDeSignalisation => &self.type_de_signalisation,
            FieldName::Nom => &self.nom,
            FieldName::Prenom => &self.prenom,
            FieldName::ServiceInitiateur => &self.service_initiateur,
            FieldName::Una => &self.una,
            FieldName::FicheEtabliePar => &self.fiche_etablie_par,
            FieldName::ServiceRattachement => &self.service_rattachement,
            FieldName::IdentifiantGaspard => "",
        }
    }

    pub fn set(&mut self, field: FieldName, value: String) {
        match field {
            FieldName::TypeDeSignalisation => self.type_de_signalisation = value,
            FieldName::Nom => self.nom = value,
            FieldName::Prenom => self.prenom = value,
            FieldName::ServiceInitiateur => self.service_initiateur = value,
            FieldName::Una => self.una = value,
            FieldName::FicheEtabliePar => self.fiche_etablie_par = value,
            FieldName::ServiceRattachement => self.service_rattachement = value,
            FieldName::IdentifiantGaspard => {}
        }
    }
}

/// Fields read for validation, in rule-A probe order.
pub const VALIDATED_FIELDS: [FieldName; 7] = [
    FieldName::TypeDeSignalisation,
    FieldName::Nom,
    FieldName::Prenom,
    FieldName::ServiceInitiateur,
    FieldName::Una,
    FieldName::FicheEtabliePar,
    FieldName::ServiceRattachement,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldStatus {
    Ok,
    Failed,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub per_field_status: BTreeMap<FieldName, FieldStatus>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            errors: Vec::new(),
            per_field_status: VALIDATED_FIELDS
                .iter()
                .map(|field| (*field, FieldStatus::Ok))
                .collect(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn status(&self, field: FieldName) -> FieldStatus {
        self.per_field_status
            .get(&field)
            .copied()
            .unwrap_or(FieldStatus::Ok)
    }

    fn fail(&mut self, field: FieldName, message: impl Into<String>) {
        self.errors.push(message.into());
        self.per_field_status.insert(field, FieldStatus::Failed);
    }

    /// Records a soft error without downgrading a harder one.
    fn warn(&mut self, field: FieldName, message: impl Into<String>) {
        self.errors.push(message.into());
        let status = self.per_field_status.entry(field).or_insert(FieldStatus::Ok);
        if *status != FieldStatus::Failed {
            *status = FieldStatus::Warning;
        }
    }
}

/// Applies every rule. Errors accumulate; no rule short-circuits another.
pub fn validate(values: &FieldValues) -> ValidationResult {
    let mut result = ValidationResult::new();
    let type_saisie = values.type_de_signalisation.to_uppercase();
    let is_sm = type_saisie == "SM";

    // A: first field carrying the test marker.
    if let Some(field) = VALIDATED_FIELDS
        .iter()
        .copied()
        .find(|field| NEO_TEST.is_match(values.get(*field)))
    {
        result.fail(
            field,
            format!(
                "Détection de 'NEO-TEST' dans le champ '{}'. (Correction automatique appliquée)",
                field.label()
            ),
        );
    }

    // B
    if FRANCK_DESMIS.is_match(&values.fiche_etablie_par) {
        result.fail(FieldName::FicheEtabliePar, MSG_FRANCK_DESMIS);
    }

    // C: terminal de saisie.
    let rattachement = &values.service_rattachement;
    if is_sm {
        if !(rattachement.is_empty() || rattachement.to_uppercase() == "NEODK") {
            result.fail(FieldName::ServiceRattachement, MSG_RATTACHEMENT_SM);
        }
    } else if !FIVE_DIGITS.is_match(rattachement) {
        result.fail(FieldName::ServiceRattachement, MSG_RATTACHEMENT_DIGITS);
    }

    if !is_sm {
        // D
        let initiateur = &values.service_initiateur;
        if initiateur.is_empty() {
            result.fail(FieldName::ServiceInitiateur, MSG_INITIATEUR_REQUIRED);
        } else {
            let has_letters = initiateur.chars().any(|c| c.is_ascii_alphabetic());
            let has_digits = initiateur.chars().any(|c| c.is_ascii_digit());
            if !has_letters || !has_digits {
                result.fail(FieldName::ServiceInitiateur, MSG_INITIATEUR_FORMAT);
            }
        }

        // E
        if type_saisie != "SN" {
            let signalisation = initiateur.to_uppercase();
            if signalisation.contains("CELLULE") || signalisation.contains("DEPARTEMENT") {
                result.warn(FieldName::ServiceInitiateur, MSG_SIGNALISATION_RDK);
            }
        }
    }

    // F
    if !UNA_FORMAT.is_match(&values.una) {
        result.fail(FieldName::Una, MSG_UNA_FORMAT);
    }

    info!(errors = result.errors.len(), "rules evaluated");
    result
}
