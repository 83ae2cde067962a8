//! Typed trial records and their boundary decoders.
//!
//! Store documents arrive as untyped JSON. Each of the three entities (patient, baseline,
//! follow-up) has a private wire struct that mirrors the stored field names; decoding goes
//! through `serde_path_to_error` so a malformed record is rejected with the path of the
//! failing field (for example `age` or `patientId`) instead of leaking partial data inward.
//!
//! Patients written by older intake forms store comorbidities and prior drug classes as
//! objects of boolean flags rather than lists. Both shapes decode to the same ordered list.
//!
//! The detailed follow-up blocks (adherence, safety events, physician assessment, patient
//! reported outcomes, data privacy) and baseline counselling are optional: forms older than
//! those blocks simply leave them out.

use crate::constants::{BASELINE_COLLECTION, FOLLOW_UP_COLLECTION, PATIENTS_COLLECTION};
use crate::error::DecodeError;
use crate::store::Document;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use trial_types::{ClinicianId, PatientId};

// ============================================================================
// Public domain-level types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        })
    }
}

/// An anonymised trial participant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    pub clinician_id: ClinicianId,
    /// Anonymised code printed on reports (PT001, ...).
    pub patient_code: String,
    pub age: u32,
    pub gender: Gender,
    pub duration_of_condition_years: f64,
    pub prior_therapies: Vec<String>,
    pub comorbidities: Vec<String>,
    pub rationale: Option<String>,
    pub study_site_code: Option<String>,
    /// Investigator recorded on the intake form, printed in the export header.
    pub investigator_name: Option<String>,
    pub baseline_visit_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The clinical measurements captured by both baseline and follow-up visits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    pub hba1c: f64,
    pub fpg: f64,
    #[serde(default)]
    pub ppg: Option<f64>,
    pub weight: f64,
    pub blood_pressure_systolic: f64,
    pub blood_pressure_diastolic: f64,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub serum_creatinine: Option<f64>,
    #[serde(default)]
    pub egfr: Option<f64>,
    #[serde(default)]
    pub urinalysis: String,
}

/// A single numeric measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Measure {
    Hba1c,
    Fpg,
    Ppg,
    Weight,
    SystolicBp,
    DiastolicBp,
    HeartRate,
    SerumCreatinine,
    Egfr,
}

impl Measure {
    /// Report order.
    pub const ALL: [Measure; 9] = [
        Measure::Hba1c,
        Measure::Fpg,
        Measure::Ppg,
        Measure::Weight,
        Measure::SystolicBp,
        Measure::DiastolicBp,
        Measure::HeartRate,
        Measure::SerumCreatinine,
        Measure::Egfr,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Measure::Hba1c => "HbA1c",
            Measure::Fpg => "FPG",
            Measure::Ppg => "PPG",
            Measure::Weight => "Weight",
            Measure::SystolicBp => "Systolic BP",
            Measure::DiastolicBp => "Diastolic BP",
            Measure::HeartRate => "Heart Rate",
            Measure::SerumCreatinine => "Serum Creatinine",
            Measure::Egfr => "eGFR",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Measure::Hba1c => "%",
            Measure::Fpg | Measure::Ppg | Measure::SerumCreatinine => "mg/dL",
            Measure::Weight => "kg",
            Measure::SystolicBp | Measure::DiastolicBp => "mmHg",
            Measure::HeartRate => "bpm",
            Measure::Egfr => "mL/min/1.73m2",
        }
    }

    /// Whether a relative change is clinically meaningful for this measure.
    pub fn reports_percent_change(self) -> bool {
        !matches!(
            self,
            Measure::SystolicBp | Measure::DiastolicBp | Measure::HeartRate
        )
    }

    /// eGFR is the only measure where an increase is an improvement.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Measure::Egfr)
    }
}

impl Measurements {
    pub fn value(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::Hba1c => Some(self.hba1c),
            Measure::Fpg => Some(self.fpg),
            Measure::Ppg => self.ppg,
            Measure::Weight => Some(self.weight),
            Measure::SystolicBp => Some(self.blood_pressure_systolic),
            Measure::DiastolicBp => Some(self.blood_pressure_diastolic),
            Measure::HeartRate => self.heart_rate,
            Measure::SerumCreatinine => self.serum_creatinine,
            Measure::Egfr => self.egfr,
        }
    }
}

/// Week-0 assessment. At most one exists per patient.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineData {
    pub id: String,
    pub patient_id: PatientId,
    pub measurements: Measurements,
    pub dose_prescribed: String,
    pub treatment_initiation_date: Option<String>,
    pub counselling: Option<Counselling>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// End-of-study assessment. At most one exists per patient.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpData {
    pub id: String,
    pub patient_id: PatientId,
    pub measurements: Measurements,
    pub visit_date: Option<String>,
    pub visit_number: Option<u32>,
    pub adherence: Option<Adherence>,
    pub safety_events: Option<SafetyEvents>,
    pub physician_assessment: Option<PhysicianAssessment>,
    pub patient_reported_outcomes: Option<PatientReportedOutcomes>,
    pub data_privacy: Option<DataPrivacy>,
    /// Top-level ratings written by forms that predate the physician assessment block.
    pub legacy_ratings: Ratings,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FollowUpData {
    /// Compliance, efficacy and tolerability, preferring the physician assessment over the
    /// legacy top-level fields.
    pub fn ratings(&self) -> Ratings {
        let assessed = self.physician_assessment.as_ref();
        fn pick(current: Option<&String>, legacy: &Option<String>) -> Option<String> {
            let filled = |v: &&String| !v.trim().is_empty();
            current.filter(filled).or(legacy.as_ref().filter(filled)).cloned()
        }

        Ratings {
            compliance: pick(
                assessed.and_then(|a| a.compliance_judgment.as_ref()),
                &self.legacy_ratings.compliance,
            ),
            efficacy: pick(
                assessed.and_then(|a| a.overall_efficacy.as_ref()),
                &self.legacy_ratings.efficacy,
            ),
            tolerability: pick(
                assessed.and_then(|a| a.overall_tolerability.as_ref()),
                &self.legacy_ratings.tolerability,
            ),
        }
    }
}

/// Counselling given at the baseline visit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Counselling {
    pub diet_and_lifestyle: bool,
    pub hypoglycemia_awareness: bool,
    // Stored under the intake form's misspelt key.
    #[serde(
        rename = "utiGenitialInfectionAwareness",
        alias = "utiGenitalInfectionAwareness"
    )]
    pub genital_infection_awareness: bool,
    pub hydration_advice: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Adherence {
    #[serde(rename = "patientContinuingTreatment")]
    pub continuing_treatment: bool,
    pub discontinuation_reason: Option<String>,
    /// A count (`0`) or one of the bucket labels (`1–2`, `3–5`, `>5`).
    #[serde(rename = "missedDosesInLast7Days", deserialize_with = "text_or_number")]
    pub missed_doses_last_7_days: Option<String>,
    pub add_on_or_changed_therapy: bool,
    pub add_on_or_changed_therapy_details: Option<String>,
}

/// Adverse events of special interest reported at follow-up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SafetyEvents {
    pub hypoglycemia_mild: bool,
    pub hypoglycemia_moderate: bool,
    pub hypoglycemia_severe: bool,
    pub uti: bool,
    pub genital_mycotic_infection: bool,
    pub dizziness_dehydration_symptoms: bool,
    pub hospitalization_or_er_visit: bool,
    pub hospitalization_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhysicianAssessment {
    pub overall_efficacy: Option<String>,
    pub overall_tolerability: Option<String>,
    pub compliance_judgment: Option<String>,
    #[serde(rename = "preferKcMeSempaForLongTerm")]
    pub prefer_long_term: bool,
    pub preferred_patient_profiles: Option<PreferredProfiles>,
}

/// Patient groups the physician would prefer the therapy for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferredProfiles {
    pub uncontrolled_t2dm: bool,
    pub obese_t2dm: bool,
    pub ckd_patients: bool,
    pub htn_plus_t2dm: bool,
    pub elderly_patients: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientReportedOutcomes {
    pub overall_satisfaction: Option<String>,
    pub gi_tolerance_vs_prior_therapy: Option<String>,
    pub confidence_in_managing_diabetes: Option<String>,
    pub additional_comments: Option<String>,
}

/// Data-handling attestations made at follow-up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataPrivacy {
    pub no_personal_identifiers_recorded: bool,
    pub data_collected_as_routine_clinical_practice: bool,
    pub patient_identity_mapping_at_clinic_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ratings {
    pub compliance: Option<String>,
    pub efficacy: Option<String>,
    pub tolerability: Option<String>,
}

/// The two assessment kinds tracked per patient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentKind {
    Baseline,
    FollowUp,
}

impl AssessmentKind {
    /// Flat top-level collection holding this kind of assessment.
    pub fn collection(self) -> &'static str {
        match self {
            AssessmentKind::Baseline => BASELINE_COLLECTION,
            AssessmentKind::FollowUp => FOLLOW_UP_COLLECTION,
        }
    }
}

impl std::fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AssessmentKind::Baseline => "baseline",
            AssessmentKind::FollowUp => "follow-up",
        })
    }
}

// ============================================================================
// Decoders
// ============================================================================

impl Patient {
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let wire: PatientWire = decode_wire(PATIENTS_COLLECTION, doc)?;
        let id = document_id(PATIENTS_COLLECTION, doc)?;

        let prior_therapies = match (wire.previous_therapy, wire.previous_drug_classes) {
            (Some(list), _) => list,
            (None, Some(flags)) => flags.into_labels(DRUG_CLASS_LABELS),
            (None, None) => Vec::new(),
        };
        let comorbidities = wire
            .comorbidities
            .map(|c| c.into_labels(COMORBIDITY_LABELS))
            .unwrap_or_default();

        Ok(Patient {
            id,
            clinician_id: wire.doctor_id,
            patient_code: wire.patient_code,
            age: wire.age,
            gender: wire.gender,
            duration_of_condition_years: wire.duration_of_diabetes,
            prior_therapies,
            comorbidities,
            rationale: non_blank(wire.reason_for_therapy),
            study_site_code: non_blank(wire.study_site_code),
            investigator_name: non_blank(wire.investigator_name),
            baseline_visit_date: non_blank(wire.baseline_visit_date),
            created_at: wire.created_at,
        })
    }
}

impl BaselineData {
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let wire: BaselineWire = decode_wire(BASELINE_COLLECTION, doc)?;
        Ok(BaselineData {
            id: doc.id.clone(),
            patient_id: wire.patient_id,
            measurements: wire.measurements,
            dose_prescribed: wire.dose_prescribed,
            treatment_initiation_date: wire.treatment_initiation_date,
            counselling: wire.counseling,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        })
    }
}

impl FollowUpData {
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let wire: FollowUpWire = decode_wire(FOLLOW_UP_COLLECTION, doc)?;
        Ok(FollowUpData {
            id: doc.id.clone(),
            patient_id: wire.patient_id,
            measurements: wire.measurements,
            visit_date: wire.visit_date,
            visit_number: wire.visit_number,
            adherence: wire.adherence,
            safety_events: wire.events_of_special_interest,
            physician_assessment: wire.physician_assessment,
            patient_reported_outcomes: wire.patient_reported_outcomes,
            data_privacy: wire.data_privacy,
            legacy_ratings: Ratings {
                compliance: wire.compliance,
                efficacy: wire.efficacy,
                tolerability: wire.tolerability,
            },
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        })
    }
}

/// Decodes every document of a snapshot, logging and skipping malformed ones.
pub fn decode_snapshot<T>(
    docs: &[Document],
    decode: impl Fn(&Document) -> Result<T, DecodeError>,
) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

fn decode_wire<T: DeserializeOwned>(
    collection: &'static str,
    doc: &Document,
) -> Result<T, DecodeError> {
    serde_path_to_error::deserialize::<_, T>(&doc.data).map_err(|err| {
        let path = err.path().to_string();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        DecodeError {
            collection,
            id: doc.id.clone(),
            path,
            message: err.into_inner().to_string(),
        }
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts a string or a bare number, keeping the number's JSON text.
fn text_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(de)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(n) => n.to_string(),
    }))
}

fn document_id(collection: &'static str, doc: &Document) -> Result<PatientId, DecodeError> {
    PatientId::new(&doc.id).map_err(|e| DecodeError {
        collection,
        id: doc.id.clone(),
        path: "<id>".into(),
        message: e.to_string(),
    })
}

// ============================================================================
// Wire types (internal)
// ============================================================================

const COMORBIDITY_LABELS: &[(&str, &str)] = &[
    ("hypertension", "HTN"),
    ("dyslipidemia", "Dyslipidemia"),
    ("obesity", "Obesity"),
    ("ascvd", "ASCVD"),
    ("heartFailure", "Heart Failure"),
    ("chronicKidneyDisease", "CKD"),
];

const DRUG_CLASS_LABELS: &[(&str, &str)] = &[
    ("metformin", "Metformin"),
    ("sulfonylurea", "Sulfonylurea"),
    ("dpp4Inhibitor", "DPP4i"),
    ("sglt2Inhibitor", "SGLT2i"),
    ("tzd", "TZD"),
    ("insulin", "Insulin"),
];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatientWire {
    doctor_id: ClinicianId,
    patient_code: String,
    age: u32,
    gender: Gender,
    duration_of_diabetes: f64,
    #[serde(default)]
    previous_therapy: Option<Vec<String>>,
    #[serde(default)]
    previous_drug_classes: Option<ConditionsWire>,
    #[serde(default)]
    comorbidities: Option<ConditionsWire>,
    #[serde(default)]
    reason_for_therapy: Option<String>,
    #[serde(default)]
    study_site_code: Option<String>,
    #[serde(default)]
    investigator_name: Option<String>,
    #[serde(default)]
    baseline_visit_date: Option<String>,
    created_at: DateTime<Utc>,
}

/// Either a plain list or the older object-of-flags shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionsWire {
    List(Vec<String>),
    Flags(BTreeMap<String, Value>),
}

impl ConditionsWire {
    fn into_labels(self, known: &[(&str, &str)]) -> Vec<String> {
        let flags = match self {
            ConditionsWire::List(list) => return list,
            ConditionsWire::Flags(flags) => flags,
        };
        let is_set = |key: &str| matches!(flags.get(key), Some(Value::Bool(true)));

        let mut labels: Vec<String> = known
            .iter()
            .filter(|(key, _)| is_set(key))
            .map(|(_, label)| (*label).to_string())
            .collect();

        // Unrecognised flags keep their key; free-text entries live under "other".
        labels.extend(
            flags
                .keys()
                .filter(|key| is_set(key) && !known.iter().any(|(k, _)| k == key))
                .cloned(),
        );
        if let Some(Value::Array(other)) = flags.get("other") {
            labels.extend(
                other
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string),
            );
        }
        labels
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BaselineWire {
    patient_id: PatientId,
    #[serde(flatten)]
    measurements: Measurements,
    #[serde(default)]
    dose_prescribed: String,
    #[serde(default)]
    treatment_initiation_date: Option<String>,
    #[serde(default)]
    counseling: Option<Counselling>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowUpWire {
    patient_id: PatientId,
    #[serde(flatten)]
    measurements: Measurements,
    #[serde(default)]
    visit_date: Option<String>,
    #[serde(default)]
    visit_number: Option<u32>,
    #[serde(default)]
    adherence: Option<Adherence>,
    #[serde(default)]
    events_of_special_interest: Option<SafetyEvents>,
    #[serde(default)]
    physician_assessment: Option<PhysicianAssessment>,
    #[serde(default)]
    patient_reported_outcomes: Option<PatientReportedOutcomes>,
    #[serde(default)]
    data_privacy: Option<DataPrivacy>,
    #[serde(default)]
    compliance: Option<String>,
    #[serde(default)]
    efficacy: Option<String>,
    #[serde(default)]
    tolerability: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient_doc() -> Document {
        Document::new(
            "p1",
            json!({
                "doctorId": "doc-1",
                "patientCode": "PT001",
                "age": 54,
                "gender": "Female",
                "durationOfDiabetes": 7.5,
                "previousTherapy": ["Metformin", "DPP4i"],
                "comorbidities": ["HTN"],
                "reasonForTherapy": "Inadequate glycaemic control",
                "createdAt": "2025-01-10T09:30:00Z"
            }),
        )
    }

    #[test]
    fn decodes_patient() {
        let patient = Patient::from_document(&patient_doc()).expect("valid patient");
        assert_eq!(patient.id.as_str(), "p1");
        assert_eq!(patient.clinician_id.as_str(), "doc-1");
        assert_eq!(patient.gender, Gender::Female);
        assert_eq!(patient.prior_therapies, vec!["Metformin", "DPP4i"]);
        assert_eq!(patient.rationale.as_deref(), Some("Inadequate glycaemic control"));
    }

    #[test]
    fn decodes_flag_shaped_conditions_in_table_order() {
        let doc = Document::new(
            "p2",
            json!({
                "doctorId": "doc-1",
                "patientCode": "PT002",
                "age": 61,
                "gender": "Male",
                "durationOfDiabetes": 12,
                "previousDrugClasses": {"insulin": true, "metformin": true, "tzd": false, "other": ["Acarbose"]},
                "comorbidities": {"obesity": true, "hypertension": true, "gout": true, "ckdEgfrCategory": "60–89", "other": []},
                "createdAt": "2025-02-01T00:00:00Z"
            }),
        );

        let patient = Patient::from_document(&doc).expect("valid patient");
        assert_eq!(patient.prior_therapies, vec!["Metformin", "Insulin", "Acarbose"]);
        assert_eq!(patient.comorbidities, vec!["HTN", "Obesity", "gout"]);
        assert!(patient.rationale.is_none());
    }

    #[test]
    fn rejects_patient_with_wrong_field_type() {
        let mut doc = patient_doc();
        doc.data["age"] = json!("old");

        let err = Patient::from_document(&doc).expect_err("age must be numeric");
        assert_eq!(err.collection, PATIENTS_COLLECTION);
        assert_eq!(err.id, "p1");
        assert_eq!(err.path, "age");
    }

    #[test]
    fn rejects_patient_with_empty_owner() {
        let mut doc = patient_doc();
        doc.data["doctorId"] = json!("  ");

        let err = Patient::from_document(&doc).expect_err("owner must be non-empty");
        assert_eq!(err.path, "doctorId");
    }

    #[test]
    fn decodes_baseline_with_optional_measurements() {
        let doc = Document::new(
            "b1",
            json!({
                "patientId": "p1",
                "hba1c": 8.4,
                "fpg": 160,
                "weight": 82.5,
                "bloodPressureSystolic": 138,
                "bloodPressureDiastolic": 86,
                "egfr": 74,
                "urinalysis": "Normal",
                "dosePrescribed": "10/5/1000 mg",
                "createdAt": "2025-01-10T10:00:00Z"
            }),
        );

        let baseline = BaselineData::from_document(&doc).expect("valid baseline");
        assert_eq!(baseline.patient_id.as_str(), "p1");
        assert_eq!(baseline.measurements.value(Measure::Fpg), Some(160.0));
        assert_eq!(baseline.measurements.value(Measure::Egfr), Some(74.0));
        assert_eq!(baseline.measurements.value(Measure::Ppg), None);
        assert!(baseline.updated_at.is_none());
    }

    #[test]
    fn rejects_follow_up_with_bad_patient_reference() {
        let doc = Document::new(
            "f1",
            json!({
                "patientId": 42,
                "hba1c": 7.1,
                "fpg": 120,
                "weight": 80,
                "bloodPressureSystolic": 128,
                "bloodPressureDiastolic": 80,
                "createdAt": "2025-04-10T10:00:00Z"
            }),
        );

        let err = FollowUpData::from_document(&doc).expect_err("patientId must be a string");
        assert_eq!(err.collection, FOLLOW_UP_COLLECTION);
        assert_eq!(err.path, "patientId");
    }

    #[test]
    fn decode_snapshot_skips_malformed_records() {
        let mut broken = patient_doc();
        broken.id = "p9".into();
        broken.data["gender"] = json!("Unknown");

        let patients = decode_snapshot(&[patient_doc(), broken], Patient::from_document);
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].id.as_str(), "p1");
    }

    fn follow_up_doc(extra: Value) -> Document {
        let mut data = json!({
            "patientId": "p1",
            "hba1c": 7.1,
            "fpg": 120,
            "weight": 80,
            "bloodPressureSystolic": 128,
            "bloodPressureDiastolic": 80,
            "createdAt": "2025-04-10T10:00:00Z"
        });
        if let (Some(target), Value::Object(extra)) = (data.as_object_mut(), extra) {
            target.extend(extra);
        }
        Document::new("f1", data)
    }

    #[test]
    fn decodes_detailed_follow_up_blocks() {
        let doc = follow_up_doc(json!({
            "adherence": {
                "patientContinuingTreatment": false,
                "discontinuationReason": "Cost",
                "missedDosesInLast7Days": "3–5",
                "addOnOrChangedTherapy": true
            },
            "eventsOfSpecialInterest": {"uti": true, "hospitalizationOrErVisit": true, "hospitalizationReason": "Dehydration"},
            "physicianAssessment": {
                "overallEfficacy": "Good",
                "complianceJudgment": "Excellent",
                "preferKcMeSempaForLongTerm": true,
                "preferredPatientProfiles": {"obeseT2dm": true, "elderlyPatients": true}
            },
            "patientReportedOutcomes": {"overallSatisfaction": "Satisfied"},
            "dataPrivacy": {"noPersonalIdentifiersRecorded": true}
        }));

        let follow_up = FollowUpData::from_document(&doc).expect("valid follow-up");

        let adherence = follow_up.adherence.expect("adherence block");
        assert!(!adherence.continuing_treatment);
        assert_eq!(adherence.missed_doses_last_7_days.as_deref(), Some("3–5"));
        assert!(adherence.add_on_or_changed_therapy_details.is_none());

        let events = follow_up.safety_events.expect("safety block");
        assert!(events.uti && events.hospitalization_or_er_visit);
        assert!(!events.hypoglycemia_severe);

        let physician = follow_up.physician_assessment.expect("physician block");
        assert!(physician.prefer_long_term);
        let profiles = physician.preferred_patient_profiles.expect("profiles");
        assert!(profiles.obese_t2dm && profiles.elderly_patients && !profiles.ckd_patients);

        let privacy = follow_up.data_privacy.expect("privacy block");
        assert!(privacy.no_personal_identifiers_recorded);
        assert!(!privacy.patient_identity_mapping_at_clinic_only);
    }

    #[test]
    fn missed_doses_accepts_a_bare_count() {
        let doc = follow_up_doc(json!({"adherence": {"missedDosesInLast7Days": 0}}));
        let follow_up = FollowUpData::from_document(&doc).expect("valid follow-up");
        let adherence = follow_up.adherence.expect("adherence block");
        assert_eq!(adherence.missed_doses_last_7_days.as_deref(), Some("0"));
        assert!(!adherence.continuing_treatment);
    }

    #[test]
    fn follow_up_without_detail_blocks_still_decodes() {
        let follow_up = FollowUpData::from_document(&follow_up_doc(json!({}))).expect("valid");
        assert!(follow_up.adherence.is_none());
        assert!(follow_up.physician_assessment.is_none());
        assert_eq!(follow_up.ratings(), Ratings::default());
    }

    #[test]
    fn malformed_detail_block_reports_its_path() {
        let doc = follow_up_doc(json!({"dataPrivacy": {"noPersonalIdentifiersRecorded": "yes"}}));
        let err = FollowUpData::from_document(&doc).expect_err("flag must be boolean");
        assert_eq!(err.path, "dataPrivacy.noPersonalIdentifiersRecorded");
    }

    #[test]
    fn ratings_prefer_the_physician_assessment() {
        let doc = follow_up_doc(json!({
            "compliance": "Fair",
            "efficacy": "Poor",
            "tolerability": "Good",
            "physicianAssessment": {"complianceJudgment": "Excellent", "overallEfficacy": " "}
        }));
        let ratings = FollowUpData::from_document(&doc).expect("valid").ratings();
        assert_eq!(ratings.compliance.as_deref(), Some("Excellent"));
        // A blank assessed value falls back to the legacy field.
        assert_eq!(ratings.efficacy.as_deref(), Some("Poor"));
        assert_eq!(ratings.tolerability.as_deref(), Some("Good"));
    }

    #[test]
    fn decodes_counselling_and_investigator_details() {
        let mut doc = patient_doc();
        doc.data["studySiteCode"] = json!("SITE-04");
        doc.data["investigatorName"] = json!("Dr. Rao");
        doc.data["baselineVisitDate"] = json!("");
        let patient = Patient::from_document(&doc).expect("valid patient");
        assert_eq!(patient.study_site_code.as_deref(), Some("SITE-04"));
        assert_eq!(patient.investigator_name.as_deref(), Some("Dr. Rao"));
        assert!(patient.baseline_visit_date.is_none());

        let baseline = BaselineData::from_document(&Document::new(
            "b1",
            json!({
                "patientId": "p1",
                "hba1c": 8.4,
                "fpg": 160,
                "weight": 82.5,
                "bloodPressureSystolic": 138,
                "bloodPressureDiastolic": 86,
                "counseling": {"dietAndLifestyle": true, "utiGenitialInfectionAwareness": true},
                "createdAt": "2025-01-10T10:00:00Z"
            }),
        ))
        .expect("valid baseline");
        let counselling = baseline.counselling.expect("counselling block");
        assert!(counselling.diet_and_lifestyle && counselling.genital_infection_awareness);
        assert!(!counselling.hydration_advice);
    }

    #[test]
    fn percent_change_applies_to_laboratory_measures_only() {
        assert!(Measure::Hba1c.reports_percent_change());
        assert!(Measure::Egfr.reports_percent_change());
        assert!(!Measure::SystolicBp.reports_percent_change());
        assert!(!Measure::HeartRate.reports_percent_change());
    }
}
