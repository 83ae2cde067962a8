//! Export composition.
//!
//! [`compose`] turns the held (patient, baseline, follow-up) triple into an ordered,
//! renderer-neutral [`ExportDocument`]. It never reads the clock, so composing the same
//! triple twice yields equal documents. [`export`] hands a composed document to an
//! [`ExportRenderer`] and maps its failures to [`ExportError`].
//!
//! Section order is fixed: patient, baseline, follow-up, then comparison and outcomes when
//! both assessments exist, then the follow-up detail sections (adherence, safety events,
//! physician assessment, patient-reported outcomes, data privacy) when a follow-up exists.

use crate::constants::{EXPORT_TITLE, NOT_RECORDED};
use crate::error::ExportError;
use crate::outcomes::{self, signed};
use crate::records::{
    Adherence, BaselineData, Counselling, DataPrivacy, FollowUpData, Measure, Measurements,
    Patient, PatientReportedOutcomes, PhysicianAssessment, Ratings, SafetyEvents,
};
use crate::render::ExportRenderer;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub title: String,
    pub patient_code: String,
    /// Identification printed under the title: patient code, investigator, study site.
    pub header: Vec<Field>,
    /// Suggested file name without extension.
    pub file_stem: String,
    pub sections: Vec<Section>,
}

impl ExportDocument {
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionKind {
    Patient,
    Baseline,
    FollowUp,
    Comparison,
    Outcomes,
    Adherence,
    SafetyEvents,
    PhysicianAssessment,
    PatientReportedOutcomes,
    DataPrivacy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Section {
    pub kind: SectionKind,
    pub heading: String,
    pub body: SectionBody,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum SectionBody {
    Fields(Vec<Field>),
    /// The assessment does not exist yet.
    NotRecorded,
    Comparison(Vec<ComparisonRow>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Field {
    pub label: String,
    pub value: String,
}

impl Field {
    fn new(label: &str, value: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            value: value.into(),
        }
    }
}

/// Baseline against follow-up for one measurement.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub measure: Measure,
    pub label: &'static str,
    pub unit: &'static str,
    pub baseline: f64,
    pub follow_up: f64,
    pub delta: f64,
    pub percent_change: Option<f64>,
    pub improved: bool,
}

impl ComparisonRow {
    fn between(measure: Measure, baseline: &Measurements, follow_up: &Measurements) -> Option<Self> {
        let before = baseline.value(measure)?;
        let after = follow_up.value(measure)?;
        let delta = after - before;

        let percent_change = (measure.reports_percent_change() && before != 0.0)
            .then(|| delta / before * 100.0);
        let improved = if measure.higher_is_better() {
            delta > 0.0
        } else {
            delta < 0.0
        };

        Some(Self {
            measure,
            label: measure.label(),
            unit: measure.unit(),
            baseline: before,
            follow_up: after,
            delta,
            percent_change,
            improved,
        })
    }

    /// Delta with sign and unit, e.g. `-1.20 %`.
    pub fn delta_text(&self) -> String {
        format!("{} {}", signed(self.delta, 2), self.unit)
    }

    pub fn percent_text(&self) -> String {
        match self.percent_change {
            Some(p) => format!("{}%", signed(p, 1)),
            None => "-".to_string(),
        }
    }
}

/// Builds the export document for a patient.
///
/// Missing assessments produce an explicit "Not recorded" section; only a missing patient
/// is an error.
pub fn compose(
    patient: Option<&Patient>,
    baseline: Option<&BaselineData>,
    follow_up: Option<&FollowUpData>,
) -> Result<ExportDocument, ExportError> {
    let patient = patient.ok_or(ExportError::MissingPatient)?;

    let mut sections = vec![
        Section {
            kind: SectionKind::Patient,
            heading: "Patient Information".into(),
            body: SectionBody::Fields(patient_fields(patient)),
        },
        Section {
            kind: SectionKind::Baseline,
            heading: "Baseline Assessment (Week 0)".into(),
            body: baseline
                .map(|b| SectionBody::Fields(baseline_fields(b)))
                .unwrap_or(SectionBody::NotRecorded),
        },
        Section {
            kind: SectionKind::FollowUp,
            heading: "Follow-up Assessment (End of Study)".into(),
            body: follow_up
                .map(|f| SectionBody::Fields(follow_up_fields(f)))
                .unwrap_or(SectionBody::NotRecorded),
        },
    ];

    if let (Some(baseline), Some(follow_up)) = (baseline, follow_up) {
        let before = &baseline.measurements;
        let after = &follow_up.measurements;
        let rows = Measure::ALL
            .iter()
            .filter_map(|m| ComparisonRow::between(*m, before, after))
            .collect();

        sections.push(Section {
            kind: SectionKind::Comparison,
            heading: "Baseline vs Follow-up Comparison".into(),
            body: SectionBody::Comparison(rows),
        });
        sections.push(Section {
            kind: SectionKind::Outcomes,
            heading: "Outcomes".into(),
            body: SectionBody::Fields(outcome_fields(before, after)),
        });
    }

    if let Some(follow_up) = follow_up {
        sections.extend(detail_sections(follow_up));
    }

    Ok(ExportDocument {
        title: EXPORT_TITLE.to_string(),
        patient_code: patient.patient_code.clone(),
        header: vec![
            Field::new("Patient Code", patient.patient_code.as_str()),
            Field::new(
                "Investigator Name",
                optional_text(patient.investigator_name.as_deref()),
            ),
            Field::new(
                "Study Site Code",
                optional_text(patient.study_site_code.as_deref()),
            ),
        ],
        file_stem: format!("CRF_{}", patient.patient_code),
        sections,
    })
}

/// A rendered export ready to be written or served.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedExport {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Renders a composed document.
pub async fn export(
    renderer: &dyn ExportRenderer,
    doc: &ExportDocument,
) -> Result<RenderedExport, ExportError> {
    match renderer.render(doc).await {
        Ok(bytes) => {
            tracing::info!(
                patient_code = %doc.patient_code,
                format = renderer.extension(),
                bytes = bytes.len(),
                "export rendered"
            );
            Ok(RenderedExport {
                file_name: format!("{}.{}", doc.file_stem, renderer.extension()),
                content_type: renderer.content_type(),
                bytes,
            })
        }
        Err(e) => {
            tracing::error!(patient_code = %doc.patient_code, error = %e, "export failed");
            Err(ExportError::Render(e))
        }
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

fn optional(value: Option<f64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_RECORDED.to_string())
}

fn optional_text(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => NOT_RECORDED.to_string(),
    }
}

fn patient_fields(patient: &Patient) -> Vec<Field> {
    vec![
        Field::new("Patient Code", patient.patient_code.as_str()),
        Field::new("Age (years)", patient.age.to_string()),
        Field::new("Gender", patient.gender.to_string()),
        Field::new(
            "Duration of Diabetes",
            format!("{} years", patient.duration_of_condition_years),
        ),
        Field::new("Prior Therapies", list_or_none(&patient.prior_therapies)),
        Field::new("Comorbidities", list_or_none(&patient.comorbidities)),
        Field::new("Reason for Therapy", optional_text(patient.rationale.as_deref())),
        Field::new(
            "Baseline Visit Date",
            optional_text(patient.baseline_visit_date.as_deref()),
        ),
        Field::new("Enrolled", patient.created_at.format("%Y-%m-%d").to_string()),
    ]
}

fn measurement_fields(m: &Measurements) -> Vec<Field> {
    vec![
        Field::new("HbA1c (%)", m.hba1c.to_string()),
        Field::new("FPG (mg/dL)", m.fpg.to_string()),
        Field::new("PPG (mg/dL)", optional(m.ppg)),
        Field::new("Weight (kg)", m.weight.to_string()),
        Field::new(
            "Blood Pressure (mmHg)",
            format!("{}/{}", m.blood_pressure_systolic, m.blood_pressure_diastolic),
        ),
        Field::new("Heart Rate (bpm)", optional(m.heart_rate)),
        Field::new("Serum Creatinine (mg/dL)", optional(m.serum_creatinine)),
        Field::new("eGFR (mL/min/1.73m2)", optional(m.egfr)),
        Field::new("Urinalysis", optional_text(Some(m.urinalysis.as_str()))),
    ]
}

fn baseline_fields(baseline: &BaselineData) -> Vec<Field> {
    let mut fields = measurement_fields(&baseline.measurements);
    fields.push(Field::new(
        "Dose Prescribed",
        optional_text(Some(baseline.dose_prescribed.as_str())),
    ));
    fields.push(Field::new(
        "Date of Initiation",
        optional_text(baseline.treatment_initiation_date.as_deref()),
    ));
    match &baseline.counselling {
        Some(c) => fields.extend(counselling_fields(c)),
        None => fields.push(Field::new("Counselling", NOT_RECORDED)),
    }
    fields
}

fn counselling_fields(c: &Counselling) -> Vec<Field> {
    vec![
        Field::new("Counselling: Diet & Lifestyle", yes_no(c.diet_and_lifestyle)),
        Field::new(
            "Counselling: Hypoglycemia Awareness",
            yes_no(c.hypoglycemia_awareness),
        ),
        Field::new(
            "Counselling: UTI/Genital Infection",
            yes_no(c.genital_infection_awareness),
        ),
        Field::new("Counselling: Hydration Advice", yes_no(c.hydration_advice)),
    ]
}

fn follow_up_fields(follow_up: &FollowUpData) -> Vec<Field> {
    let mut fields = vec![
        Field::new("Visit Date", optional_text(follow_up.visit_date.as_deref())),
        Field::new(
            "Visit Number",
            follow_up
                .visit_number
                .map(|n| n.to_string())
                .unwrap_or_else(|| NOT_RECORDED.to_string()),
        ),
    ];
    fields.extend(measurement_fields(&follow_up.measurements));
    fields
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

fn detail_section<T>(
    kind: SectionKind,
    heading: &str,
    block: Option<&T>,
    fields: impl FnOnce(&T) -> Vec<Field>,
) -> Section {
    Section {
        kind,
        heading: heading.to_string(),
        body: block
            .map(|b| SectionBody::Fields(fields(b)))
            .unwrap_or(SectionBody::NotRecorded),
    }
}

fn detail_sections(follow_up: &FollowUpData) -> [Section; 5] {
    // Older forms only carry the top-level ratings; those still fill the assessment section.
    let ratings = follow_up.ratings();
    let assessment = follow_up.physician_assessment.as_ref();
    let physician = (assessment.is_some() || ratings != Ratings::default())
        .then(|| physician_fields(assessment, &ratings));

    [
        detail_section(
            SectionKind::Adherence,
            "Adherence & Treatment Continuation",
            follow_up.adherence.as_ref(),
            adherence_fields,
        ),
        detail_section(
            SectionKind::SafetyEvents,
            "Safety & Events of Special Interest",
            follow_up.safety_events.as_ref(),
            safety_fields,
        ),
        detail_section(
            SectionKind::PhysicianAssessment,
            "Physician Global Assessment",
            physician.as_ref(),
            |fields| fields.clone(),
        ),
        detail_section(
            SectionKind::PatientReportedOutcomes,
            "Patient-Reported Outcomes",
            follow_up.patient_reported_outcomes.as_ref(),
            reported_outcome_fields,
        ),
        detail_section(
            SectionKind::DataPrivacy,
            "Data Privacy & Confidentiality",
            follow_up.data_privacy.as_ref(),
            privacy_fields,
        ),
    ]
}

fn adherence_fields(a: &Adherence) -> Vec<Field> {
    let mut fields = vec![Field::new("Continuing Treatment", yes_no(a.continuing_treatment))];
    if !a.continuing_treatment {
        fields.push(Field::new(
            "Discontinuation Reason",
            optional_text(a.discontinuation_reason.as_deref()),
        ));
    }
    fields.push(Field::new(
        "Missed Doses (7 days)",
        optional_text(a.missed_doses_last_7_days.as_deref()),
    ));
    fields.push(Field::new(
        "Add-on/Changed Therapy",
        yes_no(a.add_on_or_changed_therapy),
    ));
    if a.add_on_or_changed_therapy {
        fields.push(Field::new(
            "Therapy Details",
            optional_text(a.add_on_or_changed_therapy_details.as_deref()),
        ));
    }
    fields
}

fn safety_fields(e: &SafetyEvents) -> Vec<Field> {
    let mut fields = vec![
        Field::new("Mild Hypoglycemia", yes_no(e.hypoglycemia_mild)),
        Field::new("Moderate Hypoglycemia", yes_no(e.hypoglycemia_moderate)),
        Field::new("Severe Hypoglycemia", yes_no(e.hypoglycemia_severe)),
        Field::new("UTI", yes_no(e.uti)),
        Field::new("Genital Mycotic Infection", yes_no(e.genital_mycotic_infection)),
        Field::new("Dizziness/Dehydration", yes_no(e.dizziness_dehydration_symptoms)),
        Field::new("Hospitalization/ER Visit", yes_no(e.hospitalization_or_er_visit)),
    ];
    if e.hospitalization_or_er_visit {
        fields.push(Field::new(
            "Hospitalization Reason",
            optional_text(e.hospitalization_reason.as_deref()),
        ));
    }
    fields
}

fn physician_fields(assessment: Option<&PhysicianAssessment>, ratings: &Ratings) -> Vec<Field> {
    let mut fields = vec![
        Field::new("Overall Efficacy", optional_text(ratings.efficacy.as_deref())),
        Field::new(
            "Overall Tolerability",
            optional_text(ratings.tolerability.as_deref()),
        ),
        Field::new(
            "Compliance Judgment",
            optional_text(ratings.compliance.as_deref()),
        ),
    ];
    let Some(assessment) = assessment else {
        return fields;
    };

    fields.push(Field::new("Prefer Long-term", yes_no(assessment.prefer_long_term)));
    if let Some(p) = &assessment.preferred_patient_profiles {
        let profiles: Vec<String> = [
            (p.uncontrolled_t2dm, "Uncontrolled T2DM"),
            (p.obese_t2dm, "Obese T2DM"),
            (p.ckd_patients, "CKD Patients"),
            (p.htn_plus_t2dm, "HTN + T2DM"),
            (p.elderly_patients, "Elderly Patients"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, label)| label.to_string())
        .collect();
        fields.push(Field::new("Preferred Profiles", list_or_none(&profiles)));
    }
    fields
}

fn reported_outcome_fields(o: &PatientReportedOutcomes) -> Vec<Field> {
    let mut fields = vec![
        Field::new(
            "Overall Satisfaction",
            optional_text(o.overall_satisfaction.as_deref()),
        ),
        Field::new(
            "GI Tolerance",
            optional_text(o.gi_tolerance_vs_prior_therapy.as_deref()),
        ),
        Field::new(
            "Diabetes Confidence",
            optional_text(o.confidence_in_managing_diabetes.as_deref()),
        ),
    ];
    if let Some(comments) = o.additional_comments.as_deref().filter(|c| !c.trim().is_empty()) {
        fields.push(Field::new("Comments", comments));
    }
    fields
}

fn privacy_fields(p: &DataPrivacy) -> Vec<Field> {
    vec![
        Field::new(
            "No personal identifiers recorded",
            yes_no(p.no_personal_identifiers_recorded),
        ),
        Field::new(
            "Data collected as routine practice",
            yes_no(p.data_collected_as_routine_clinical_practice),
        ),
        Field::new(
            "Identity mapping at clinic only",
            yes_no(p.patient_identity_mapping_at_clinic_only),
        ),
    ]
}

fn outcome_fields(baseline: &Measurements, follow_up: &Measurements) -> Vec<Field> {
    let outcomes = outcomes::calculate(baseline, follow_up);
    vec![
        Field::new("Glycemic Response", outcomes.glycemic.label()),
        Field::new("HbA1c Change", format!("{}%", signed(outcomes.hba1c_change, 2))),
        Field::new("Weight Outcome", outcomes.weight.label()),
        Field::new("Weight Change", format!("{} kg", signed(outcomes.weight_change, 1))),
        Field::new("Renal Outcome", outcomes.renal.label()),
        Field::new(
            "BP Control Achieved",
            yes_no(outcomes.blood_pressure.controlled()),
        ),
    ]
}
