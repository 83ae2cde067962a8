//! Cohort report: one clinician's completed patients with baseline and follow-up values side
//! by side, as a flat CSV table.
//!
//! The completed set comes from a settled dashboard's existence flags. The assessments are
//! then fetched once per kind, chunked to the store's "in" filter limit, and the newest of
//! each kind is kept per patient.

use crate::config::CoreConfig;
use crate::constants::PATIENT_REF_FIELD;
use crate::dashboard::{DashboardState, DashboardView};
use crate::error::{DecodeError, StoreError, TrialResult};
use crate::records::{
    decode_snapshot, AssessmentKind, BaselineData, FollowUpData, Gender, Measurements, Ratings,
};
use crate::render::push_row;
use crate::store::{Document, DocumentStore, Query};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use trial_types::{ClinicianId, PatientId};

/// Column headings of the cohort CSV, in order.
pub const COHORT_COLUMNS: [&str; 16] = [
    "Patient Code",
    "Age",
    "Gender",
    "Duration of Diabetes",
    "Baseline HbA1c (%)",
    "Follow-up HbA1c (%)",
    "HbA1c Change",
    "Baseline FPG (mg/dL)",
    "Follow-up FPG (mg/dL)",
    "FPG Change",
    "Baseline Weight (kg)",
    "Follow-up Weight (kg)",
    "Weight Change (kg)",
    "Compliance",
    "Efficacy",
    "Tolerability",
];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortRow {
    pub patient_id: PatientId,
    pub patient_code: String,
    pub age: u32,
    pub gender: Gender,
    pub duration_of_condition_years: f64,
    pub baseline: Measurements,
    pub follow_up: Measurements,
    pub ratings: Ratings,
}

impl CohortRow {
    fn cells(&self) -> [String; 16] {
        let (b, f) = (&self.baseline, &self.follow_up);
        let change = |before: f64, after: f64| format!("{:.1}", after - before);
        let rating = |r: &Option<String>| r.clone().unwrap_or_default();

        [
            self.patient_code.clone(),
            self.age.to_string(),
            self.gender.to_string(),
            self.duration_of_condition_years.to_string(),
            b.hba1c.to_string(),
            f.hba1c.to_string(),
            change(b.hba1c, f.hba1c),
            b.fpg.to_string(),
            f.fpg.to_string(),
            change(b.fpg, f.fpg),
            b.weight.to_string(),
            f.weight.to_string(),
            change(b.weight, f.weight),
            rating(&self.ratings.compliance),
            rating(&self.ratings.efficacy),
            rating(&self.ratings.tolerability),
        ]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortReport {
    /// Completed patients, in dashboard order (newest enrolment first).
    pub rows: Vec<CohortRow>,
    /// Completed patients left out because an assessment vanished or failed to decode.
    pub skipped: usize,
    /// Existence halves that failed while the dashboard settled; completed patients may be
    /// missing from `rows`.
    pub degraded: Vec<AssessmentKind>,
}

impl CohortReport {
    /// Starts a dashboard for `clinician`, waits for it to settle and builds the report.
    pub async fn for_clinician(
        store: Arc<dyn DocumentStore>,
        config: Arc<CoreConfig>,
        clinician: ClinicianId,
    ) -> TrialResult<Self> {
        let in_filter_limit = config.in_filter_limit();
        let handle = DashboardView::start(Arc::clone(&store), config, clinician).await;
        let state = handle.settled().await;
        handle.stop();

        if let Some(error) = &state.error {
            return Err(error.clone().into());
        }
        if state.version == 0 {
            tracing::warn!(clinician = %handle.clinician(), "patient list not loaded before timeout; report is empty");
        }
        Ok(Self::build(store.as_ref(), in_filter_limit, &state).await?)
    }

    /// Builds the report from a settled dashboard state.
    pub async fn build(
        store: &dyn DocumentStore,
        in_filter_limit: usize,
        dashboard: &DashboardState,
    ) -> Result<Self, StoreError> {
        let completed: Vec<_> = dashboard
            .patients
            .iter()
            .filter(|row| row.has_baseline && row.has_follow_up)
            .collect();
        let ids: Vec<&PatientId> = completed.iter().map(|row| &row.patient.id).collect();
        let chunk_size = in_filter_limit.min(store.max_in_values()).max(1);

        let (mut baselines, mut follow_ups) = tokio::try_join!(
            newest_by_patient(
                store,
                AssessmentKind::Baseline,
                &ids,
                chunk_size,
                BaselineData::from_document,
            ),
            newest_by_patient(
                store,
                AssessmentKind::FollowUp,
                &ids,
                chunk_size,
                FollowUpData::from_document,
            ),
        )?;

        let mut rows = Vec::with_capacity(completed.len());
        let mut skipped = 0;
        for row in completed {
            let patient = &row.patient;
            match (baselines.remove(&patient.id), follow_ups.remove(&patient.id)) {
                (Some(baseline), Some(follow_up)) => rows.push(CohortRow {
                    patient_id: patient.id.clone(),
                    patient_code: patient.patient_code.clone(),
                    age: patient.age,
                    gender: patient.gender,
                    duration_of_condition_years: patient.duration_of_condition_years,
                    ratings: follow_up.ratings(),
                    baseline: baseline.measurements,
                    follow_up: follow_up.measurements,
                }),
                _ => {
                    tracing::warn!(patient = %patient.id, "completed patient has no readable assessments; left out of report");
                    skipped += 1;
                }
            }
        }

        tracing::info!(rows = rows.len(), skipped, "cohort report built");
        Ok(Self {
            rows,
            skipped,
            degraded: dashboard.degraded.clone(),
        })
    }

    /// Header row followed by one row per completed patient. Changes use one decimal.
    pub fn to_csv(&self) -> Vec<u8> {
        let mut out = String::new();
        push_row(&mut out, &COHORT_COLUMNS);
        for row in &self.rows {
            let cells = row.cells();
            let cells: Vec<&str> = cells.iter().map(String::as_str).collect();
            push_row(&mut out, &cells);
        }
        out.into_bytes()
    }

    pub fn file_name(date: NaiveDate) -> String {
        format!("trial-data-{date}.csv")
    }

    /// [`CohortReport::file_name`] for the current UTC date.
    pub fn todays_file_name() -> String {
        Self::file_name(Utc::now().date_naive())
    }
}

trait Assessment {
    fn patient_id(&self) -> &PatientId;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Assessment for BaselineData {
    fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Assessment for FollowUpData {
    fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

async fn newest_by_patient<T: Assessment>(
    store: &dyn DocumentStore,
    kind: AssessmentKind,
    ids: &[&PatientId],
    chunk_size: usize,
    decode: impl Fn(&Document) -> Result<T, DecodeError>,
) -> Result<BTreeMap<PatientId, T>, StoreError> {
    let queries: Vec<Query> = ids
        .chunks(chunk_size)
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|id| Value::String(id.as_str().to_string()))
                .collect();
            Query::collection(kind.collection()).where_in(PATIENT_REF_FIELD, values)
        })
        .collect();

    let results = join_all(queries.iter().map(|q| store.query(q))).await;

    let mut newest: BTreeMap<PatientId, T> = BTreeMap::new();
    for docs in results {
        for record in decode_snapshot(&docs?, &decode) {
            let newer = newest
                .get(record.patient_id())
                .map_or(true, |held| record.created_at() > held.created_at());
            if newer {
                newest.insert(record.patient_id().clone(), record);
            }
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn patient(store: &InMemoryStore, id: &str, code: &str, created: &str) {
        store.set(
            "patients",
            id,
            json!({
                "doctorId": "doc-1",
                "patientCode": code,
                "age": 58,
                "gender": "Male",
                "durationOfDiabetes": 6,
                "createdAt": created
            }),
        );
    }

    fn assessment(
        store: &InMemoryStore,
        collection: &str,
        id: &str,
        patient: &str,
        hba1c: f64,
        weight: f64,
        extra: Value,
    ) {
        let mut data = json!({
            "patientId": patient,
            "hba1c": hba1c,
            "fpg": 150,
            "weight": weight,
            "bloodPressureSystolic": 130,
            "bloodPressureDiastolic": 82,
            "createdAt": "2025-03-01T00:00:00Z"
        });
        if let (Some(target), Value::Object(extra)) = (data.as_object_mut(), extra) {
            target.extend(extra);
        }
        store.set(collection, id, data);
    }

    fn seeded() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        patient(&store, "p1", "PT001", "2025-01-01T00:00:00Z");
        patient(&store, "p2", "PT002", "2025-02-01T00:00:00Z");
        patient(&store, "p3", "PT003", "2025-03-01T00:00:00Z");

        assessment(&store, "baselineData", "b1", "p1", 8.4, 82.0, json!({}));
        assessment(
            &store,
            "followUpData",
            "f1",
            "p1",
            7.2,
            79.5,
            json!({"physicianAssessment": {"complianceJudgment": "Good", "overallEfficacy": "Excellent"}, "tolerability": "Good"}),
        );
        assessment(&store, "baselineData", "b2", "p2", 9.0, 90.0, json!({}));
        assessment(&store, "baselineData", "b3", "p3", 7.9, 70.0, json!({}));
        assessment(&store, "followUpData", "f3", "p3", 7.5, 71.0, json!({"compliance": "Poor"}));
        Arc::new(store)
    }

    async fn report(store: Arc<InMemoryStore>, in_filter_limit: usize) -> CohortReport {
        let config = CoreConfig::from_env_values(Some(in_filter_limit.to_string()), None, None, None)
            .expect("config");
        CohortReport::for_clinician(store, Arc::new(config), ClinicianId::new("doc-1").expect("id"))
            .await
            .expect("report")
    }

    #[tokio::test]
    async fn lists_only_completed_patients_newest_first() {
        let report = report(seeded(), 30).await;

        let codes: Vec<_> = report.rows.iter().map(|r| r.patient_code.as_str()).collect();
        assert_eq!(codes, vec!["PT003", "PT001"]);
        assert_eq!(report.skipped, 0);
        assert!(report.degraded.is_empty());

        let p1 = &report.rows[1];
        assert_eq!(p1.ratings.compliance.as_deref(), Some("Good"));
        assert_eq!(p1.ratings.efficacy.as_deref(), Some("Excellent"));
        assert_eq!(p1.ratings.tolerability.as_deref(), Some("Good"));
    }

    #[tokio::test]
    async fn csv_has_the_cohort_columns_and_one_decimal_changes() {
        let csv = String::from_utf8(report(seeded(), 30).await.to_csv()).expect("utf-8");
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], COHORT_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "PT003,58,Male,6,7.9,7.5,-0.4,150,150,0.0,70,71,1.0,Poor,,"
        );
        assert!(lines[2].starts_with("PT001,58,Male,6,8.4,7.2,-1.2,"));
        assert!(lines[2].ends_with(",82,79.5,-2.5,Good,Excellent,Good"));
    }

    #[tokio::test]
    async fn assessments_are_fetched_in_chunks() {
        let store = seeded();
        let report = report(Arc::clone(&store), 1).await;
        assert_eq!(report.rows.len(), 2);
    }

    #[tokio::test]
    async fn newest_follow_up_wins() {
        let store = seeded();
        assessment(
            &store,
            "followUpData",
            "f1-late",
            "p1",
            6.9,
            78.0,
            json!({"createdAt": "2025-06-01T00:00:00Z"}),
        );

        let report = report(store, 30).await;
        let p1 = report
            .rows
            .iter()
            .find(|r| r.patient_code == "PT001")
            .expect("PT001 row");
        assert_eq!(p1.follow_up.hba1c, 6.9);
        assert_eq!(p1.ratings, Ratings::default());
    }

    #[tokio::test]
    async fn unreadable_assessment_is_skipped() {
        let store = seeded();
        store.set(
            "followUpData",
            "f3",
            json!({"patientId": "p3", "hba1c": "high", "createdAt": "2025-03-01T00:00:00Z"}),
        );

        let report = report(store, 30).await;
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn empty_cohort_has_only_the_header() {
        let store = InMemoryStore::new();
        patient(&store, "p1", "PT001", "2025-01-01T00:00:00Z");
        let report = report(Arc::new(store), 30).await;

        assert!(report.rows.is_empty());
        assert_eq!(
            String::from_utf8(report.to_csv()).expect("utf-8"),
            format!("{}\n", COHORT_COLUMNS.join(","))
        );
    }

    #[test]
    fn file_name_carries_the_date() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).expect("date");
        assert_eq!(CohortReport::file_name(date), "trial-data-2025-07-01.csv");
    }
}
