//! The clinician dashboard: a live, status-annotated patient list.
//!
//! [`DashboardView::start`] opens one listener on the clinician's patients (newest first).
//! Every snapshot bumps the list version and spawns an aggregation tagged with it, aborting
//! any aggregation still running for an older list. Results are applied only if no newer
//! version has been applied yet, so a slow aggregation can never overwrite a fresher list. The published [`DashboardState`] is always a complete
//! replacement, never patched in place.
//!
//! Dropping the returned [`DashboardHandle`] stops the view.

use crate::aggregate::{CompletionAggregator, CompletionMaps};
use crate::config::CoreConfig;
use crate::constants::{CREATED_AT_FIELD, OWNER_FIELD, PATIENTS_COLLECTION};
use crate::error::SubscriptionError;
use crate::records::{AssessmentKind, Patient, decode_snapshot};
use crate::status::{PatientWithStatus, WorkflowStatus};
use crate::store::{Direction, DocumentStore, Listener, Query, Snapshot};
use crate::subscription::StopSummary;
use crate::view::ViewCore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use trial_types::{ClinicianId, PatientId};

const PATIENTS_SUBSCRIPTION: &str = "patients";

#[derive(Clone, Debug, PartialEq)]
pub struct DashboardState {
    pub patients: Vec<PatientWithStatus>,
    /// True until the first aggregated list is applied, an error occurs, or the loading
    /// timeout fires.
    pub loading: bool,
    pub error: Option<SubscriptionError>,
    /// Latest list version received when `error` was raised. Only a list newer than this
    /// clears the error.
    pub error_version: u64,
    /// List version of the applied patients; 0 before the first snapshot.
    pub version: u64,
    /// Existence halves that failed for the applied list.
    pub degraded: Vec<AssessmentKind>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            patients: Vec::new(),
            loading: true,
            error: None,
            error_version: 0,
            version: 0,
            degraded: Vec::new(),
        }
    }
}

/// A slice of the patient list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub patients: Vec<PatientWithStatus>,
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub awaiting: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl DashboardState {
    pub fn page(&self, offset: usize, limit: usize) -> Page {
        let total = self.patients.len();
        let limit = limit.max(1);
        let start = offset.min(total);
        let end = start.saturating_add(limit).min(total);

        Page {
            patients: self.patients[start..end].to_vec(),
            offset: start,
            limit,
            total,
            has_more: end < total,
        }
    }

    pub fn counts(&self) -> StatusCounts {
        self.patients
            .iter()
            .fold(StatusCounts::default(), |mut counts, p| {
                counts.total += 1;
                match p.status().status {
                    WorkflowStatus::Awaiting => counts.awaiting += 1,
                    WorkflowStatus::InProgress => counts.in_progress += 1,
                    WorkflowStatus::Completed => counts.completed += 1,
                }
                counts
            })
    }

    pub fn find(&self, id: &PatientId) -> Option<&PatientWithStatus> {
        self.patients.iter().find(|p| &p.patient.id == id)
    }
}

pub struct DashboardView;

impl DashboardView {
    /// Starts the dashboard for `clinician`.
    ///
    /// A failure to establish the patient listener is reported through
    /// [`DashboardState::error`]; it is not returned.
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        config: Arc<CoreConfig>,
        clinician: ClinicianId,
    ) -> DashboardHandle {
        let core = Arc::new(ViewCore::new("dashboard", DashboardState::default()));
        tracing::info!(clinician = %clinician, "dashboard starting");

        let timeout = config.loading_timeout();
        let timer = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                core.update(|state| {
                    if state.loading {
                        tracing::info!(?timeout, "loading timed out");
                        state.loading = false;
                    }
                });
            })
        };
        core.manager().register_task("loading-timeout", timer);

        let query = Query::collection(PATIENTS_COLLECTION)
            .where_eq(OWNER_FIELD, clinician.as_str())
            .order_by(CREATED_AT_FIELD, Direction::Descending);

        match store.listen(&query).await {
            Ok(Listener { events, cancel }) => {
                core.manager().register(PATIENTS_SUBSCRIPTION, cancel);
                let aggregator =
                    CompletionAggregator::new(Arc::clone(&store), config.in_filter_limit());
                let task = tokio::spawn(pump(Arc::clone(&core), aggregator, events));
                core.manager().register_task("patients-pump", task);
            }
            Err(source) => {
                let error = SubscriptionError::Establish {
                    name: PATIENTS_SUBSCRIPTION,
                    source,
                };
                tracing::error!(clinician = %clinician, error = %error, "dashboard subscription failed");
                core.update(|state| {
                    state.error = Some(error);
                    state.loading = false;
                });
            }
        }

        DashboardHandle {
            core,
            clinician,
            page_size: config.page_size(),
        }
    }
}

/// Forwards patient snapshots into versioned aggregations and applies their results.
async fn pump(
    core: Arc<ViewCore<DashboardState>>,
    aggregator: CompletionAggregator,
    mut events: mpsc::UnboundedReceiver<Snapshot>,
) {
    let mut inflight: JoinSet<(u64, Vec<Patient>, CompletionMaps)> = JoinSet::new();
    let mut version: u64 = 0;
    let mut open = true;

    loop {
        tokio::select! {
            event = events.recv(), if open => match event {
                Some(Ok(docs)) => {
                    version += 1;
                    let patients = decode_snapshot(&docs, Patient::from_document);
                    tracing::debug!(version, patients = patients.len(), "patient list changed");

                    // Older lists can only be discarded now; stop querying for them.
                    inflight.abort_all();
                    let aggregator = aggregator.clone();
                    let tagged = version;
                    inflight.spawn(async move {
                        let ids: Vec<PatientId> = patients.iter().map(|p| p.id.clone()).collect();
                        let maps = aggregator.aggregate(&ids).await;
                        (tagged, patients, maps)
                    });
                }
                Some(Err(source)) => {
                    let error = SubscriptionError::Stream {
                        name: PATIENTS_SUBSCRIPTION,
                        source,
                    };
                    tracing::error!(error = %error, version, "patient subscription error");
                    core.update(|state| {
                        state.error = Some(error);
                        state.error_version = version;
                        state.loading = false;
                    });
                }
                None => {
                    tracing::debug!("patient listener closed");
                    open = false;
                }
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => match joined {
                Ok((tagged, patients, maps)) => apply(&core, tagged, patients, maps),
                Err(e) if e.is_cancelled() => tracing::debug!("superseded aggregation cancelled"),
                Err(e) => tracing::warn!(error = %e, "aggregation task did not complete"),
            },
            else => break,
        }
    }
}

fn apply(core: &ViewCore<DashboardState>, version: u64, patients: Vec<Patient>, maps: CompletionMaps) {
    let rows: Vec<PatientWithStatus> = patients
        .into_iter()
        .map(|p| PatientWithStatus::from_maps(p, &maps))
        .collect();

    let applied = core.update_versioned(version, |state| {
        // Only a list received after the error shows the stream has recovered.
        let error = if version > state.error_version {
            None
        } else {
            state.error.take()
        };
        *state = DashboardState {
            patients: rows,
            loading: false,
            error,
            error_version: state.error_version,
            version,
            degraded: maps.degraded.clone(),
        };
    });
    if applied {
        tracing::debug!(version, "dashboard updated");
    }
}

/// Owner of a running dashboard. Stops the view when dropped.
pub struct DashboardHandle {
    core: Arc<ViewCore<DashboardState>>,
    clinician: ClinicianId,
    page_size: usize,
}

impl DashboardHandle {
    pub fn clinician(&self) -> &ClinicianId {
        &self.clinician
    }

    pub fn state(&self) -> DashboardState {
        self.core.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.core.subscribe()
    }

    /// Waits until the view is no longer loading.
    pub async fn settled(&self) -> DashboardState {
        self.core.wait_until(|state| !state.loading).await
    }

    /// Waits until a list with at least `version` has been applied.
    pub async fn wait_for_version(&self, version: u64) -> DashboardState {
        self.core.wait_until(|state| state.version >= version).await
    }

    /// Page `index` (zero-based) using the configured page size.
    pub fn page(&self, index: usize) -> Page {
        self.state()
            .page(index.saturating_mul(self.page_size), self.page_size)
    }

    pub fn stop(&self) -> StopSummary {
        self.core.stop()
    }

    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }
}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        self.core.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BASELINE_COLLECTION;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn patient_json(doctor: &str, code: &str, created: &str) -> serde_json::Value {
        json!({
            "doctorId": doctor,
            "patientCode": code,
            "age": 50,
            "gender": "Male",
            "durationOfDiabetes": 5,
            "createdAt": created
        })
    }

    fn clinician(id: &str) -> ClinicianId {
        ClinicianId::new(id).expect("valid clinician")
    }

    #[tokio::test]
    async fn lists_only_the_clinicians_patients_newest_first() {
        let store = InMemoryStore::new();
        store.set(PATIENTS_COLLECTION, "p1", patient_json("doc-1", "PT001", "2025-01-01T00:00:00Z"));
        store.set(PATIENTS_COLLECTION, "p2", patient_json("doc-1", "PT002", "2025-02-01T00:00:00Z"));
        store.set(PATIENTS_COLLECTION, "p3", patient_json("doc-2", "PT003", "2025-03-01T00:00:00Z"));
        store.set(BASELINE_COLLECTION, "b1", json!({"patientId": "p1"}));

        let handle = DashboardView::start(
            Arc::new(store.clone()),
            Arc::new(CoreConfig::default()),
            clinician("doc-1"),
        )
        .await;
        let state = handle.settled().await;

        let codes: Vec<&str> = state
            .patients
            .iter()
            .map(|p| p.patient.patient_code.as_str())
            .collect();
        assert_eq!(codes, vec!["PT002", "PT001"]);
        assert_eq!(
            state.counts(),
            StatusCounts {
                total: 2,
                awaiting: 1,
                in_progress: 1,
                completed: 0
            }
        );
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn establish_failure_surfaces_error_and_clears_loading() {
        let store = InMemoryStore::new();
        store.fail_listens(
            PATIENTS_COLLECTION,
            crate::error::StoreError::PermissionDenied("rules".into()),
        );

        let handle = DashboardView::start(
            Arc::new(store),
            Arc::new(CoreConfig::default()),
            clinician("doc-1"),
        )
        .await;
        let state = handle.settled().await;

        assert!(matches!(
            state.error,
            Some(SubscriptionError::Establish { name: "patients", .. })
        ));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_listener() {
        let store = InMemoryStore::new();
        let handle = DashboardView::start(
            Arc::new(store.clone()),
            Arc::new(CoreConfig::default()),
            clinician("doc-1"),
        )
        .await;
        assert_eq!(store.listener_count(), 1);

        drop(handle);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn pages_the_list() {
        let patients: Vec<PatientWithStatus> = (0..5)
            .map(|i| {
                let doc = crate::store::Document::new(
                    format!("p{i}"),
                    patient_json("doc-1", &format!("PT00{i}"), "2025-01-01T00:00:00Z"),
                );
                PatientWithStatus {
                    patient: Patient::from_document(&doc).expect("valid patient"),
                    has_baseline: false,
                    has_follow_up: false,
                }
            })
            .collect();
        let state = DashboardState {
            patients,
            loading: false,
            ..DashboardState::default()
        };

        let first = state.page(0, 2);
        assert_eq!(first.patients.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.total, 5);

        let last = state.page(4, 2);
        assert_eq!(last.patients.len(), 1);
        assert!(!last.has_more);

        let beyond = state.page(10, 2);
        assert!(beyond.patients.is_empty());
        assert_eq!(beyond.offset, 5);
    }
}
