//! The per-patient record view backing the detail page and export.
//!
//! Three live subscriptions (the patient document, its baseline and its follow-up) each
//! replace one slot of the held [`PatientRecord`]. Export always composes from whatever
//! triple is held at the moment it is requested.

use crate::constants::{PATIENT_REF_FIELD, PATIENTS_COLLECTION};
use crate::error::{ExportError, SubscriptionError};
use crate::export::{self, ExportDocument, RenderedExport};
use crate::records::{AssessmentKind, BaselineData, FollowUpData, Patient, decode_snapshot};
use crate::render::ExportRenderer;
use crate::store::{Document, DocumentStore, Listener, Query, Snapshot};
use crate::subscription::StopSummary;
use crate::view::ViewCore;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use trial_types::{ClinicianId, PatientId};

/// The (patient, baseline, follow-up) triple currently held by a record view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatientRecord {
    pub patient: Option<Patient>,
    pub baseline: Option<BaselineData>,
    pub follow_up: Option<FollowUpData>,
}

impl PatientRecord {
    pub fn compose(&self) -> Result<ExportDocument, ExportError> {
        export::compose(
            self.patient.as_ref(),
            self.baseline.as_ref(),
            self.follow_up.as_ref(),
        )
    }
}

const SUBSCRIPTIONS: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordState {
    pub record: PatientRecord,
    /// True until each of the three subscriptions has delivered its first snapshot or
    /// failed.
    pub loading: bool,
    pub error: Option<SubscriptionError>,
    pending: usize,
}

impl Default for RecordState {
    fn default() -> Self {
        Self {
            record: PatientRecord::default(),
            loading: true,
            error: None,
            pending: SUBSCRIPTIONS,
        }
    }
}

impl RecordState {
    fn mark_synced(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.loading = self.pending > 0;
    }

    /// The patient document has been seen and does not exist (or belongs to someone else).
    pub fn not_found(&self) -> bool {
        !self.loading && self.error.is_none() && self.record.patient.is_none()
    }
}

pub struct RecordView;

impl RecordView {
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        clinician: ClinicianId,
        patient_id: PatientId,
    ) -> RecordHandle {
        let core = Arc::new(ViewCore::new("record", RecordState::default()));
        tracing::info!(clinician = %clinician, patient = %patient_id, "record view starting");

        let owner = clinician.clone();
        let expected = patient_id.clone();
        let patient_listener = store
            .listen_document(PATIENTS_COLLECTION, patient_id.as_str())
            .await;
        attach(&core, "patient", patient_listener, move |state, docs| {
            state.record.patient = docs
                .first()
                .and_then(|doc| decode_snapshot(std::slice::from_ref(doc), Patient::from_document).pop())
                .filter(|p| {
                    let owned = p.clinician_id == owner && p.id == expected;
                    if !owned {
                        tracing::warn!(patient = %p.id, "patient belongs to another clinician");
                    }
                    owned
                });
        });

        for kind in [AssessmentKind::Baseline, AssessmentKind::FollowUp] {
            let query =
                Query::collection(kind.collection()).where_eq(PATIENT_REF_FIELD, patient_id.as_str());
            let listener = store.listen(&query).await;
            match kind {
                AssessmentKind::Baseline => attach(&core, "baseline", listener, |state, docs| {
                    state.record.baseline =
                        latest(decode_snapshot(docs, BaselineData::from_document), |b| b.created_at);
                }),
                AssessmentKind::FollowUp => attach(&core, "follow-up", listener, |state, docs| {
                    state.record.follow_up =
                        latest(decode_snapshot(docs, FollowUpData::from_document), |f| f.created_at);
                }),
            }
        }

        RecordHandle {
            core,
            clinician,
            patient_id,
        }
    }
}

/// Registers a listener with the view, or records the failure to establish it.
fn attach<F>(
    core: &Arc<ViewCore<RecordState>>,
    name: &'static str,
    listener: Result<Listener, crate::error::StoreError>,
    apply: F,
) where
    F: Fn(&mut RecordState, &[Document]) + Send + 'static,
{
    match listener {
        Ok(Listener { events, cancel }) => {
            core.manager().register(name, cancel);
            let task = tokio::spawn(pump(Arc::clone(core), name, events, apply));
            core.manager().register_task(format!("{name}-pump"), task);
        }
        Err(source) => {
            let error = SubscriptionError::Establish { name, source };
            tracing::error!(error = %error, "record subscription failed");
            core.update(|state| {
                state.error = Some(error);
                state.mark_synced();
            });
        }
    }
}

async fn pump<F>(
    core: Arc<ViewCore<RecordState>>,
    name: &'static str,
    mut events: mpsc::UnboundedReceiver<Snapshot>,
    apply: F,
) where
    F: Fn(&mut RecordState, &[Document]) + Send + 'static,
{
    let mut first = true;
    while let Some(event) = events.recv().await {
        let synced_now = std::mem::replace(&mut first, false);
        match event {
            Ok(docs) => {
                core.update(|state| {
                    apply(state, &docs);
                    if synced_now {
                        state.mark_synced();
                    }
                });
            }
            Err(source) => {
                let error = SubscriptionError::Stream { name, source };
                tracing::error!(error = %error, "record subscription error");
                core.update(|state| {
                    state.error = Some(error);
                    if synced_now {
                        state.mark_synced();
                    }
                });
            }
        }
    }
}

/// At most one assessment of each kind is expected; if several exist the newest wins.
fn latest<T, K: Ord>(records: Vec<T>, key: impl Fn(&T) -> K) -> Option<T> {
    records.into_iter().max_by_key(|r| key(r))
}

/// Owner of a running record view. Stops the view when dropped.
pub struct RecordHandle {
    core: Arc<ViewCore<RecordState>>,
    clinician: ClinicianId,
    patient_id: PatientId,
}

impl RecordHandle {
    pub fn clinician(&self) -> &ClinicianId {
        &self.clinician
    }

    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    pub fn state(&self) -> RecordState {
        self.core.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordState> {
        self.core.subscribe()
    }

    pub async fn settled(&self) -> RecordState {
        self.core.wait_until(|state| !state.loading).await
    }

    /// Composes the held triple and renders it.
    ///
    /// Fails with [`ExportError::PatientNotFound`] once the view has settled without a
    /// patient, and with [`ExportError::MissingPatient`] while it is still loading.
    pub async fn export(&self, renderer: &dyn ExportRenderer) -> Result<RenderedExport, ExportError> {
        let state = self.state();
        if state.not_found() {
            return Err(ExportError::PatientNotFound);
        }
        let doc = state.record.compose()?;
        export::export(renderer, &doc).await
    }

    pub fn stop(&self) -> StopSummary {
        self.core.stop()
    }

    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }
}

impl Drop for RecordHandle {
    fn drop(&mut self) {
        self.core.stop();
    }
}
