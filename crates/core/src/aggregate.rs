//! Completion aggregation: which patients have a baseline and which have a follow-up.
//!
//! The store caps the number of values in an "in" filter, so ids are split into chunks and
//! the partial answers merged. The two halves (baseline and follow-up) are independent: a
//! failed query degrades only its own half to "no records found".

use crate::constants::PATIENT_REF_FIELD;
use crate::error::StoreError;
use crate::records::AssessmentKind;
use crate::store::{DocumentStore, Query};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use trial_types::PatientId;

/// Existence flags for every requested patient.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CompletionMaps {
    pub has_baseline: BTreeMap<PatientId, bool>,
    pub has_follow_up: BTreeMap<PatientId, bool>,
    /// Halves whose existence query failed and were replaced by all-`false`.
    pub degraded: Vec<AssessmentKind>,
}

impl CompletionMaps {
    pub fn has_baseline(&self, id: &PatientId) -> bool {
        self.has_baseline.get(id).copied().unwrap_or(false)
    }

    pub fn has_follow_up(&self, id: &PatientId) -> bool {
        self.has_follow_up.get(id).copied().unwrap_or(false)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Runs chunked existence queries against a [`DocumentStore`].
#[derive(Clone)]
pub struct CompletionAggregator {
    store: Arc<dyn DocumentStore>,
    chunk_size: usize,
}

impl CompletionAggregator {
    /// `in_filter_limit` is clamped to what the store accepts.
    pub fn new(store: Arc<dyn DocumentStore>, in_filter_limit: usize) -> Self {
        let chunk_size = in_filter_limit.min(store.max_in_values()).max(1);
        Self { store, chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn aggregate(&self, patient_ids: &[PatientId]) -> CompletionMaps {
        let ids: Vec<&PatientId> = patient_ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (baseline, follow_up) = tokio::join!(
            self.existing(AssessmentKind::Baseline, &ids),
            self.existing(AssessmentKind::FollowUp, &ids),
        );

        let mut degraded = Vec::new();
        let has_baseline = flags(&ids, baseline, AssessmentKind::Baseline, &mut degraded);
        let has_follow_up = flags(&ids, follow_up, AssessmentKind::FollowUp, &mut degraded);

        CompletionMaps {
            has_baseline,
            has_follow_up,
            degraded,
        }
    }

    /// Ids among `ids` that have at least one record of `kind`.
    async fn existing(
        &self,
        kind: AssessmentKind,
        ids: &[&PatientId],
    ) -> Result<BTreeSet<String>, StoreError> {
        let queries: Vec<Query> = ids
            .chunks(self.chunk_size)
            .map(|chunk| {
                let values = chunk
                    .iter()
                    .map(|id| Value::String(id.as_str().to_string()))
                    .collect();
                Query::collection(kind.collection()).where_in(PATIENT_REF_FIELD, values)
            })
            .collect();

        tracing::debug!(kind = %kind, ids = ids.len(), chunks = queries.len(), "existence query");

        let results = join_all(queries.iter().map(|q| self.store.query(q))).await;

        let mut found = BTreeSet::new();
        for docs in results {
            for doc in docs? {
                if let Some(Value::String(patient_id)) = doc.field(PATIENT_REF_FIELD) {
                    found.insert(patient_id.clone());
                }
            }
        }
        Ok(found)
    }
}

impl std::fmt::Debug for CompletionAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionAggregator")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

fn flags(
    ids: &[&PatientId],
    found: Result<BTreeSet<String>, StoreError>,
    kind: AssessmentKind,
    degraded: &mut Vec<AssessmentKind>,
) -> BTreeMap<PatientId, bool> {
    let found = found.unwrap_or_else(|e| {
        tracing::warn!(kind = %kind, error = %e, "existence query failed, treating as no records");
        degraded.push(kind);
        BTreeSet::new()
    });
    ids.iter()
        .map(|id| ((*id).clone(), found.contains(id.as_str())))
        .collect()
}
