//! Workflow status derivation.

use crate::aggregate::CompletionMaps;
use crate::records::Patient;
use serde::Serialize;

/// Where a patient is in the baseline → follow-up workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    Awaiting,
    InProgress,
    Completed,
}

/// A status together with its dashboard label and next action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusInfo {
    pub status: WorkflowStatus,
    pub label: &'static str,
    pub action: &'static str,
}

/// Maps the two existence flags to a status.
///
/// A follow-up without a baseline is treated exactly like no assessments at all.
pub fn derive_status(has_baseline: bool, has_follow_up: bool) -> StatusInfo {
    match (has_baseline, has_follow_up) {
        (true, true) => StatusInfo {
            status: WorkflowStatus::Completed,
            label: "Completed",
            action: "View Details",
        },
        (true, false) => StatusInfo {
            status: WorkflowStatus::InProgress,
            label: "Follow-up Pending",
            action: "Complete Follow-up",
        },
        (false, _) => StatusInfo {
            status: WorkflowStatus::Awaiting,
            label: "Baseline Pending",
            action: "Complete Baseline",
        },
    }
}

/// A patient annotated with its completion flags. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientWithStatus {
    #[serde(flatten)]
    pub patient: Patient,
    pub has_baseline: bool,
    pub has_follow_up: bool,
}

impl PatientWithStatus {
    pub fn from_maps(patient: Patient, maps: &CompletionMaps) -> Self {
        Self {
            has_baseline: maps.has_baseline(&patient.id),
            has_follow_up: maps.has_follow_up(&patient.id),
            patient,
        }
    }

    pub fn status(&self) -> StatusInfo {
        derive_status(self.has_baseline, self.has_follow_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_flag_combination() {
        let cases = [
            (false, false, WorkflowStatus::Awaiting, "Baseline Pending", "Complete Baseline"),
            (false, true, WorkflowStatus::Awaiting, "Baseline Pending", "Complete Baseline"),
            (true, false, WorkflowStatus::InProgress, "Follow-up Pending", "Complete Follow-up"),
            (true, true, WorkflowStatus::Completed, "Completed", "View Details"),
        ];

        for (baseline, follow_up, status, label, action) in cases {
            let info = derive_status(baseline, follow_up);
            assert_eq!(info.status, status);
            assert_eq!(info.label, label);
            assert_eq!(info.action, action);
            assert_eq!(info, derive_status(baseline, follow_up));
        }
    }

    #[test]
    fn follow_up_without_baseline_matches_nothing_recorded() {
        assert_eq!(derive_status(false, true), derive_status(false, false));
    }

    #[test]
    fn status_serialises_kebab_case() {
        let json = serde_json::to_value(WorkflowStatus::InProgress).expect("serialise");
        assert_eq!(json, serde_json::json!("in-progress"));
    }
}
