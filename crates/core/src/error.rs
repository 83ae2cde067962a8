//! Error taxonomy for the synchronisation engine.
//!
//! Nothing in this crate is fatal to the process. Store and subscription failures become a
//! visible error state on the owning view, a failed existence query degrades one half of an
//! aggregation, and export failures are reported as retryable.

/// Failures reported by a [`DocumentStore`](crate::store::DocumentStore).
///
/// Cloneable so that a single failure can be delivered to every affected listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid seed data: {0}")]
    Seed(String),
}

/// A raw store document that could not be decoded into one of the typed records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {collection} document {id} at {path}: {message}")]
pub struct DecodeError {
    pub collection: &'static str,
    pub id: String,
    pub path: String,
    pub message: String,
}

/// Failures of a view's live subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("failed to establish {name} subscription: {source}")]
    Establish {
        name: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{name} subscription reported an error: {source}")]
    Stream {
        name: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Failures reported by an [`ExportRenderer`](crate::render::ExportRenderer).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("renderer rejected document: {0}")]
    Rejected(String),
    #[error("renderer backend failed: {0}")]
    Backend(String),
}

/// Failures of the export action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    #[error("patient record is not loaded")]
    MissingPatient,
    #[error("patient does not exist or belongs to another clinician")]
    PatientNotFound,
    #[error("failed to render export: {0}")]
    Render(#[from] RenderError),
}

impl ExportError {
    /// Whether the caller may offer the user a retry.
    ///
    /// Renderer failures are transient from the caller's point of view, and a patient that
    /// is still loading becomes exportable once its document arrives. A patient the store
    /// has confirmed absent will not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExportError::PatientNotFound)
    }
}

/// Invalid startup configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Umbrella error for callers that drive several engine components.
#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] trial_types::TextError),
}

pub type TrialResult<T> = std::result::Result<T, TrialError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn into_trial<E: Into<TrialError>>(e: E) -> TrialError {
        e.into()
    }

    #[test]
    fn component_errors_convert_into_the_umbrella() {
        let err = into_trial(StoreError::Unavailable("offline".into()));
        assert!(matches!(err, TrialError::Store(StoreError::Unavailable(_))));
        assert_eq!(err.to_string(), "document store unavailable: offline");

        let err = into_trial(ExportError::MissingPatient);
        assert!(matches!(err, TrialError::Export(ExportError::MissingPatient)));

        let err = into_trial(trial_types::TextError::Empty);
        assert!(matches!(err, TrialError::InvalidId(_)));
    }

    #[test]
    fn subscription_errors_name_the_subscription() {
        let err = SubscriptionError::Stream {
            name: "patients",
            source: StoreError::PermissionDenied("token expired".into()),
        };
        assert_eq!(
            err.to_string(),
            "patients subscription reported an error: permission denied: token expired"
        );
    }

    #[test]
    fn export_failures_are_retryable() {
        assert!(ExportError::MissingPatient.is_retryable());
        assert!(ExportError::Render(RenderError::Backend("font".into())).is_retryable());
    }

    #[test]
    fn confirmed_missing_patient_is_not_retryable() {
        assert!(!ExportError::PatientNotFound.is_retryable());
    }
}
