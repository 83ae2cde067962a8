//! # Trial Core
//!
//! Patient assessment status synchronisation for the trial intake workflow.
//!
//! This crate keeps a clinician's patient list synchronised with a document store, works out
//! which patients have baseline and follow-up assessments, derives each patient's workflow
//! status, and assembles a patient's full record for export:
//! - [`dashboard`]: the live, status-annotated patient list
//! - [`record`]: one patient's (patient, baseline, follow-up) triple and its export
//! - [`aggregate`]: chunked existence queries with per-half degradation
//! - [`status`] and [`outcomes`]: pure derivations
//! - [`export`] and [`render`]: composition and CSV/PDF rendering
//! - [`report`]: the cohort CSV of completed patients
//! - [`store`]: the document store interface plus an in-memory implementation
//!
//! **No transport concerns**: the CLI and the REST runner live in their own crates and only
//! drive the views defined here.

pub mod aggregate;
pub mod config;
pub mod constants;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod outcomes;
pub mod record;
pub mod records;
pub mod render;
pub mod report;
pub mod status;
pub mod store;
pub mod subscription;

mod view;

pub use aggregate::{CompletionAggregator, CompletionMaps};
pub use config::CoreConfig;
pub use dashboard::{DashboardHandle, DashboardState, DashboardView, Page, StatusCounts};
pub use error::{
    ConfigError, DecodeError, ExportError, RenderError, StoreError, SubscriptionError,
    TrialError, TrialResult,
};
pub use export::{ExportDocument, RenderedExport, compose};
pub use record::{PatientRecord, RecordHandle, RecordState, RecordView};
pub use records::{AssessmentKind, BaselineData, FollowUpData, Measure, Measurements, Patient};
pub use render::{CsvRenderer, ExportFormat, ExportRenderer, PdfRenderer};
pub use report::{CohortReport, CohortRow};
pub use status::{PatientWithStatus, StatusInfo, WorkflowStatus, derive_status};
pub use store::{DocumentStore, InMemoryStore};
pub use subscription::{StopSummary, SubscriptionManager};
