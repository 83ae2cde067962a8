//! Constants used throughout the trial core crate.
//!
//! Collection and field names describe the persisted layout the engine reads. Keeping them
//! here means the flat-collection addressing scheme is defined in exactly one place.

use std::time::Duration;

/// Collection holding one document per trial participant.
pub const PATIENTS_COLLECTION: &str = "patients";

/// Collection holding baseline (week 0) assessments.
pub const BASELINE_COLLECTION: &str = "baselineData";

/// Collection holding follow-up assessments.
pub const FOLLOW_UP_COLLECTION: &str = "followUpData";

/// Patient field naming the owning clinician.
pub const OWNER_FIELD: &str = "doctorId";

/// Assessment field referencing the owning patient.
pub const PATIENT_REF_FIELD: &str = "patientId";

/// Patient field the dashboard orders by (newest first).
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Default cardinality limit for an "in" filter.
pub const DEFAULT_IN_FILTER_LIMIT: usize = 30;

/// How long a view waits for its first snapshot before clearing the loading indicator.
pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_secs(5);

/// Default dashboard page size.
pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Marker used wherever an assessment or value is absent from an export.
pub const NOT_RECORDED: &str = "Not recorded";

/// Title printed at the top of every exported case record form.
pub const EXPORT_TITLE: &str = "Case Record Form - Complete Patient Assessment";
