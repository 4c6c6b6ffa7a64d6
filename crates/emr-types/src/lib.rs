//! # EMR Types
//!
//! Shared vocabulary for the EMR editing engine: the clinical record and its
//! lifecycle, conflict descriptors, revision metadata, field-level change
//! sets, and validated text inputs.
//!
//! Everything here is plain data. Behaviour (state transitions, scheduling,
//! conflict handling) lives in `emr-core`; transport lives in `api-client`.

pub mod diff;
pub mod reason;
pub mod record;
pub mod revision;

pub use diff::{ChangeKind, DiffReport, FieldChange};
pub use reason::{AmendmentReason, ReasonError, MIN_AMENDMENT_REASON_CHARS};
pub use record::{ConflictInfo, IdentityError, LifecycleState, Record, RecordData, RecordId};
pub use revision::{RevisionAction, RevisionEntry, RevisionHistory};
