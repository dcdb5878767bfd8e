//! Job data model, the in-memory ledger, and the admission rules that sit
//! between raw submissions and ledger records.

pub mod admission;
pub mod ledger;
pub mod record;

pub use admission::{admit, AdmissionPolicy, Rejection, RejectionCode};
pub use ledger::{CancelOutcome, DuplicateIdentifier, JobLedger, JobUpdate};
pub use record::{
    JobError, JobRecord, JobSpec, JobState, Limits, RuntimeMode, RuntimeSpec,
    DEFAULT_MAX_RUNTIME_SECS, SUPPORTED_PROTOCOL_VERSION,
};
