//! FormGate Core - Form Normalization, Validation and Submission
//!
//! # The Pipeline
//! 1. Raw input is normalized per field kind
//! 2. Normalized state is validated, per field and across fields
//! 3. The gate alone performs the side effect, at most once at a time
//!
//! Data only flows forward. Every session owns its own state.

pub mod clock;
pub mod display;
pub mod error;
pub mod form;
pub mod gate;
pub mod hashing;
pub mod http;
pub mod normalize;
pub mod session;
pub mod state;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::FormError;
pub use form::{FieldDecl, FieldKind, FormId, FormRegistry, FormSpec};
pub use gate::{
    AttemptError, AttemptOutcome, GateConfig, GateRefusal, Receipt, ResponseStatus,
    ServerResponse, SubmissionAttempt, SubmissionGate, SubmissionPayload, Submitter,
    TransportError,
};
pub use hashing::{canonical_json, snapshot_digest};
pub use http::HttpSubmitter;
pub use normalize::{FileDescriptor, NormalizedValue, RawInput, Rejection};
pub use session::{DispatchOutcome, FormEvent, FormSession};
pub use state::{Field, FormSnapshot, FormState};
pub use validation::{FieldRule, FormValidation, ValidationResult, Validator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_FORM_VERSION: &str = "1.0.0";
