// --- File: crates/carematch_common/src/lib.rs ---

pub mod error; // Error taxonomy and failure classification
pub mod http; // HTTP error mapping and shared client
pub mod logging; // Logging utilities
pub mod models; // Shared domain records
pub mod services; // External service abstractions
pub mod timeout; // Uniform bound for external calls

pub use error::{
    internal_error, not_found, slot_unavailable, transient, validation_error, CareMatchError,
    Classify, Context, FailureClass, HttpStatusCode,
};

pub use http::{
    client::{create_client, HTTP_CLIENT},
    ErrorBody, ErrorDetail,
};

pub use logging::{init, init_with_level};

pub use timeout::{bounded, TimedOut};
