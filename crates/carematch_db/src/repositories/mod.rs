//! Repository modules for database access

pub mod booking_session;
pub mod calendar_credential;
pub mod directory;
pub mod session_payment;
pub mod subsidy_ledger;

pub use booking_session::SqlBookingSessionRepository;
pub use calendar_credential::SqlCalendarCredentialRepository;
pub use directory::SqlDirectoryRepository;
pub use session_payment::SqlSessionPaymentRepository;
pub use subsidy_ledger::{AllocationSource, SqlSubsidyLedgerRepository, SubsidyAllocation};
