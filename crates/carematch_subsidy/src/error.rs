use carematch_common::CareMatchError;
use carematch_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubsidyError {
    #[error("Invalid session cost: {0}")]
    InvalidCost(i64),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// A guarded decrement found less balance than the quote assumed.
    #[error("Subsidy balance changed for {source_kind} {source_id}")]
    LedgerConflict {
        source_kind: &'static str,
        source_id: String,
    },

    #[error("Ledger error: {0}")]
    Db(#[from] DbError),
}

impl From<SubsidyError> for CareMatchError {
    fn from(err: SubsidyError) -> Self {
        match err {
            SubsidyError::InvalidCost(cents) => {
                CareMatchError::Validation(format!("Session cost must not be negative (got {})", cents))
            }
            SubsidyError::ClientNotFound(id) => CareMatchError::NotFound(format!("client {}", id)),
            // Retrying recomputes the waterfall against the new balance
            e @ SubsidyError::LedgerConflict { .. } => CareMatchError::ExternalServiceTransient {
                service: "subsidy_ledger".to_string(),
                message: e.to_string(),
            },
            SubsidyError::Db(e) => e.into(),
        }
    }
}
