//! Uniform latency bound for external calls.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::error::CareMatchError;

/// An external call did not finish within its budget.
#[derive(Debug, Clone, Error)]
#[error("{service} call timed out after {limit:?}")]
pub struct TimedOut {
    pub service: &'static str,
    pub limit: Duration,
}

impl From<TimedOut> for CareMatchError {
    fn from(err: TimedOut) -> Self {
        CareMatchError::ExternalServiceTransient {
            service: err.service.to_string(),
            message: err.to_string(),
        }
    }
}

/// Runs `fut` with an upper bound of `limit`.
///
/// Every calendar, payment and token call site goes through this so the bound is
/// applied the same way everywhere. The caller's error type decides how an elapsed
/// timeout is represented via `From<TimedOut>`.
pub async fn bounded<T, E, F>(service: &'static str, limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimedOut>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(E::from(TimedOut { service, limit })),
    }
}
