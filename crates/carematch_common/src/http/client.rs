use once_cell::sync::Lazy;
use reqwest::{Client, Error as ReqwestError};
use std::time::Duration;

/// Ceiling for a whole request; the per-operation bound comes from [`crate::timeout::bounded`].
const REQUEST_CEILING_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Shared by the OAuth token endpoint, the payment API and the notifier.
pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    create_client(REQUEST_CEILING_SECS).unwrap_or_else(|_| Client::new())
});

pub fn create_client(timeout_secs: u64) -> Result<Client, ReqwestError> {
    Client::builder()
        .user_agent(concat!("carematch/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}
