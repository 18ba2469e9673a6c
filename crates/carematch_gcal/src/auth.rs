// File: crates/carematch_gcal/src/auth.rs
use google_calendar3::{
    hyper_rustls::{self, HttpsConnectorBuilder},
    hyper_util::client::legacy::connect::HttpConnector,
    hyper_util::client::legacy::Client,
    CalendarHub,
};

// Type aliases for clarity
pub type Connector = hyper_rustls::HttpsConnector<HttpConnector>;

pub type HubType = CalendarHub<Connector>;

/// TLS connector shared by every per-call hub.
pub fn build_connector() -> std::io::Result<Connector> {
    Ok(HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .build())
}

/// Builds a hub authenticated with exactly one access token.
///
/// Hubs are never cached: each calendar call gets one built from the credential row
/// that was just validated, so a token can't leak across therapists or requests.
pub fn hub_for_token(connector: &Connector, access_token: &str) -> HubType {
    let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector.clone());
    CalendarHub::new(client, access_token.to_string())
}
