// --- File: crates/carematch_gcal/src/oauth.rs ---
//! Google OAuth endpoints for therapist calendar integrations.
//!
//! Covers the consent URL, the code exchange, refresh-token grants and the tokeninfo
//! lookup used to validate an access token's remaining lifetime. Refresh failures are
//! classified once here; the token manager only asks [`Classify`].

use carematch_common::services::BoxFuture;
use carematch_common::{Classify, FailureClass, TimedOut, HTTP_CLIENT};
use carematch_config::GcalConfig;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Scopes requested on first consent. The email scope lets tokeninfo report the
/// calendar owner's address.
pub const CALENDAR_SCOPES: &str =
    "https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/userinfo.email";

/// How long a signed `state` parameter stays valid.
const STATE_MAX_AGE_SECS: i64 = 3600;

/// Error texts that mean the refresh token itself is dead.
const TERMINAL_PATTERNS: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "token expired",
    "token has been expired",
    "refresh token is invalid",
];

/// A failed call to the OAuth token or tokeninfo endpoint.
#[derive(Debug, Clone, Error)]
#[error("OAuth request failed (status {status:?}): {message}")]
pub struct OAuthError {
    /// HTTP status when the endpoint answered; `None` for network failures.
    pub status: Option<u16>,
    pub message: String,
}

impl OAuthError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl Classify for OAuthError {
    fn classify(&self) -> FailureClass {
        classify_oauth_failure(self.status, &self.message)
    }
}

impl From<TimedOut> for OAuthError {
    fn from(err: TimedOut) -> Self {
        OAuthError::new(None, err.to_string())
    }
}

/// Single decision point for OAuth refresh failures.
///
/// 401/403 or a known invalid-grant text is terminal; anything else (network errors,
/// 429, 5xx) is transient and leaves stored credentials untouched.
pub fn classify_oauth_failure(status: Option<u16>, message: &str) -> FailureClass {
    if matches!(status, Some(401) | Some(403)) {
        return FailureClass::Terminal;
    }
    let lowered = message.to_ascii_lowercase();
    if TERMINAL_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return FailureClass::Terminal;
    }
    FailureClass::Transient
}

/// Tokens returned by the token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// What tokeninfo knows about an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub expires_at: DateTime<Utc>,
    pub email: Option<String>,
}

/// The OAuth token endpoint, behind a trait so the token manager can be tested offline.
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token.
    fn refresh(&self, refresh_token: &str) -> BoxFuture<'_, TokenGrant, OAuthError>;

    /// Exchange an authorization code from the consent redirect.
    fn exchange_code(&self, code: &str) -> BoxFuture<'_, TokenGrant, OAuthError>;

    /// Remaining lifetime and owner of an access token.
    fn token_info(&self, access_token: &str) -> BoxFuture<'_, TokenInfo, OAuthError>;
}

/// Client id, secret and endpoints of the Google OAuth application.
#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub tokeninfo_endpoint: String,
}

impl From<&GcalConfig> for OAuthSettings {
    fn from(config: &GcalConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            authorization_endpoint: config.authorization_endpoint().to_string(),
            token_endpoint: config.token_endpoint().to_string(),
            tokeninfo_endpoint: config.tokeninfo_endpoint().to_string(),
        }
    }
}

impl OAuthSettings {
    /// Consent URL for `state`. Always asks for offline access and forces the consent
    /// prompt, since a refresh token is only reliably issued on first consent.
    pub fn authorization_url(&self, state: &str) -> String {
        let query = serde_urlencoded::to_string([
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", CALENDAR_SCOPES),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("include_granted_scopes", "true"),
            ("state", state),
        ])
        .unwrap_or_default();
        format!("{}?{}", self.authorization_endpoint, query)
    }
}

/// reqwest-backed [`TokenEndpoint`] for Google.
#[derive(Clone)]
pub struct GoogleOAuthClient {
    settings: OAuthSettings,
}

#[derive(Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
}

impl GoogleOAuthClient {
    pub fn new(settings: OAuthSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, OAuthError> {
        let response = HTTP_CLIENT
            .post(&self.settings.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Token endpoint returned {}: {}", status, body);
            return Err(OAuthError::new(Some(status.as_u16()), body));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| OAuthError::new(Some(status.as_u16()), format!("Failed to parse token response: {}", e)))
    }
}

impl TokenEndpoint for GoogleOAuthClient {
    fn refresh(&self, refresh_token: &str) -> BoxFuture<'_, TokenGrant, OAuthError> {
        let refresh_token = refresh_token.to_string();
        Box::pin(async move {
            debug!("Refreshing Google access token");
            self.token_request(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await
        })
    }

    fn exchange_code(&self, code: &str) -> BoxFuture<'_, TokenGrant, OAuthError> {
        let code = code.to_string();
        Box::pin(async move {
            debug!("Exchanging Google authorization code");
            self.token_request(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("code", code.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await
        })
    }

    fn token_info(&self, access_token: &str) -> BoxFuture<'_, TokenInfo, OAuthError> {
        let access_token = access_token.to_string();
        Box::pin(async move {
            let response = HTTP_CLIENT
                .get(&self.settings.tokeninfo_endpoint)
                .query(&[("access_token", access_token.as_str())])
                .send()
                .await
                .map_err(|e| OAuthError::new(None, e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(OAuthError::new(Some(status.as_u16()), body));
            }

            let info: TokenInfoResponse = response
                .json()
                .await
                .map_err(|e| OAuthError::new(Some(status.as_u16()), e.to_string()))?;

            // tokeninfo reports expires_in as a string
            let expires_in = match info.expires_in {
                Some(serde_json::Value::Number(n)) => n.as_i64(),
                Some(serde_json::Value::String(s)) => s.parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| OAuthError::new(Some(status.as_u16()), "tokeninfo without expires_in"))?;

            Ok(TokenInfo {
                expires_at: Utc::now() + Duration::seconds(expires_in),
                email: info.email,
            })
        })
    }
}

/// Signs and verifies the OAuth `state` parameter so a callback can only connect the
/// therapist that started the flow.
#[derive(Clone)]
pub struct StateSigner {
    secret: Vec<u8>,
}

impl StateSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| format!("invalid state secret: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// `{therapist_id}.{issued_at}.{hex hmac}`
    #[instrument(skip(self))]
    pub fn sign(&self, therapist_id: &str, issued_at: DateTime<Utc>) -> Result<String, String> {
        let payload = format!("{}.{}", therapist_id, issued_at.timestamp());
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// Returns the therapist id carried by a valid, unexpired `state`.
    pub fn verify(&self, state: &str, now: DateTime<Utc>) -> Result<String, String> {
        let mut parts = state.rsplitn(3, '.');
        let (signature, issued_at, therapist_id) = match (parts.next(), parts.next(), parts.next())
        {
            (Some(sig), Some(ts), Some(id)) if !id.is_empty() => (sig, ts, id),
            _ => return Err("malformed state".to_string()),
        };

        let issued_at: i64 = issued_at
            .parse()
            .map_err(|_| "malformed state timestamp".to_string())?;
        let age = now.timestamp() - issued_at;
        if !(0..=STATE_MAX_AGE_SECS).contains(&age) {
            return Err("state expired".to_string());
        }

        let signature = hex::decode(signature).map_err(|_| "malformed state signature".to_string())?;
        self.mac(&format!("{}.{}", therapist_id, issued_at))?
            .verify_slice(&signature)
            .map_err(|_| "state signature mismatch".to_string())?;

        Ok(therapist_id.to_string())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted token endpoint. Refreshes succeed with `access-N` tokens unless a
    /// failure has been queued.
    #[derive(Default)]
    pub struct MockTokenEndpoint {
        refresh_failures: Mutex<VecDeque<OAuthError>>,
        exchange_grant: Mutex<Option<TokenGrant>>,
        email: Mutex<Option<String>>,
        token_lifetime_secs: Mutex<Option<i64>>,
        refresh_calls: AtomicUsize,
        token_info_calls: AtomicUsize,
    }

    impl MockTokenEndpoint {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next_refresh(&self, status: Option<u16>, message: &str) {
            lock(&self.refresh_failures).push_back(OAuthError::new(status, message));
        }

        pub fn set_exchange_grant(&self, grant: TokenGrant) {
            *lock(&self.exchange_grant) = Some(grant);
        }

        pub fn set_email(&self, email: &str) {
            *lock(&self.email) = Some(email.to_string());
        }

        /// Lifetime reported by tokeninfo; unset makes tokeninfo fail.
        pub fn set_token_lifetime(&self, secs: i64) {
            *lock(&self.token_lifetime_secs) = Some(secs);
        }

        pub fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        pub fn token_info_calls(&self) -> usize {
            self.token_info_calls.load(Ordering::SeqCst)
        }
    }

    fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    impl TokenEndpoint for MockTokenEndpoint {
        fn refresh(&self, _refresh_token: &str) -> BoxFuture<'_, TokenGrant, OAuthError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = match lock(&self.refresh_failures).pop_front() {
                Some(err) => Err(err),
                None => Ok(TokenGrant {
                    access_token: format!("access-{}", n),
                    refresh_token: None,
                    expires_in: Some(3600),
                    scope: Some(CALENDAR_SCOPES.to_string()),
                }),
            };
            Box::pin(async move { result })
        }

        fn exchange_code(&self, _code: &str) -> BoxFuture<'_, TokenGrant, OAuthError> {
            let result = lock(&self.exchange_grant)
                .clone()
                .ok_or_else(|| OAuthError::new(Some(400), "invalid_grant: code already used"));
            Box::pin(async move { result })
        }

        fn token_info(&self, _access_token: &str) -> BoxFuture<'_, TokenInfo, OAuthError> {
            self.token_info_calls.fetch_add(1, Ordering::SeqCst);
            let lifetime = *lock(&self.token_lifetime_secs);
            let email = lock(&self.email).clone();
            let result = match lifetime {
                Some(secs) => Ok(TokenInfo {
                    expires_at: Utc::now() + Duration::seconds(secs),
                    email,
                }),
                None => Err(OAuthError::new(Some(400), "invalid_token")),
            };
            Box::pin(async move { result })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_oauth_failure() {
        assert_eq!(classify_oauth_failure(Some(401), "whatever"), FailureClass::Terminal);
        assert_eq!(classify_oauth_failure(Some(403), ""), FailureClass::Terminal);
        assert_eq!(
            classify_oauth_failure(
                Some(400),
                r#"{"error": "invalid_grant", "error_description": "Bad Request"}"#
            ),
            FailureClass::Terminal
        );
        assert_eq!(
            classify_oauth_failure(None, "The Refresh Token is invalid"),
            FailureClass::Terminal
        );
        assert_eq!(classify_oauth_failure(Some(503), "backend error"), FailureClass::Transient);
        assert_eq!(classify_oauth_failure(Some(429), "rate limited"), FailureClass::Transient);
        assert_eq!(classify_oauth_failure(None, "connection reset"), FailureClass::Transient);
    }

    #[test]
    fn test_authorization_url_forces_offline_consent() {
        let settings = OAuthSettings {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://app.example.com/cb".into(),
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_endpoint: "https://oauth2.googleapis.com/token".into(),
            tokeninfo_endpoint: "https://oauth2.googleapis.com/tokeninfo".into(),
        };
        let url = settings.authorization_url("st.1.ab");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=st.1.ab"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb"));
    }

    #[test]
    fn test_state_round_trip_and_tamper() {
        let signer = StateSigner::new("state-secret");
        let now = Utc::now();
        let state = signer.sign("ther-1", now).unwrap();
        assert_eq!(signer.verify(&state, now).unwrap(), "ther-1");

        let tampered = state.replacen("ther-1", "ther-2", 1);
        assert!(signer.verify(&tampered, now).is_err());
        assert!(signer
            .verify(&state, now + Duration::seconds(STATE_MAX_AGE_SECS + 1))
            .is_err());
        assert!(StateSigner::new("other").verify(&state, now).is_err());
        assert!(signer.verify("garbage", now).is_err());
    }
}
