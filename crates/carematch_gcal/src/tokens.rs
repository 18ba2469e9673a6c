//! Token lifecycle for therapist calendar integrations.
//!
//! Every calendar call starts with [`TokenLifecycleManager::ensure_valid_tokens`], which
//! hands back an [`ActiveClient`] holding an access token with more than the refresh
//! threshold left. The manager is the only writer of calendar credential columns.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use carematch_common::models::CalendarCredential;
use carematch_common::{bounded, CareMatchError, Classify, FailureClass};
use carematch_config::GcalConfig;
use carematch_db::{DbError, SqlCalendarCredentialRepository};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::oauth::{OAuthError, OAuthSettings, StateSigner, TokenEndpoint};

const PRIMARY_CALENDAR: &str = "primary";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Calendar authorization expired for therapist {therapist_id}")]
    AuthExpired { therapist_id: String },

    #[error("OAuth endpoint error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("No refresh token was issued for therapist {therapist_id}")]
    MissingRefreshToken { therapist_id: String },

    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    #[error("Therapist not found: {0}")]
    NotFound(String),

    #[error("Credential store error: {0}")]
    Store(#[from] DbError),
}

impl Classify for TokenError {
    fn classify(&self) -> FailureClass {
        match self {
            TokenError::AuthExpired { .. } => FailureClass::Terminal,
            TokenError::OAuth(e) => e.classify(),
            TokenError::MissingRefreshToken { .. }
            | TokenError::InvalidState(_)
            | TokenError::NotFound(_) => FailureClass::Validation,
            TokenError::Store(_) => FailureClass::Terminal,
        }
    }
}

impl From<TokenError> for CareMatchError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::AuthExpired { therapist_id } => CareMatchError::AuthExpired { therapist_id },
            TokenError::OAuth(e) if e.is_transient() => CareMatchError::ExternalServiceTransient {
                service: "gcal_oauth".to_string(),
                message: e.to_string(),
            },
            TokenError::OAuth(e) => {
                CareMatchError::Validation(format!("Calendar authorization was rejected: {}", e.message))
            }
            TokenError::MissingRefreshToken { .. } => CareMatchError::Validation(
                "Google did not issue a refresh token. Remove CareMatch from your Google account's \
                 third-party access and connect the calendar again."
                    .to_string(),
            ),
            TokenError::InvalidState(msg) => CareMatchError::Forbidden(msg),
            TokenError::NotFound(id) => CareMatchError::NotFound(format!("therapist {}", id)),
            TokenError::Store(e) => e.into(),
        }
    }
}

/// A validated access token, scoped to one therapist and one request.
#[derive(Clone)]
pub struct ActiveClient {
    pub therapist_id: String,
    pub access_token: String,
    /// Calendar to query: the connected account's email, or `primary`.
    pub calendar_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ActiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveClient")
            .field("therapist_id", &self.therapist_id)
            .field("calendar_id", &self.calendar_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenLifecycleManager<E: TokenEndpoint> {
    endpoint: Arc<E>,
    credentials: SqlCalendarCredentialRepository,
    settings: OAuthSettings,
    state_signer: StateSigner,
    refresh_threshold: Duration,
    call_timeout: StdDuration,
}

impl<E: TokenEndpoint> TokenLifecycleManager<E> {
    pub fn new(
        endpoint: Arc<E>,
        credentials: SqlCalendarCredentialRepository,
        config: &GcalConfig,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            settings: OAuthSettings::from(config),
            state_signer: StateSigner::new(&config.oauth_state_secret),
            refresh_threshold: Duration::seconds(config.refresh_threshold_secs()),
            call_timeout,
        }
    }

    /// Consent URL for a therapist connecting their calendar.
    pub fn authorization_url(&self, therapist_id: &str) -> Result<String, TokenError> {
        let state = self
            .state_signer
            .sign(therapist_id, Utc::now())
            .map_err(TokenError::InvalidState)?;
        Ok(self.settings.authorization_url(&state))
    }

    /// Finishes the consent redirect. Returns the therapist id carried by `state`.
    #[instrument(skip(self, code, state))]
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<String, TokenError> {
        let therapist_id = self
            .state_signer
            .verify(state, Utc::now())
            .map_err(TokenError::InvalidState)?;

        let grant = bounded("gcal_oauth", self.call_timeout, self.endpoint.exchange_code(code)).await?;
        let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
            error!(therapist_id = %therapist_id, "Authorization code exchange returned no refresh token");
            TokenError::MissingRefreshToken {
                therapist_id: therapist_id.clone(),
            }
        })?;

        let calendar_email = match bounded(
            "gcal_oauth",
            self.call_timeout,
            self.endpoint.token_info(&grant.access_token),
        )
        .await
        {
            Ok(info) => info.email,
            Err(e) => {
                warn!(therapist_id = %therapist_id, "Could not read calendar email: {}", e);
                None
            }
        };

        self.credentials
            .connect(
                &therapist_id,
                &grant.access_token,
                &refresh_token,
                grant.expires_at(Utc::now()),
                calendar_email.as_deref(),
            )
            .await
            .map_err(|e| match e {
                DbError::NotFound(_) => TokenError::NotFound(therapist_id.clone()),
                other => TokenError::Store(other),
            })?;

        Ok(therapist_id)
    }

    /// Returns a client whose access token outlives the refresh threshold.
    ///
    /// A disconnected integration fails with `AuthExpired` without any network call.
    #[instrument(skip(self))]
    pub async fn ensure_valid_tokens(&self, therapist_id: &str) -> Result<ActiveClient, TokenError> {
        let credential = self.load_connected(therapist_id).await?;
        let now = Utc::now();

        let expires_at = match (&credential.access_token, credential.token_expires_at) {
            (None, _) => None,
            (Some(_), Some(expires_at)) => Some(expires_at),
            (Some(token), None) => {
                match bounded("gcal_oauth", self.call_timeout, self.endpoint.token_info(token)).await {
                    Ok(info) => Some(info.expires_at),
                    Err(e) => {
                        // Validation failure means refresh
                        debug!(therapist_id = %therapist_id, "Token validation failed: {}", e);
                        None
                    }
                }
            }
        };

        match (credential.access_token.as_ref(), expires_at) {
            (Some(token), Some(expires_at)) if expires_at - now > self.refresh_threshold => {
                Ok(ActiveClient {
                    therapist_id: credential.therapist_id.clone(),
                    access_token: token.clone(),
                    calendar_id: calendar_id_for(&credential),
                    expires_at: Some(expires_at),
                })
            }
            _ => self.refresh(credential).await,
        }
    }

    /// Refreshes regardless of the stored expiry, after the calendar rejected a token.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self, therapist_id: &str) -> Result<ActiveClient, TokenError> {
        let credential = self.load_connected(therapist_id).await?;
        self.refresh(credential).await
    }

    async fn load_connected(&self, therapist_id: &str) -> Result<CalendarCredential, TokenError> {
        let credential = self
            .credentials
            .load(therapist_id)
            .await?
            .ok_or_else(|| TokenError::NotFound(therapist_id.to_string()))?;

        if !credential.is_connected() || credential.refresh_token.is_none() {
            debug!(therapist_id = %therapist_id, "Calendar integration not connected");
            return Err(TokenError::AuthExpired {
                therapist_id: therapist_id.to_string(),
            });
        }
        Ok(credential)
    }

    async fn refresh(&self, credential: CalendarCredential) -> Result<ActiveClient, TokenError> {
        let therapist_id = credential.therapist_id.clone();
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or_else(|| TokenError::AuthExpired {
                therapist_id: therapist_id.clone(),
            })?;

        match bounded("gcal_oauth", self.call_timeout, self.endpoint.refresh(&refresh_token)).await {
            Ok(grant) => {
                let expires_at = grant.expires_at(Utc::now());
                // Durable before use
                self.credentials
                    .store_refreshed_tokens(
                        &therapist_id,
                        &grant.access_token,
                        grant.refresh_token.as_deref(),
                        expires_at,
                    )
                    .await
                    .map_err(|e| match e {
                        DbError::NotFound(_) => TokenError::AuthExpired {
                            therapist_id: therapist_id.clone(),
                        },
                        other => TokenError::Store(other),
                    })?;
                info!(therapist_id = %therapist_id, "Refreshed calendar access token");

                Ok(ActiveClient {
                    therapist_id,
                    access_token: grant.access_token,
                    calendar_id: calendar_id_for(&credential),
                    expires_at,
                })
            }
            Err(e) if e.is_terminal() => {
                warn!(
                    therapist_id = %therapist_id,
                    "Refresh token rejected, disconnecting calendar: {}", e
                );
                self.credentials.disconnect(&therapist_id).await?;
                Err(TokenError::AuthExpired { therapist_id })
            }
            Err(e) => {
                warn!(therapist_id = %therapist_id, "Transient token refresh failure: {}", e);
                Err(TokenError::OAuth(e))
            }
        }
    }
}

fn calendar_id_for(credential: &CalendarCredential) -> String {
    credential
        .calendar_email
        .clone()
        .unwrap_or_else(|| PRIMARY_CALENDAR.to_string())
}
