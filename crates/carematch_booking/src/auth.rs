// --- File: crates/carematch_booking/src/auth.rs ---

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use carematch_common::models::{BookingSession, Role};
use carematch_common::CareMatchError;
use serde_json::json;
use tracing::warn;

/// Header carrying the caller's internal user id, set by the identity provider.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's role: `client`, `therapist` or `admin`.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller as resolved upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub role: Role,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fails unless the caller has `role` (admins pass every check).
    pub fn require(&self, role: Role) -> Result<(), CareMatchError> {
        if self.role == role || self.is_admin() {
            Ok(())
        } else {
            Err(CareMatchError::Forbidden(format!(
                "this operation requires the {:?} role",
                role
            )))
        }
    }

    /// Client, therapist or an admin may act on a booking.
    pub fn ensure_party_to(&self, booking: &BookingSession) -> Result<(), CareMatchError> {
        let allowed = match self.role {
            Role::Admin => true,
            Role::Client => booking.client_id == self.user_id,
            Role::Therapist => booking.therapist_id == self.user_id,
        };
        if allowed {
            Ok(())
        } else {
            Err(CareMatchError::Forbidden(format!(
                "booking {} does not belong to the caller",
                booking.id
            )))
        }
    }
}

/// Rejection for requests that arrive without a resolved identity.
#[derive(Debug)]
pub struct MissingIdentity(pub String);

impl IntoResponse for MissingIdentity {
    fn into_response(self) -> Response {
        warn!("Rejected request without caller identity: {}", self.0);
        let body = Json(json!({
            "error": {
                "message": self.0,
                "code": StatusCode::UNAUTHORIZED.as_u16(),
                "kind": "unauthenticated",
            }
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = MissingIdentity;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| MissingIdentity(format!("Missing '{}' header", USER_ID_HEADER)))?;
        let role = header(USER_ROLE_HEADER)
            .ok_or_else(|| MissingIdentity(format!("Missing '{}' header", USER_ROLE_HEADER)))?
            .parse::<Role>()
            .map_err(|e| MissingIdentity(e.to_string()))?;

        Ok(CallerIdentity::new(user_id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<CallerIdentity, MissingIdentity> {
        let mut builder = Request::builder().uri("/bookings");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CallerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_identity_from_headers() {
        let caller = extract(&[("x-user-id", "client-1"), ("x-user-role", "Client")])
            .await
            .unwrap();
        assert_eq!(caller, CallerIdentity::new("client-1", Role::Client));
    }

    #[tokio::test]
    async fn test_missing_or_unknown_role_is_rejected() {
        assert!(extract(&[("x-user-id", "client-1")]).await.is_err());
        assert!(extract(&[("x-user-role", "client")]).await.is_err());
        assert!(extract(&[("x-user-id", "u"), ("x-user-role", "root")]).await.is_err());
    }

    #[test]
    fn test_role_checks() {
        let admin = CallerIdentity::new("a", Role::Admin);
        let therapist = CallerIdentity::new("t", Role::Therapist);
        assert!(admin.require(Role::Therapist).is_ok());
        assert!(therapist.require(Role::Therapist).is_ok());
        assert!(therapist.require(Role::Client).is_err());
    }
}
