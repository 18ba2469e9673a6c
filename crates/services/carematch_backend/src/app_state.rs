// --- File: crates/services/carematch_backend/src/app_state.rs ---
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use carematch_common::CareMatchError;
use carematch_config::AppConfig;
use carematch_db::DbClient;
use serde_json::{json, Value};

use crate::service_factory::CareMatchServiceFactory;

/// Application state that is shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbClient,
    pub services: Arc<CareMatchServiceFactory>,
}

impl AppState {
    /// Connects the database, bootstraps the schema and wires the services.
    pub async fn new(config: Arc<AppConfig>) -> Result<Self, CareMatchError> {
        let db = DbClient::new(&config).await?;
        db.init_schema().await?;
        let services = CareMatchServiceFactory::new(&config, db.clone())?;
        Ok(Self {
            config,
            db,
            services: Arc::new(services),
        })
    }

    /// Every API route, without the `/api` prefix.
    pub fn api_router(&self) -> Router {
        Router::new()
            .route("/", get(|| async { "Welcome to CareMatch API!" }))
            .route("/health", get(health))
            .with_state(self.clone())
            .merge(carematch_booking::routes(self.services.booking.clone()))
            .merge(carematch_stripe::routes(self.services.stripe.clone()))
    }
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.db.is_healthy().await {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unreachable" })),
        )
    }
}
