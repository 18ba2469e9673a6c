// --- File: crates/services/carematch_backend/src/lib.rs ---
pub mod app_state; // Shared state and the /api router
pub mod service_factory; // Production collaborators wired from configuration
