use axum::{extract::State, Json};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub active_runs: usize,
}

/// GET /health
///
/// Liveness plus a database ping. Reports `degraded` when SQLite does not answer.
pub async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check could not reach the database: {e}");
            false
        }
    };

    Json(Health {
        status: if database { "ok" } else { "degraded" },
        service: "outreach",
        version: env!("CARGO_PKG_VERSION"),
        database,
        active_runs: state.runs.len(),
    })
}
