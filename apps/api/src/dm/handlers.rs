//! Axum route handler for launching DM campaigns.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::info;

use crate::dm::machine::{DmCampaignRequest, DmRun, DmTimings};
use crate::dm::targeting::{parse_city_state, INTERNSHIP_JOB_TYPE};
use crate::errors::AppError;
use crate::outreach::generation::DraftContext;
use crate::outreach::handlers::{require_text, require_user, resume_text, validate_count, RunStarted};
use crate::state::AppState;

/// POST /api/v1/campaigns/dm
///
/// Starts a browser session in the background. The run pauses on a
/// `login-wait` event until `/api/v1/runs/:id/confirm-login` is called.
pub async fn handle_start_dm_campaign(
    State(state): State<AppState>,
    Json(req): Json<DmCampaignRequest>,
) -> Result<(StatusCode, Json<RunStarted>), AppError> {
    validate_count(req.count)?;
    require_text(&req.job_field, "job_field")?;
    parse_city_state(&req.city)?;

    let user = require_user(&state, req.user_id).await?;
    let Some(resume) = resume_text(&user).await else {
        return Err(AppError::Validation(
            "Upload a readable PDF résumé before starting a DM campaign".to_string(),
        ));
    };

    let config = &state.config;
    let run = DmRun {
        db: state.db.clone(),
        llm: state.llm.clone(),
        ledger: state.dm_ledger.clone(),
        launcher: state.launcher.clone(),
        catalog: Arc::clone(&state.industries),
        scope: config.dedup_scope,
        retry: state.run_settings().retry,
        timings: DmTimings::new(config.login_timeout, config.browser_grace),
        user_id: req.user_id,
        city: req.city.trim().to_string(),
        job_field: req.job_field.trim().to_string(),
        count: req.count,
        job_type: req.internships_only.then_some(INTERNSHIP_JOB_TYPE),
        draft_context: DraftContext::new(Some(&resume), req.custom_message.as_deref()),
    };

    let run_id = state.runs.launch(|handle| run.run(handle));

    info!(
        "Started DM run {run_id} for user {} ({} runs active)",
        req.user_id,
        state.runs.len()
    );
    Ok((StatusCode::ACCEPTED, Json(RunStarted { run_id })))
}
