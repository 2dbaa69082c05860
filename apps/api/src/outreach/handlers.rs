//! Axum route handlers for users, résumés, history and email campaigns.

use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::campaign::{list_runs, CampaignRunRow};
use crate::models::contact::ContactRecordRow;
use crate::models::user::{fetch_user, insert_user, set_resume_path, User};
use crate::outreach::campaign::{EmailCampaignRequest, EmailRun};
use crate::outreach::candidate::{Channel, OriginCriteria};
use crate::outreach::discovery::MAX_REQUESTED;
use crate::outreach::generation::{DraftContext, GenerationMode};
use crate::outreach::history::list_contact_rows;
use crate::outreach::resume::{extract_resume_text, save_resume};
use crate::outreach::smtp::{ResumeAttachment, SmtpSender, SmtpSettings};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactsQuery {
    #[serde(default)]
    pub channel: Option<Channel>,
}

#[derive(Debug, Serialize)]
pub struct RunStarted {
    pub run_id: Uuid,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ────────────────────────────────────────────────────────────────────────────

pub(crate) async fn require_user(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    fetch_user(&state.db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
}

pub(crate) fn validate_count(count: u32) -> Result<(), AppError> {
    if count == 0 || count > MAX_REQUESTED {
        return Err(AppError::Validation(format!(
            "count must be between 1 and {MAX_REQUESTED}"
        )));
    }
    Ok(())
}

pub(crate) fn require_text(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Text of the user's résumé for prompts, if one was uploaded and is readable.
pub(crate) async fn resume_text(user: &User) -> Option<String> {
    match &user.resume_path {
        Some(path) => extract_resume_text(FsPath::new(path)).await,
        None => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/users
pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let username = req.username.trim();
    require_text(username, "username")?;

    match insert_user(&state.db, username).await {
        Ok(user) => Ok((StatusCode::CREATED, Json(user))),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
            format!("Username '{username}' is already taken"),
        )),
        Err(e) => Err(e.into()),
    }
}

/// GET /api/v1/users/:id
pub async fn handle_get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    Ok(Json(require_user(&state, user_id).await?))
}

/// POST /api/v1/users/:id/resume
///
/// Multipart upload; the PDF goes in the `resume` field. Replaces any earlier upload.
pub async fn handle_upload_resume(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<User>, AppError> {
    require_user(&state, user_id).await?;

    let mut upload: Option<Bytes> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("resume") {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let bytes = upload.ok_or_else(|| {
        AppError::Validation("multipart field 'resume' is required".to_string())
    })?;

    let path = save_resume(&state.config.resumes_dir(), user_id, bytes.to_vec()).await?;
    set_resume_path(&state.db, user_id, &path.to_string_lossy()).await?;

    Ok(Json(require_user(&state, user_id).await?))
}

/// GET /api/v1/users/:id/contacts?channel=email|dm
///
/// Contact history in the order it was recorded. Defaults to email.
pub async fn handle_list_contacts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<Vec<ContactRecordRow>>, AppError> {
    require_user(&state, user_id).await?;
    let channel = query.channel.unwrap_or(Channel::Email);
    let rows = list_contact_rows(&state.db, user_id, channel).await?;
    Ok(Json(rows))
}

/// GET /api/v1/users/:id/campaigns
pub async fn handle_list_campaigns(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<CampaignRunRow>>, AppError> {
    require_user(&state, user_id).await?;
    Ok(Json(list_runs(&state.db, user_id).await?))
}

/// POST /api/v1/campaigns/email
///
/// Validates the request and the sender's provider, then starts the run in the
/// background. Progress is read from `/api/v1/runs/:id/events`.
pub async fn handle_start_email_campaign(
    State(state): State<AppState>,
    Json(req): Json<EmailCampaignRequest>,
) -> Result<(StatusCode, Json<RunStarted>), AppError> {
    validate_count(req.count)?;
    require_text(&req.location, "location")?;
    require_text(&req.industry, "industry")?;
    require_text(&req.sender_password, "sender_password")?;

    let user = require_user(&state, req.user_id).await?;

    // 1. SMTP first: an unsupported provider fails before anything starts
    let attachment = match &user.resume_path {
        Some(path) => ResumeAttachment::load(FsPath::new(path)).await,
        None => None,
    };
    let settings = SmtpSettings {
        sender_email: req.sender_email.trim().to_string(),
        sender_password: req.sender_password.clone(),
        subject: req
            .subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| state.config.email_subject.clone()),
        host_override: state.config.smtp_host.clone(),
        port_override: state.config.smtp_port,
    };
    let sender = SmtpSender::new(&settings, attachment)?;

    // 2. Prompt context
    let resume = resume_text(&user).await;
    let draft_context = DraftContext::new(resume.as_deref(), req.custom_message.as_deref());

    // 3. Launch
    let run = EmailRun {
        db: state.db.clone(),
        llm: state.llm.clone(),
        ledger: state.email_ledger.clone(),
        sender: std::sync::Arc::new(sender),
        settings: state.run_settings(),
        user_id: req.user_id,
        criteria: OriginCriteria::LocationIndustry {
            location: req.location.trim().to_string(),
            industry: req.industry.trim().to_string(),
        },
        count: req.count,
        mode: if req.best_effort {
            GenerationMode::BestEffort
        } else {
            GenerationMode::Strict
        },
        draft_context,
    };

    let run_id = state.runs.launch(|handle| run.run(handle));

    info!(
        "Started email run {run_id} for user {} ({} runs active)",
        req.user_id,
        state.runs.len()
    );
    Ok((StatusCode::ACCEPTED, Json(RunStarted { run_id })))
}
