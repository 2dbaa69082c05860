//! Generation stage: one LLM-drafted message per candidate.

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm_client::{parse_json, LlmError, LlmProvider};
use crate::outreach::candidate::{Candidate, DraftedMessage};
use crate::outreach::prompts::{
    CUSTOM_SECTION_TEMPLATE, DM_DRAFT_PROMPT_TEMPLATE, DM_DRAFT_SYSTEM, DM_FALLBACK_BODY_TEMPLATE,
    EMAIL_DRAFT_PROMPT_TEMPLATE, EMAIL_DRAFT_SYSTEM, RESUME_SECTION_TEMPLATE,
};

/// Characters of résumé text embedded in a prompt.
pub const RESUME_EXCERPT_CHARS: usize = 6000;

const EMAIL_MAX_TOKENS: u32 = 1024;
const DM_MAX_TOKENS: u32 = 500;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM call failed while drafting for {organization}: {source}")]
    Llm {
        organization: String,
        #[source]
        source: LlmError,
    },

    #[error("Draft for {organization} was malformed: {reason}")]
    Malformed {
        organization: String,
        reason: String,
    },
}

/// What happens when one candidate cannot be drafted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenerationMode {
    /// The first failure fails the whole stage.
    #[default]
    Strict,
    /// Failed candidates are reported and dropped.
    BestEffort,
}

/// Per-user inputs shared by every draft in a run.
#[derive(Debug, Clone, Default)]
pub struct DraftContext {
    pub resume_excerpt: Option<String>,
    pub customization: Option<String>,
}

impl DraftContext {
    pub fn new(resume_text: Option<&str>, customization: Option<&str>) -> Self {
        Self {
            resume_excerpt: resume_text
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| t.chars().take(RESUME_EXCERPT_CHARS).collect()),
            customization: customization
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        }
    }

    fn resume_section(&self) -> String {
        self.resume_excerpt
            .as_deref()
            .map(|t| RESUME_SECTION_TEMPLATE.replace("{resume_text}", t))
            .unwrap_or_default()
    }

    fn custom_section(&self) -> String {
        self.customization
            .as_deref()
            .map(|c| CUSTOM_SECTION_TEMPLATE.replace("{custom_message}", c))
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    body_text: String,
}

/// Output of a best-effort run: the drafts plus who was dropped and why.
#[derive(Debug, Default)]
pub struct GenerationReport {
    pub drafts: Vec<DraftedMessage>,
    pub failures: Vec<(Candidate, GenerationError)>,
}

/// Drafts one message per candidate, in order.
///
/// In `Strict` mode the result holds exactly one draft per input candidate or
/// the first error. In `BestEffort` mode failures are collected in the report.
pub async fn generate_drafts(
    llm: &dyn LlmProvider,
    candidates: &[Candidate],
    ctx: &DraftContext,
    mode: GenerationMode,
) -> Result<GenerationReport, GenerationError> {
    let mut report = GenerationReport::default();

    for candidate in candidates {
        match draft_email(llm, candidate, ctx).await {
            Ok(draft) => report.drafts.push(draft),
            Err(e) if mode == GenerationMode::BestEffort => {
                warn!("Skipping {}: {e}", candidate.organization_name);
                report.failures.push((candidate.clone(), e));
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Generated {} drafts ({} failed)",
        report.drafts.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Drafts a single email; the LLM returns `{"body_text": ...}`.
pub async fn draft_email(
    llm: &dyn LlmProvider,
    candidate: &Candidate,
    ctx: &DraftContext,
) -> Result<DraftedMessage, GenerationError> {
    let organization = candidate.organization_name.clone();
    let contact_line = match &candidate.contact_name {
        Some(name) => format!("The email goes to {name}."),
        None => "No contact name is known.".to_string(),
    };

    let prompt = EMAIL_DRAFT_PROMPT_TEMPLATE
        .replace("{industry}", candidate.origin_criteria.field())
        .replace("{organization_name}", &candidate.organization_name)
        .replace("{contact_line}", &contact_line)
        .replace("{resume_section}", &ctx.resume_section())
        .replace("{custom_section}", &ctx.custom_section());

    let text = llm
        .complete(&prompt, EMAIL_DRAFT_SYSTEM, EMAIL_MAX_TOKENS)
        .await
        .map_err(|source| GenerationError::Llm {
            organization: organization.clone(),
            source,
        })?;

    let response: DraftResponse = parse_json(&text).map_err(|e| GenerationError::Malformed {
        organization: organization.clone(),
        reason: e.to_string(),
    })?;

    let body_text = response.body_text.trim().to_string();
    if body_text.is_empty() {
        return Err(GenerationError::Malformed {
            organization,
            reason: "body_text is empty".to_string(),
        });
    }

    Ok(DraftedMessage {
        candidate: candidate.clone(),
        body_text,
        generated_at: Utc::now(),
    })
}

/// Drafts a recruiter DM. Never fails: an LLM error falls back to a fixed body.
///
/// The final text is `"{greeting},\n\n{body}\n\nBest regards"`, greeting the
/// recruiter by name when one is known.
pub async fn draft_dm(
    llm: &dyn LlmProvider,
    candidate: &Candidate,
    ctx: &DraftContext,
) -> DraftedMessage {
    let recruiter = candidate.contact_name.as_deref();
    let prompt = DM_DRAFT_PROMPT_TEMPLATE
        .replace("{organization_name}", &candidate.organization_name)
        .replace("{recruiter}", recruiter.unwrap_or("Unknown"))
        .replace("{resume_section}", &ctx.resume_section())
        .replace("{custom_section}", &ctx.custom_section());

    let body = match llm.complete(&prompt, DM_DRAFT_SYSTEM, DM_MAX_TOKENS).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!(
                "Empty DM draft for {}, using fallback",
                candidate.organization_name
            );
            fallback_dm_body(&candidate.organization_name)
        }
        Err(e) => {
            warn!(
                "DM draft for {} failed ({e}), using fallback",
                candidate.organization_name
            );
            fallback_dm_body(&candidate.organization_name)
        }
    };

    DraftedMessage {
        candidate: candidate.clone(),
        body_text: format!("{},\n\n{body}\n\nBest regards", dm_greeting(recruiter)),
        generated_at: Utc::now(),
    }
}

pub fn dm_greeting(recruiter: Option<&str>) -> String {
    match recruiter.map(str::trim).filter(|r| !r.is_empty()) {
        Some(name) => format!("Hi {name}"),
        None => "Hello".to_string(),
    }
}

fn fallback_dm_body(organization_name: &str) -> String {
    DM_FALLBACK_BODY_TEMPLATE.replace("{organization_name}", organization_name)
}
