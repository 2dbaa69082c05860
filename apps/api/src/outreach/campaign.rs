//! Email campaign run: Discovery → Filter → Generation → Delivery on one task.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::llm_client::LlmProvider;
use crate::models::campaign::{finish_run, insert_run};
use crate::outreach::candidate::{Candidate, Channel, DedupScope, OriginCriteria};
use crate::outreach::delivery::{Delivery, DeliveryTally, MessageSender};
use crate::outreach::discovery::{discover, DiscoveryError};
use crate::outreach::filter::filter_new;
use crate::outreach::generation::{generate_drafts, DraftContext, GenerationMode};
use crate::outreach::history::SqliteHistory;
use crate::outreach::ledger::{Ledger, RetryPolicy, UserLedger};
use crate::runs::{EventStatus, ProgressSink, RunControl, RunHandle};

/// Body of `POST /api/v1/campaigns/email`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailCampaignRequest {
    pub user_id: Uuid,
    pub location: String,
    pub industry: String,
    pub count: u32,
    #[serde(default)]
    pub custom_message: Option<String>,
    pub sender_email: String,
    pub sender_password: String,
    #[serde(default)]
    pub subject: Option<String>,
    /// Drop candidates whose draft fails instead of failing the run.
    #[serde(default)]
    pub best_effort: bool,
}

/// Knobs that come from configuration rather than the request.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub scope: DedupScope,
    pub pacing: std::time::Duration,
    pub max_discovery_attempts: u32,
    pub retry: RetryPolicy,
}

/// Everything one email run owns. Built by the handler, consumed by `run`.
pub struct EmailRun {
    pub db: SqlitePool,
    pub llm: Arc<dyn LlmProvider>,
    /// The shared email ledger file. The run only sees its user's keys.
    pub ledger: Arc<dyn Ledger>,
    pub sender: Arc<dyn MessageSender>,
    pub settings: RunSettings,
    pub user_id: Uuid,
    pub criteria: OriginCriteria,
    pub count: u32,
    pub mode: GenerationMode,
    pub draft_context: DraftContext,
}

/// How a run ended, before it is written to the database and the stream.
pub(crate) enum RunOutcome {
    Completed(DeliveryTally),
    /// Finished normally with nothing to send; carries the reason.
    NothingToSend(String),
    Cancelled(DeliveryTally),
    Failed(String),
}

/// Stores the final tally and emits the terminal event.
pub(crate) async fn conclude(
    db: &SqlitePool,
    id: Uuid,
    outcome: RunOutcome,
    progress: &ProgressSink,
) {
    let (status, tally) = match &outcome {
        RunOutcome::Completed(t) => ("completed", *t),
        RunOutcome::NothingToSend(_) => ("completed", DeliveryTally::default()),
        RunOutcome::Cancelled(t) => ("cancelled", *t),
        RunOutcome::Failed(_) => ("failed", DeliveryTally::default()),
    };
    if let Err(e) = finish_run(db, id, status, &tally).await {
        warn!("Failed to record end of run {id}: {e}");
    }

    match outcome {
        RunOutcome::Completed(t) => progress.finish(
            EventStatus::Success,
            format!("Campaign complete: {}", t.summary()),
            Some(t.sent),
        ),
        RunOutcome::NothingToSend(reason) => {
            info!("Run {id} had nothing to send: {reason}");
            progress.finish(EventStatus::Info, reason, Some(0))
        }
        RunOutcome::Cancelled(t) => progress.finish(
            EventStatus::Info,
            format!("Campaign cancelled: {}", t.summary()),
            Some(t.sent),
        ),
        RunOutcome::Failed(message) => {
            error!("Run {id} failed: {message}");
            progress.finish(EventStatus::Error, message, None)
        }
    }
}

impl EmailRun {
    /// Runs to completion and always ends the stream with a terminal event.
    pub async fn run(self, handle: RunHandle) {
        let RunHandle {
            id,
            progress,
            control,
        } = handle;

        if let Err(e) = insert_run(&self.db, id, self.user_id, Channel::Email).await {
            warn!("Failed to record start of run {id}: {e}");
        }

        let outcome = self.execute(&progress, &control).await;
        conclude(&self.db, id, outcome, &progress).await;
    }

    async fn execute(&self, progress: &ProgressSink, control: &RunControl) -> RunOutcome {
        let history = SqliteHistory::new(self.db.clone(), self.user_id, Channel::Email);
        let ledger = UserLedger::new(
            self.ledger.clone(),
            self.user_id,
            self.settings.scope == DedupScope::Shared,
        );

        // 1. Everything this user must not contact again
        let mut seen = ledger.keys().await;
        match history.keys().await {
            Ok(keys) => seen.extend(keys),
            Err(e) => return RunOutcome::Failed(format!("Could not load contact history: {e}")),
        }

        // 2. Discovery + Filter, in rounds until enough fresh candidates are found
        let collected = match collect_candidates(
            self.llm.as_ref(),
            &self.criteria,
            self.count,
            &seen,
            self.settings,
            progress,
            control,
        )
        .await
        {
            Ok(c) => c,
            Err(e) => return RunOutcome::Failed(format!("Discovery failed: {e}")),
        };

        if control.is_cancelled() {
            return RunOutcome::Cancelled(DeliveryTally::default());
        }
        let candidates = collected.candidates;
        if candidates.is_empty() {
            let reason = if collected.discovered == 0 {
                "No companies found for these criteria; nothing to send".to_string()
            } else {
                format!(
                    "All {} companies found had already been contacted; nothing to send",
                    collected.discovered
                )
            };
            return RunOutcome::NothingToSend(reason);
        }

        // 3. Generation
        progress.in_progress(format!(
            "Drafting {} personalized emails...",
            candidates.len()
        ));
        let report = match generate_drafts(
            self.llm.as_ref(),
            &candidates,
            &self.draft_context,
            self.mode,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return RunOutcome::Failed(format!("Drafting failed: {e}")),
        };
        for (candidate, e) in &report.failures {
            progress.error(format!("Could not draft for {}: {e}", candidate.organization_name));
        }
        progress.success(format!("Drafted {} emails", report.drafts.len()));

        // 4. Delivery
        let delivery = Delivery {
            ledger: &ledger,
            history: &history,
            sender: self.sender.as_ref(),
            scope: self.settings.scope,
            pacing: self.settings.pacing,
            retry: self.settings.retry,
            progress,
            control,
        };
        let mut tally = delivery.deliver(&report.drafts).await;
        tally.failed += report.failures.len() as u32;

        if control.is_cancelled() {
            RunOutcome::Cancelled(tally)
        } else {
            RunOutcome::Completed(tally)
        }
    }
}

/// Result of the discovery rounds.
#[derive(Debug, Default)]
pub struct Collected {
    /// Fresh candidates, in discovery order.
    pub candidates: Vec<Candidate>,
    /// Everything the LLM returned across rounds, duplicates included.
    pub discovered: usize,
}

/// Repeats Discovery + Filter until `wanted` fresh candidates are collected, a
/// round comes back empty, or the attempt budget runs out.
///
/// Each round asks for `max(5, wanted)` so duplicates do not starve the run.
/// Keys collected in earlier rounds count as seen for later ones.
pub async fn collect_candidates(
    llm: &dyn LlmProvider,
    criteria: &OriginCriteria,
    wanted: u32,
    seen: &HashSet<String>,
    settings: RunSettings,
    progress: &ProgressSink,
    control: &RunControl,
) -> Result<Collected, DiscoveryError> {
    let wanted = wanted as usize;
    let batch_size = wanted.max(5) as u32;
    let mut seen = seen.clone();
    let mut collected: Vec<Candidate> = Vec::new();
    let mut discovered = 0;
    let mut attempt = 0;

    while collected.len() < wanted && attempt < settings.max_discovery_attempts {
        if control.is_cancelled() {
            break;
        }
        attempt += 1;
        progress.in_progress(format!(
            "Search attempt {attempt}/{} ({}/{wanted} new contacts so far)...",
            settings.max_discovery_attempts,
            collected.len()
        ));

        let found = discover(llm, criteria, batch_size).await?;
        if found.is_empty() {
            progress.info("No more companies found for these criteria");
            break;
        }
        discovered += found.len();

        let fresh = filter_new(found, &seen, settings.scope);
        progress.in_progress(format!("{} new contacts in this batch", fresh.len()));

        for candidate in fresh {
            if collected.len() >= wanted {
                break;
            }
            seen.extend(candidate.ledger_keys(settings.scope));
            collected.push(candidate);
        }
    }

    if !collected.is_empty() && collected.len() < wanted {
        progress.info(format!(
            "Only found {} of {wanted} new contacts after {attempt} attempts; continuing with those",
            collected.len()
        ));
    }
    info!(
        "Collected {} candidates in {attempt} discovery rounds",
        collected.len()
    );
    Ok(Collected {
        candidates: collected,
        discovered,
    })
}
