//! Delivery stage. Sends one message at a time: re-check, send, record and report.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::outreach::candidate::{ContactRecord, DedupScope, DraftedMessage};
use crate::outreach::history::History;
use crate::outreach::ledger::{record_with_retry, Ledger, RetryPolicy};
use crate::runs::{EventStatus, ProgressEvent, ProgressSink, RunControl};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("{0} has no deliverable address")]
    NoAddress(String),

    #[error("could not build message: {0}")]
    Build(String),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("recipient rejected: {0}")]
    Rejected(String),
}

/// One channel-specific send.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, draft: &DraftedMessage) -> Result<(), SendError>;
}

/// Outcome counts for a run. `record_failures` counts sends whose history or
/// ledger write failed; those sends are still counted in `sent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryTally {
    pub sent: u32,
    pub skipped: u32,
    pub failed: u32,
    pub record_failures: u32,
}

impl DeliveryTally {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} sent, {} skipped as duplicate, {} failed",
            self.sent, self.skipped, self.failed
        );
        if self.record_failures > 0 {
            text.push_str(&format!(
                " ({} could not be recorded)",
                self.record_failures
            ));
        }
        text
    }
}

/// Everything Delivery touches, borrowed for the length of one run.
pub struct Delivery<'a> {
    pub ledger: &'a dyn Ledger,
    pub history: &'a dyn History,
    pub sender: &'a dyn MessageSender,
    pub scope: DedupScope,
    /// Minimum gap between two sends. Nothing is waited after the last one.
    pub pacing: Duration,
    pub retry: RetryPolicy,
    pub progress: &'a ProgressSink,
    pub control: &'a RunControl,
}

impl Delivery<'_> {
    /// Delivers `drafts` in order. Per-message failures are reported and
    /// tallied; they never abort the batch. Stops early on cancellation.
    pub async fn deliver(&self, drafts: &[DraftedMessage]) -> DeliveryTally {
        let mut tally = DeliveryTally::default();
        let mut last_send: Option<Instant> = None;
        let total = drafts.len();

        for (i, draft) in drafts.iter().enumerate() {
            if self.control.is_cancelled() {
                info!("Delivery cancelled after {i} of {total} messages");
                break;
            }

            let org = &draft.candidate.organization_name;

            // 1. Re-check immediately before sending
            match self.already_contacted(draft).await {
                Ok(true) => {
                    tally.skipped += 1;
                    self.progress
                        .info(format!("Skipping {org}: already contacted"));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tally.failed += 1;
                    self.progress
                        .error(format!("Could not check history for {org}: {e}"));
                    continue;
                }
            }

            // 2. Pace, then send
            if let Some(previous) = last_send {
                tokio::time::sleep_until(previous + self.pacing).await;
            }
            self.progress
                .in_progress(format!("Sending message {}/{total} to {org}...", i + 1));

            let result = self.sender.send(draft).await;
            last_send = Some(Instant::now());

            if let Err(e) = result {
                tally.failed += 1;
                self.progress.error(format!("Failed to send to {org}: {e}"));
                continue;
            }
            tally.sent += 1;

            // 3. Record in history and ledger
            if !self.record(draft).await {
                tally.record_failures += 1;
            }

            self.progress.emit(ProgressEvent {
                message: format!("Sent to {org}"),
                status: EventStatus::Success,
                complete: false,
                count: Some(tally.sent),
            });
        }

        info!("Delivery finished: {}", tally.summary());
        tally
    }

    async fn already_contacted(&self, draft: &DraftedMessage) -> Result<bool, sqlx::Error> {
        for key in draft.candidate.ledger_keys(self.scope) {
            if self.ledger.contains(&key).await || self.history.contains_key(&key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns `false` if any write failed; each failure is reported separately.
    async fn record(&self, draft: &DraftedMessage) -> bool {
        let org = &draft.candidate.organization_name;
        let record = ContactRecord::from_draft(draft, Utc::now());
        let mut ok = true;

        match self.history.append(&record).await {
            Ok(true) => {}
            Ok(false) => warn!("History already held {} for {org}", record.dedup_key),
            Err(e) => {
                ok = false;
                self.progress
                    .error(format!("Sent to {org}, but saving it to history failed: {e}"));
            }
        }

        let metadata = serde_json::json!({
            "organization_name": org,
            "contact_address": draft.candidate.contact_address,
        });
        for key in draft.candidate.ledger_keys(self.scope) {
            match record_with_retry(self.ledger, &key, metadata.clone(), self.retry).await {
                Ok(true) => {}
                Ok(false) => warn!("Ledger already held '{key}' when recording {org}"),
                Err(e) => {
                    ok = false;
                    self.progress
                        .error(format!("Sent to {org}, but the ledger write failed: {e}"));
                }
            }
        }

        ok
    }
}
