//! DM run as an explicit state machine.
//!
//! `AwaitingManualLogin → SearchingJobs → PerJob{ExtractingDetails →
//! CheckingDuplicate → (Skip | DraftingMessage → SendingMessage →
//! RecordingSuccess)} → Closed`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::dm::driver::{find_element, BrowserLauncher, DriverError, Link, UiDriver};
use crate::dm::selectors::{
    MESSAGE_BOX, MESSAGE_BUTTON, PAGE_BODY, PROFILE_HEADING, PROFILE_SUBHEADING, SEND_BUTTON,
};
use crate::dm::targeting::{
    employer_search_url, match_industries, resolve_location, IndustryCatalog, EMPLOYERS_URL,
    LOGIN_URL,
};
use crate::llm_client::LlmProvider;
use crate::models::campaign::insert_run;
use crate::outreach::campaign::{conclude, RunOutcome};
use crate::outreach::candidate::{
    Candidate, Channel, ContactRecord, DedupScope, DraftedMessage, OriginCriteria,
};
use crate::outreach::delivery::DeliveryTally;
use crate::outreach::generation::{draft_dm, DraftContext};
use crate::outreach::history::{History, SqliteHistory};
use crate::outreach::ledger::{record_with_retry, Ledger, RetryPolicy, UserLedger};
use crate::runs::{EventStatus, ProgressEvent, ProgressSink, RunControl, RunHandle};

const PLATFORM_ORIGIN: &str = "https://app.joinhandshake.com";
const UNKNOWN_COMPANY: &str = "Unknown Company";
const NON_TITLE_HEADINGS: &[&str] = &["Message", "About", "Education", "Experience", "Skills"];
const MAX_TITLE_CHARS: usize = 100;

/// Body of `POST /api/v1/campaigns/dm`.
#[derive(Debug, Clone, Deserialize)]
pub struct DmCampaignRequest {
    pub user_id: Uuid,
    /// "City, State"
    pub city: String,
    pub job_field: String,
    pub count: u32,
    #[serde(default)]
    pub custom_message: Option<String>,
    #[serde(default)]
    pub internships_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    ExtractingDetails,
    CheckingDuplicate,
    DraftingMessage,
    SendingMessage,
    RecordingSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmState {
    AwaitingManualLogin,
    SearchingJobs,
    PerJob(JobPhase),
    Closed,
}

/// How one step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skip,
    Failed,
}

impl DmState {
    /// The state after `self` ended with `outcome`. `more_jobs` says whether
    /// another employer should be tried once the current one is finished.
    pub fn next(self, outcome: StepOutcome, more_jobs: bool) -> DmState {
        use JobPhase::*;

        let next_job = if more_jobs {
            DmState::PerJob(ExtractingDetails)
        } else {
            DmState::Closed
        };

        match (self, outcome) {
            (DmState::Closed, _) => DmState::Closed,
            (DmState::AwaitingManualLogin, StepOutcome::Done) => DmState::SearchingJobs,
            (DmState::AwaitingManualLogin, _) => DmState::Closed,
            (DmState::SearchingJobs, StepOutcome::Done) => next_job,
            (DmState::SearchingJobs, _) => DmState::Closed,
            (DmState::PerJob(phase), StepOutcome::Done) => match phase {
                ExtractingDetails => DmState::PerJob(CheckingDuplicate),
                CheckingDuplicate => DmState::PerJob(DraftingMessage),
                DraftingMessage => DmState::PerJob(SendingMessage),
                SendingMessage => DmState::PerJob(RecordingSuccess),
                RecordingSuccess => next_job,
            },
            (DmState::PerJob(_), _) => next_job,
        }
    }

    /// Whether leaving this state with `outcome` finishes the current employer.
    fn ends_job(self, outcome: StepOutcome) -> bool {
        match self {
            DmState::PerJob(JobPhase::RecordingSuccess) => true,
            DmState::PerJob(_) => outcome != StepOutcome::Done,
            _ => false,
        }
    }
}

/// Waits between UI interactions.
#[derive(Debug, Clone, Copy)]
pub struct DmTimings {
    pub login_timeout: Duration,
    pub page_settle: Duration,
    pub search_settle: Duration,
    pub after_send: Duration,
    /// Time the browser stays open after the run before it is closed.
    pub grace: Duration,
}

impl DmTimings {
    pub fn new(login_timeout: Duration, grace: Duration) -> Self {
        Self {
            login_timeout,
            page_settle: Duration::from_secs(3),
            search_settle: Duration::from_secs(5),
            after_send: Duration::from_secs(5),
            grace,
        }
    }
}

/// An employer card from the search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployerTarget {
    pub company: String,
    pub job_id: Option<String>,
    pub url: String,
}

impl EmployerTarget {
    pub fn from_link(link: &Link) -> Self {
        let company = link
            .text
            .lines()
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(UNKNOWN_COMPANY)
            .to_string();

        Self {
            company,
            job_id: job_id(&link.href),
            url: absolute_url(&link.href),
        }
    }

    pub fn job_key(&self) -> Option<String> {
        self.job_id.as_ref().map(|id| format!("job:{id}"))
    }
}

/// Path segment after `/e/`, without query or fragment.
fn job_id(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("/e/")?;
    let id = rest.split(['/', '?', '#']).next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn absolute_url(href: &str) -> String {
    match Url::parse(PLATFORM_ORIGIN).and_then(|base| base.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => href.to_string(),
    }
}

/// Employer links (`/e/`) in page order, one per href. Cards often carry a
/// second, text-less link (the logo), so the first non-empty text wins.
pub fn employer_links(links: &[Link]) -> Vec<Link> {
    let mut out: Vec<Link> = Vec::new();
    for link in links.iter().filter(|l| l.href.contains("/e/")) {
        match out.iter_mut().find(|l| l.href == link.href) {
            Some(existing) if existing.text.trim().is_empty() => {
                existing.text = link.text.clone();
            }
            Some(_) => {}
            None => out.push(link.clone()),
        }
    }
    out
}

/// The recruiter's profile on an employer page. The first `/profiles/` link
/// is the signed-in student, so the second one is used.
pub fn recruiter_profile(links: &[Link]) -> Option<String> {
    links
        .iter()
        .filter(|l| l.href.contains("/profiles/"))
        .nth(1)
        .map(|l| absolute_url(&l.href))
}

/// Name from a profile heading like "Message Dana Park\nTalent Partner".
pub fn recruiter_name(headings: &[String]) -> Option<String> {
    headings.iter().find_map(|h| {
        let (_, rest) = h.trim().split_once("Message")?;
        let name = rest.trim().lines().next()?.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

pub fn job_title(subheadings: &[String]) -> Option<String> {
    subheadings
        .iter()
        .map(|h| h.trim())
        .find(|h| {
            !h.is_empty()
                && !NON_TITLE_HEADINGS.contains(h)
                && h.chars().count() < MAX_TITLE_CHARS
        })
        .map(String::from)
}

/// Opens the message composer on the current profile, types `text` and sends it.
pub async fn send_dm(
    driver: &dyn UiDriver,
    text: &str,
    settle: Duration,
) -> Result<(), DriverError> {
    let button = find_element(driver, &MESSAGE_BUTTON).await?;
    driver.click(button).await?;
    driver.pause(settle).await;

    let input = find_element(driver, &MESSAGE_BOX).await?;
    driver.fill(input, text).await?;
    driver.pause(Duration::from_millis(1500)).await;

    let send = find_element(driver, &SEND_BUTTON).await?;
    driver.click(send).await?;
    driver.pause(Duration::from_secs(2)).await;
    Ok(())
}

/// Everything one DM run owns. Built by the handler, consumed by `run`.
pub struct DmRun {
    pub db: SqlitePool,
    pub llm: Arc<dyn LlmProvider>,
    pub ledger: Arc<dyn Ledger>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub catalog: Arc<IndustryCatalog>,
    pub scope: DedupScope,
    pub retry: RetryPolicy,
    pub timings: DmTimings,
    pub user_id: Uuid,
    pub city: String,
    pub job_field: String,
    pub count: u32,
    pub job_type: Option<u32>,
    pub draft_context: DraftContext,
}

impl DmRun {
    /// Runs to completion and always ends the stream with a terminal event.
    pub async fn run(self, handle: RunHandle) {
        let RunHandle {
            id,
            progress,
            control,
        } = handle;

        if let Err(e) = insert_run(&self.db, id, self.user_id, Channel::Dm).await {
            warn!("Failed to record start of run {id}: {e}");
        }

        progress.in_progress("Launching browser...");
        let outcome = match self.launcher.launch().await {
            Ok(driver) => {
                let outcome = self.execute(driver.as_ref(), &progress, &control).await;
                progress.in_progress(format!(
                    "Closing browser in {} seconds...",
                    self.timings.grace.as_secs()
                ));
                driver.pause(self.timings.grace).await;
                driver.close().await;
                outcome
            }
            Err(e) => RunOutcome::Failed(format!("Could not start the browser: {e}")),
        };

        conclude(&self.db, id, outcome, &progress).await;
    }

    async fn execute(
        &self,
        driver: &dyn UiDriver,
        progress: &ProgressSink,
        control: &RunControl,
    ) -> RunOutcome {
        let mut session = Session {
            run: self,
            driver,
            history: SqliteHistory::new(self.db.clone(), self.user_id, Channel::Dm),
            user_ledger: (self.scope == DedupScope::Shared)
                .then(|| UserLedger::new(self.ledger.clone(), self.user_id, false)),
            progress,
            control,
            targets: Vec::new(),
            cursor: 0,
            job: None,
            sent_keys: HashSet::new(),
            tally: DeliveryTally::default(),
            fatal: None,
        };

        let mut state = DmState::AwaitingManualLogin;
        while state != DmState::Closed {
            let outcome = session.step(state).await;
            if state.ends_job(outcome) {
                session.cursor += 1;
                session.job = None;
            }
            state = state.next(outcome, session.more_jobs());
        }

        if let Some(message) = session.fatal {
            return RunOutcome::Failed(message);
        }
        info!("DM run finished: {}", session.tally.summary());
        if control.is_cancelled() {
            RunOutcome::Cancelled(session.tally)
        } else {
            RunOutcome::Completed(session.tally)
        }
    }
}

/// The employer currently being worked on.
struct Job {
    target: EmployerTarget,
    candidate: Candidate,
    job_title: Option<String>,
    draft: Option<DraftedMessage>,
}

impl Job {
    /// Company keys per the dedup scope, plus the job key when there is one.
    fn keys(&self, scope: DedupScope) -> Vec<String> {
        let mut keys = self.candidate.ledger_keys(scope);
        keys.extend(self.target.job_key());
        keys
    }
}

struct Session<'a> {
    run: &'a DmRun,
    driver: &'a dyn UiDriver,
    history: SqliteHistory,
    /// This user's email keys, checked too when the ledger is shared.
    user_ledger: Option<UserLedger>,
    progress: &'a ProgressSink,
    control: &'a RunControl,
    targets: Vec<Link>,
    cursor: usize,
    job: Option<Job>,
    sent_keys: HashSet<String>,
    tally: DeliveryTally,
    /// Set when the run cannot continue at all.
    fatal: Option<String>,
}

impl Session<'_> {
    fn more_jobs(&self) -> bool {
        self.cursor < self.targets.len()
            && self.tally.sent < self.run.count
            && !self.control.is_cancelled()
    }

    async fn step(&mut self, state: DmState) -> StepOutcome {
        match state {
            DmState::AwaitingManualLogin => self.login().await,
            DmState::SearchingJobs => self.search().await,
            DmState::PerJob(JobPhase::ExtractingDetails) => self.extract_details(),
            DmState::PerJob(JobPhase::CheckingDuplicate) => self.check_duplicate().await,
            DmState::PerJob(JobPhase::DraftingMessage) => self.draft().await,
            DmState::PerJob(JobPhase::SendingMessage) => self.send().await,
            DmState::PerJob(JobPhase::RecordingSuccess) => self.record().await,
            DmState::Closed => StepOutcome::Done,
        }
    }

    fn abort(&mut self, message: String) -> StepOutcome {
        self.fatal = Some(message);
        StepOutcome::Failed
    }

    fn fail_item(&mut self, message: String) -> StepOutcome {
        self.tally.failed += 1;
        self.progress.error(message);
        StepOutcome::Failed
    }

    async fn login(&mut self) -> StepOutcome {
        let timings = self.run.timings;

        // 1. Let the user sign in by hand
        if let Err(e) = self.driver.navigate(LOGIN_URL).await {
            return self.abort(format!("Could not open the login page: {e}"));
        }
        self.progress.login_wait(
            "Log in to Handshake in the browser window, then confirm login to continue",
        );
        if !self.control.wait_for_login(timings.login_timeout).await {
            return self.abort(format!(
                "Timed out after {} seconds waiting for login confirmation",
                timings.login_timeout.as_secs()
            ));
        }
        if self.control.is_cancelled() {
            return StepOutcome::Skip;
        }

        // 2. Verify the session by loading a signed-in page
        if let Err(e) = self.driver.navigate(EMPLOYERS_URL).await {
            return self.abort(format!("Could not verify login: {e}"));
        }
        self.driver.pause(timings.page_settle).await;
        match self
            .driver
            .is_visible(PAGE_BODY, Duration::from_secs(5))
            .await
        {
            Ok(true) => {
                self.progress.success("Login confirmed");
                StepOutcome::Done
            }
            Ok(false) => self.abort("Could not verify login: the page did not load".to_string()),
            Err(e) => self.abort(format!("Could not verify login: {e}")),
        }
    }

    async fn search(&mut self) -> StepOutcome {
        let run = self.run;
        let llm = run.llm.as_ref();

        // 1. Filters
        self.progress
            .in_progress(format!("Matching '{}' to industries...", run.job_field));
        let industries = match_industries(llm, &run.job_field).await;
        let industry_ids = run.catalog.ids_for(&industries);
        self.progress
            .info(format!("Industries: {}", industries.join(", ")));

        let location = resolve_location(llm, &run.city).await;
        let url = employer_search_url(&industry_ids, &location, run.job_type);

        // 2. Load every employer card
        self.progress
            .in_progress("Navigating to employer search page with filters...");
        if let Err(e) = self.driver.navigate(&url).await {
            return self.abort(format!("Could not load employer search: {e}"));
        }
        self.driver.pause(run.timings.search_settle).await;

        self.progress
            .in_progress("Scrolling through page to load all employers...");
        if let Err(e) = self
            .driver
            .scroll_to_bottom(10, Duration::from_secs(2))
            .await
        {
            warn!("Scrolling employer search failed: {e}");
        }

        let links = match self.driver.links().await {
            Ok(links) => links,
            Err(e) => return self.abort(format!("Could not read employer search results: {e}")),
        };
        self.targets = employer_links(&links);

        if self.targets.is_empty() {
            self.progress.info("No employers matched these filters");
        } else {
            self.progress
                .success(format!("Found {} employers", self.targets.len()));
        }
        StepOutcome::Done
    }

    fn extract_details(&mut self) -> StepOutcome {
        let Some(link) = self.targets.get(self.cursor) else {
            return StepOutcome::Skip;
        };
        let target = EmployerTarget::from_link(link);

        self.progress.in_progress(format!(
            "Employer {}/{}: {}",
            self.cursor + 1,
            self.targets.len(),
            target.company
        ));

        let candidate = Candidate {
            organization_name: target.company.clone(),
            contact_name: None,
            contact_address: None,
            origin_criteria: OriginCriteria::CityJobField {
                city: self.run.city.clone(),
                job_field: self.run.job_field.clone(),
            },
        };
        self.job = Some(Job {
            target,
            candidate,
            job_title: None,
            draft: None,
        });
        StepOutcome::Done
    }

    /// Whether any key was sent this run, is in the ledger or the user's DM history.
    async fn already_contacted(&self, keys: &[String]) -> Result<bool, sqlx::Error> {
        for key in keys {
            if self.sent_keys.contains(key) || self.run.ledger.contains(key).await {
                return Ok(true);
            }
            if let Some(own) = &self.user_ledger {
                if own.contains(key).await {
                    return Ok(true);
                }
            }
            if self.history.contains_key(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn check_duplicate(&mut self) -> StepOutcome {
        let Some(job) = &self.job else {
            return StepOutcome::Skip;
        };
        let company = job.target.company.clone();
        let keys = job.keys(self.run.scope);

        match self.already_contacted(&keys).await {
            Ok(false) => StepOutcome::Done,
            Ok(true) => {
                self.tally.skipped += 1;
                self.progress
                    .info(format!("Skipped '{company}' (already contacted)"));
                StepOutcome::Skip
            }
            Err(e) => self.fail_item(format!("Could not check history for {company}: {e}")),
        }
    }

    async fn draft(&mut self) -> StepOutcome {
        let timings = self.run.timings;
        let Some(job) = &self.job else {
            return StepOutcome::Skip;
        };
        let company = job.target.company.clone();
        let employer_url = job.target.url.clone();

        // 1. Employer page → recruiter profile
        if let Err(e) = self.driver.navigate(&employer_url).await {
            return self.fail_item(format!("Could not open {company}: {e}"));
        }
        self.driver.pause(timings.page_settle).await;
        if let Err(e) = self
            .driver
            .scroll_to_bottom(5, Duration::from_millis(1500))
            .await
        {
            warn!("Scrolling {company} failed: {e}");
        }

        let links = match self.driver.links().await {
            Ok(links) => links,
            Err(e) => return self.fail_item(format!("Could not read {company}'s page: {e}")),
        };
        let Some(profile_url) = recruiter_profile(&links) else {
            return self.fail_item(format!("No recruiter found for {company}; skipping"));
        };

        // 2. Recruiter details
        if let Err(e) = self.driver.navigate(&profile_url).await {
            return self.fail_item(format!("Could not open the recruiter at {company}: {e}"));
        }
        self.driver.pause(timings.page_settle).await;

        let headings = self.driver.texts(PROFILE_HEADING).await.unwrap_or_else(|e| {
            warn!("Reading profile heading failed: {e}");
            Vec::new()
        });
        let subheadings = self.driver.texts(PROFILE_SUBHEADING).await.unwrap_or_else(|e| {
            warn!("Reading profile subheadings failed: {e}");
            Vec::new()
        });
        let recruiter = recruiter_name(&headings);
        let title = job_title(&subheadings);

        // 3. Draft
        self.progress.in_progress(format!(
            "Drafting message to {} at {company}...",
            recruiter.as_deref().unwrap_or("the recruiter")
        ));
        let Some(job) = self.job.as_mut() else {
            return StepOutcome::Skip;
        };
        job.candidate.contact_name = recruiter;
        job.job_title = title;
        job.draft = Some(
            draft_dm(self.run.llm.as_ref(), &job.candidate, &self.run.draft_context).await,
        );
        StepOutcome::Done
    }

    async fn send(&mut self) -> StepOutcome {
        let timings = self.run.timings;
        let Some(job) = &self.job else {
            return StepOutcome::Skip;
        };
        let Some(draft) = &job.draft else {
            return StepOutcome::Skip;
        };
        let company = job.target.company.clone();
        let body = draft.body_text.clone();
        let keys = job.keys(self.run.scope);

        // 1. Another run may have reached this company while the draft was written
        match self.already_contacted(&keys).await {
            Ok(false) => {}
            Ok(true) => {
                self.tally.skipped += 1;
                self.progress.info(format!(
                    "Skipped '{company}' (contacted by another run in the meantime)"
                ));
                return StepOutcome::Skip;
            }
            Err(e) => return self.fail_item(format!("Could not check history for {company}: {e}")),
        }

        // 2. Send
        self.progress
            .in_progress(format!("Sending message to {company}..."));
        let result = send_dm(self.driver, &body, timings.page_settle).await;
        self.driver.pause(timings.after_send).await;

        match result {
            Ok(()) => StepOutcome::Done,
            Err(e) => self.fail_item(format!("Failed to message {company}: {e}")),
        }
    }

    async fn record(&mut self) -> StepOutcome {
        let Some(job) = &self.job else {
            return StepOutcome::Skip;
        };
        let Some(draft) = &job.draft else {
            return StepOutcome::Skip;
        };
        let company = &job.target.company;
        let keys = job.keys(self.run.scope);

        self.tally.sent += 1;
        let mut recorded = true;

        let mut record = ContactRecord::from_draft(draft, Utc::now());
        record.job_title = job.job_title.clone();
        match self.history.append(&record).await {
            Ok(true) => {}
            Ok(false) => warn!("History already held {} for {company}", record.dedup_key),
            Err(e) => {
                recorded = false;
                self.progress.error(format!(
                    "Messaged {company}, but saving it to history failed: {e}"
                ));
            }
        }

        let metadata = serde_json::json!({
            "organization_name": company,
            "recruiter_name": job.candidate.contact_name,
            "job_title": job.job_title,
            "job_id": job.target.job_id,
        });
        for key in &keys {
            match record_with_retry(self.run.ledger.as_ref(), key, metadata.clone(), self.run.retry)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!("Ledger already held '{key}' when recording {company}"),
                Err(e) => {
                    recorded = false;
                    self.progress.error(format!(
                        "Messaged {company}, but the ledger write failed: {e}"
                    ));
                }
            }
        }
        if !recorded {
            self.tally.record_failures += 1;
        }

        let recipient = match &job.candidate.contact_name {
            Some(name) => format!("{name} at {company}"),
            None => company.clone(),
        };
        self.progress.emit(ProgressEvent {
            message: format!("Messaged {recipient}"),
            status: EventStatus::Success,
            complete: false,
            count: Some(self.tally.sent),
        });

        self.sent_keys.extend(keys);
        StepOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::dm::driver::fake::{FakeDriver, FakeLauncher, FakePage};
    use crate::llm_client::fake::ScriptedLlm;
    use crate::models::campaign::list_runs;
    use crate::models::user::insert_user;
    use crate::outreach::ledger::fake::MemoryLedger;
    use crate::outreach::ledger::LedgerWriteError;
    use crate::runs::RunRegistry;

    const POINT: &str = "32.7767,-96.797";

    fn link(href: &str, text: &str) -> Link {
        Link {
            href: href.to_string(),
            text: text.to_string(),
        }
    }

    fn employer(id: &str) -> String {
        format!("{PLATFORM_ORIGIN}/e/{id}")
    }

    fn profile(id: &str) -> String {
        format!("{PLATFORM_ORIGIN}/profiles/{id}")
    }

    #[test]
    fn test_happy_path_transitions() {
        use JobPhase::*;
        let mut state = DmState::AwaitingManualLogin;
        let mut seen = vec![state];
        for _ in 0..7 {
            state = state.next(StepOutcome::Done, true);
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                DmState::AwaitingManualLogin,
                DmState::SearchingJobs,
                DmState::PerJob(ExtractingDetails),
                DmState::PerJob(CheckingDuplicate),
                DmState::PerJob(DraftingMessage),
                DmState::PerJob(SendingMessage),
                DmState::PerJob(RecordingSuccess),
                DmState::PerJob(ExtractingDetails),
            ]
        );
        assert_eq!(
            DmState::PerJob(RecordingSuccess).next(StepOutcome::Done, false),
            DmState::Closed
        );
    }

    #[test]
    fn test_skip_and_failure_move_to_next_job_or_close() {
        use JobPhase::*;
        let checking = DmState::PerJob(CheckingDuplicate);
        assert_eq!(
            checking.next(StepOutcome::Skip, true),
            DmState::PerJob(ExtractingDetails)
        );
        assert_eq!(checking.next(StepOutcome::Skip, false), DmState::Closed);
        assert_eq!(
            DmState::PerJob(SendingMessage).next(StepOutcome::Failed, true),
            DmState::PerJob(ExtractingDetails)
        );
        assert_eq!(
            DmState::AwaitingManualLogin.next(StepOutcome::Failed, true),
            DmState::Closed
        );
        assert_eq!(
            DmState::SearchingJobs.next(StepOutcome::Done, false),
            DmState::Closed
        );
        assert!(checking.ends_job(StepOutcome::Skip));
        assert!(!checking.ends_job(StepOutcome::Done));
    }

    #[test]
    fn test_employer_target_from_card_text() {
        let target = EmployerTarget::from_link(&link(
            "/e/12345?ref=search",
            "Coalesce Consulting\nUtilities and Renewable Energy · 36 followers\nDallas, TX",
        ));
        assert_eq!(target.company, "Coalesce Consulting");
        assert_eq!(target.job_id.as_deref(), Some("12345"));
        assert_eq!(target.job_key().as_deref(), Some("job:12345"));
        assert_eq!(target.url, "https://app.joinhandshake.com/e/12345?ref=search");

        let blank = EmployerTarget::from_link(&link("https://app.joinhandshake.com/e/9", "  \n"));
        assert_eq!(blank.company, "Unknown Company");
    }

    #[test]
    fn test_employer_links_merge_logo_and_name_links() {
        let links = vec![
            link("/e/1", ""),
            link("/about", "About"),
            link("/e/1", "Acme Solar\n12 followers"),
            link("/e/2", "Beta Wind"),
        ];
        let found = employer_links(&links);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "Acme Solar\n12 followers");
        assert_eq!(found[1].href, "/e/2");
    }

    #[test]
    fn test_recruiter_profile_is_the_second_profile_link() {
        let links = vec![
            link("/profiles/me", "You"),
            link("/jobs/1", "Job"),
            link("/profiles/r1", "Dana"),
        ];
        assert_eq!(
            recruiter_profile(&links).as_deref(),
            Some("https://app.joinhandshake.com/profiles/r1")
        );
        assert_eq!(recruiter_profile(&links[..2]), None);
    }

    #[test]
    fn test_recruiter_name_and_job_title() {
        let headings = vec![
            "Jobs".to_string(),
            "Message Dr. Alice Wonderland\nDoctor of Research".to_string(),
        ];
        assert_eq!(recruiter_name(&headings).as_deref(), Some("Dr. Alice Wonderland"));
        assert_eq!(recruiter_name(&["Message".to_string()]), None);

        let subheadings = vec![
            "About".to_string(),
            "".to_string(),
            "x".repeat(120),
            "Campus Recruiter".to_string(),
        ];
        assert_eq!(job_title(&subheadings).as_deref(), Some("Campus Recruiter"));
        assert_eq!(job_title(&["Skills".to_string()]), None);
    }

    /// A signed-in fake browser whose search page lists `employers`.
    async fn site(employers: &[(&str, &str)]) -> Arc<FakeDriver> {
        let driver = Arc::new(FakeDriver::default());
        driver.page(
            EMPLOYERS_URL,
            FakePage {
                present: [PAGE_BODY].into_iter().collect(),
                ..Default::default()
            },
        );

        let location = resolve_location(&ScriptedLlm::new([Ok(POINT)]), "Dallas, Texas").await;
        let search = employer_search_url(&[], &location, None);
        driver.page(
            &search,
            FakePage {
                links: employers
                    .iter()
                    .map(|(id, name)| link(&employer(id), name))
                    .collect(),
                ..Default::default()
            },
        );
        driver
    }

    /// Employer `id` whose recruiter `rid` has a working message composer.
    fn with_recruiter(driver: &FakeDriver, id: &str, rid: &str, heading: &str, composer: bool) {
        driver.page(
            &employer(id),
            FakePage {
                links: vec![link(&profile("me"), "You"), link(&profile(rid), "Recruiter")],
                ..Default::default()
            },
        );

        let mut present: HashSet<_> = [MESSAGE_BUTTON.selectors[0], SEND_BUTTON.selectors[0]]
            .into_iter()
            .collect();
        if composer {
            present.insert(MESSAGE_BOX.selectors[0]);
        }
        driver.page(
            &profile(rid),
            FakePage {
                present,
                texts: [
                    (PROFILE_HEADING, vec![heading.to_string()]),
                    (PROFILE_SUBHEADING, vec!["About".to_string(), "Campus Recruiter".to_string()]),
                ]
                .into_iter()
                .collect(),
                links: Vec::new(),
            },
        );
    }

    struct Outcome {
        events: Vec<ProgressEvent>,
        pool: SqlitePool,
        user_id: Uuid,
    }

    async fn run_dm(
        driver: Option<Arc<FakeDriver>>,
        ledger: Arc<dyn Ledger>,
        llm: ScriptedLlm,
        count: u32,
        confirm_login: bool,
    ) -> Outcome {
        let pool = memory_pool().await;
        let user = insert_user(&pool, "sam").await.unwrap();

        let registry = RunRegistry::default();
        let handle = registry.start();
        let mut rx = registry.take_receiver(handle.id).unwrap();
        if confirm_login {
            handle.control.confirm_login();
        }

        DmRun {
            db: pool.clone(),
            llm: Arc::new(llm),
            ledger,
            launcher: Arc::new(FakeLauncher { driver }),
            catalog: Arc::new(IndustryCatalog::default()),
            scope: DedupScope::PerChannel,
            retry: RetryPolicy::default(),
            timings: DmTimings::new(Duration::from_millis(20), Duration::ZERO),
            user_id: user.id(),
            city: "Dallas, Texas".to_string(),
            job_field: "solar".to_string(),
            count,
            job_type: None,
            draft_context: DraftContext::default(),
        }
        .run(handle)
        .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        Outcome {
            events,
            pool,
            user_id: user.id(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_company_is_skipped_without_opening_its_page() {
        let driver = site(&[("101", "Acme Solar\n12 followers"), ("102", "Beta Wind")]).await;
        with_recruiter(&driver, "102", "r2", "Message Dana Park\nTalent Partner", true);
        let ledger = Arc::new(MemoryLedger::with_keys(&["acme solar"]));

        // "solar" maps to renewables without an LLM call; then geocode and one draft
        let llm = ScriptedLlm::new([Ok(POINT), Ok("I admire your wind farm work.")]);
        let out = run_dm(Some(driver.clone()), ledger.clone(), llm, 5, true).await;

        let log = driver.log();
        assert!(!log.contains(&format!("navigate {}", employer("101"))));
        assert!(log.contains(&format!("navigate {}", employer("102"))));
        assert!(log
            .iter()
            .any(|l| l.starts_with("fill") && l.contains("Hi Dana Park")));
        assert_eq!(log.last().map(String::as_str), Some("close"));

        let last = out.events.last().unwrap();
        assert!(last.complete);
        assert_eq!(last.status, EventStatus::Success);
        assert!(last.message.contains("1 sent, 1 skipped as duplicate, 0 failed"));
        assert!(out
            .events
            .iter()
            .any(|e| e.status == EventStatus::LoginWait));

        let history = SqliteHistory::new(out.pool.clone(), out.user_id, Channel::Dm);
        let records = history.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dedup_key, "beta wind");
        assert_eq!(records[0].contact_name.as_deref(), Some("Dana Park"));
        assert_eq!(records[0].job_title.as_deref(), Some("Campus Recruiter"));

        assert!(ledger.contains("beta wind").await);
        assert!(ledger.contains("job:102").await);
    }

    #[tokio::test]
    async fn test_missing_recruiter_and_failed_send_do_not_stop_the_run() {
        let driver = site(&[
            ("201", "No Recruiter Co"),
            ("202", "Broken Composer Inc"),
            ("203", "Gamma Grid"),
        ])
        .await;
        driver.page(
            &employer("201"),
            FakePage {
                links: vec![link(&profile("me"), "You")],
                ..Default::default()
            },
        );
        with_recruiter(&driver, "202", "r2", "Message Lee", false);
        with_recruiter(&driver, "203", "r3", "Message Kim", true);

        let llm = ScriptedLlm::new([Ok(POINT), Ok("Draft for Broken"), Err("overloaded")]);
        let ledger = Arc::new(MemoryLedger::default());
        let out = run_dm(Some(driver.clone()), ledger.clone(), llm, 5, true).await;

        let last = out.events.last().unwrap();
        assert_eq!(last.status, EventStatus::Success);
        assert!(last.message.contains("1 sent, 0 skipped as duplicate, 2 failed"));
        assert!(out
            .events
            .iter()
            .any(|e| e.message.contains("No element matched the message box")));

        // The LLM failure for Gamma fell back to the fixed template
        let sent = driver
            .log()
            .into_iter()
            .filter(|l| l.starts_with("fill"))
            .collect::<Vec<_>>();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Hi Kim"));
        assert!(sent[0].contains("Gamma Grid"));

        assert!(!ledger.contains("broken composer inc").await);
        assert!(ledger.contains("gamma grid").await);
    }

    #[tokio::test]
    async fn test_stops_once_requested_count_is_sent() {
        let driver = site(&[("301", "One"), ("302", "Two")]).await;
        with_recruiter(&driver, "301", "r1", "Message Ann", true);
        with_recruiter(&driver, "302", "r2", "Message Bo", true);

        let llm = ScriptedLlm::new([Ok(POINT), Ok("Hello there")]);
        let out = run_dm(Some(driver.clone()), Arc::new(MemoryLedger::default()), llm, 1, true).await;

        assert!(!driver.log().contains(&format!("navigate {}", employer("302"))));
        assert_eq!(out.events.last().unwrap().count, Some(1));
    }

    #[tokio::test]
    async fn test_login_timeout_fails_run_and_closes_browser() {
        let driver = site(&[("401", "Acme")]).await;
        let llm = ScriptedLlm::new(Vec::<Result<&str, &str>>::new());
        let out = run_dm(Some(driver.clone()), Arc::new(MemoryLedger::default()), llm, 1, false).await;

        let last = out.events.last().unwrap();
        assert!(last.complete);
        assert_eq!(last.status, EventStatus::Error);
        assert!(last.message.contains("waiting for login confirmation"));
        assert_eq!(driver.log().last().map(String::as_str), Some("close"));

        let runs = list_runs(&out.pool, out.user_id).await.unwrap();
        assert_eq!(runs[0].status, "failed");
        assert_eq!(runs[0].channel, "dm");
    }

    #[tokio::test]
    async fn test_browser_launch_failure_is_reported() {
        let out = run_dm(
            None,
            Arc::new(MemoryLedger::default()),
            ScriptedLlm::new(Vec::<Result<&str, &str>>::new()),
            1,
            true,
        )
        .await;
        let last = out.events.last().unwrap();
        assert_eq!(last.status, EventStatus::Error);
        assert!(last.message.starts_with("Could not start the browser"));
    }

    /// Gains `key` right after the first lookup misses, as if another tab sent to it.
    struct RecordedMeanwhile {
        inner: MemoryLedger,
        key: &'static str,
    }

    #[async_trait::async_trait]
    impl Ledger for RecordedMeanwhile {
        async fn contains(&self, key: &str) -> bool {
            let found = self.inner.contains(key).await;
            if !found && key == self.key {
                self.inner.record(key, serde_json::Value::Null).await.unwrap();
            }
            found
        }

        async fn record(
            &self,
            key: &str,
            metadata: serde_json::Value,
        ) -> Result<bool, LedgerWriteError> {
            self.inner.record(key, metadata).await
        }

        async fn keys(&self) -> HashSet<String> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_company_contacted_while_drafting_is_not_messaged() {
        let driver = site(&[("501", "Acme Solar")]).await;
        with_recruiter(&driver, "501", "r5", "Message Lee Chen\nRecruiter", true);
        let ledger = Arc::new(RecordedMeanwhile {
            inner: MemoryLedger::default(),
            key: "acme solar",
        });

        let llm = ScriptedLlm::new([Ok(POINT), Ok("I admire your rooftop projects.")]);
        let out = run_dm(Some(driver.clone()), ledger.clone(), llm, 1, true).await;

        let log = driver.log();
        assert!(log.contains(&format!("navigate {}", employer("501"))));
        assert!(!log.iter().any(|l| l.starts_with("fill")));
        assert!(!log.contains(&format!("click {}", SEND_BUTTON.selectors[0])));

        assert!(out
            .events
            .iter()
            .any(|e| e.message == "Skipped 'Acme Solar' (contacted by another run in the meantime)"));
        let last = out.events.last().unwrap();
        assert_eq!(last.status, EventStatus::Success);
        assert!(last.message.contains("0 sent, 1 skipped as duplicate, 0 failed"));
        assert!(!ledger.inner.contains("job:501").await);
    }
}
