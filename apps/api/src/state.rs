use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::dm::driver::BrowserLauncher;
use crate::dm::targeting::IndustryCatalog;
use crate::llm_client::LlmProvider;
use crate::outreach::campaign::RunSettings;
use crate::outreach::ledger::{Ledger, RetryPolicy};
use crate::runs::RunRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub llm: Arc<dyn LlmProvider>,
    /// With a shared dedup scope both ledgers point at the same store.
    pub email_ledger: Arc<dyn Ledger>,
    pub dm_ledger: Arc<dyn Ledger>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub industries: Arc<IndustryCatalog>,
    pub runs: RunRegistry,
    pub config: Config,
}

impl AppState {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            scope: self.config.dedup_scope,
            pacing: self.config.send_delay,
            max_discovery_attempts: self.config.max_discovery_attempts,
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
pub(crate) async fn test_state(data_dir: &std::path::Path) -> AppState {
    use crate::dm::driver::fake::FakeLauncher;
    use crate::llm_client::fake::ScriptedLlm;
    use crate::outreach::ledger::fake::MemoryLedger;

    AppState {
        db: crate::db::memory_pool().await,
        llm: Arc::new(ScriptedLlm::new(Vec::<Result<&str, &str>>::new())),
        email_ledger: Arc::new(MemoryLedger::default()),
        dm_ledger: Arc::new(MemoryLedger::default()),
        launcher: Arc::new(FakeLauncher { driver: None }),
        industries: Arc::new(IndustryCatalog::default()),
        runs: RunRegistry::default(),
        config: Config::for_tests(data_dir.to_path_buf()),
    }
}
