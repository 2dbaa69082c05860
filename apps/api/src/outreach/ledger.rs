//! Contact ledger: the shared, durable set of already-contacted keys.
//!
//! The ledger is the only resource touched by concurrent runs. All writes go
//! through one async mutex and are persisted write-to-temp-then-rename, so a
//! crash mid-write never leaves a truncated log behind.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("Ledger write failed for '{key}': {reason}")]
pub struct LedgerWriteError {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub first_contacted_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Durable key-set used for deduplication.
///
/// `record` is insert-if-absent: it returns `Ok(false)` when the key was
/// already present, so of two racing writers exactly one sees `Ok(true)`.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn contains(&self, key: &str) -> bool;

    async fn record(
        &self,
        key: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, LedgerWriteError>;

    /// Snapshot of every recorded key, for the Filter stage.
    async fn keys(&self) -> HashSet<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: BTreeMap<String, LedgerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

/// JSON-file ledger. The whole map is held in memory and rewritten on each record.
pub struct JsonFileLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl JsonFileLedger {
    /// Opens the ledger at `path`, creating parent directories. A missing file is
    /// an empty ledger; an unreadable one is a startup error, never silently reset.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create ledger directory {}", parent.display()))?;
        }

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: LedgerFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Ledger file {} is not valid JSON", path.display()))?;
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read ledger {}", path.display()))
            }
        };

        info!(
            "Loaded {} ledger entries from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }
}

#[async_trait]
impl Ledger for JsonFileLedger {
    async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    async fn record(
        &self,
        key: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, LedgerWriteError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Ok(false);
        }

        let now = Utc::now();
        entries.insert(
            key.to_string(),
            LedgerEntry {
                first_contacted_at: now,
                metadata,
            },
        );

        let snapshot = LedgerFile {
            entries: entries.clone(),
            last_updated: Some(now),
        };
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomically(&path, &snapshot))
            .await
            .map_err(|e| anyhow::anyhow!("ledger writer task failed: {e}"))
            .and_then(|r| r);

        if let Err(e) = written {
            // Keep memory and disk in agreement: the key is not recorded.
            entries.remove(key);
            return Err(LedgerWriteError {
                key: key.to_string(),
                reason: format!("{e:#}"),
            });
        }

        Ok(true)
    }

    async fn keys(&self) -> HashSet<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

/// One user's view of a ledger. Keys are stored as `<user_id>:<key>`, so two
/// users can contact the same company while each still dedups their own sends.
///
/// With `include_global`, unprefixed entries (DM keys in a shared ledger) count
/// as contacted too.
pub struct UserLedger {
    inner: Arc<dyn Ledger>,
    prefix: String,
    include_global: bool,
}

impl UserLedger {
    pub fn new(inner: Arc<dyn Ledger>, user_id: Uuid, include_global: bool) -> Self {
        Self {
            inner,
            prefix: format!("{user_id}:"),
            include_global,
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

/// Whether `key` belongs to some user's scope rather than the global one.
fn is_user_scoped(key: &str) -> bool {
    key.split_once(':')
        .is_some_and(|(owner, _)| Uuid::parse_str(owner).is_ok())
}

#[async_trait]
impl Ledger for UserLedger {
    async fn contains(&self, key: &str) -> bool {
        self.inner.contains(&self.scoped(key)).await
            || (self.include_global && self.inner.contains(key).await)
    }

    async fn record(
        &self,
        key: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, LedgerWriteError> {
        self.inner.record(&self.scoped(key), metadata).await
    }

    async fn keys(&self) -> HashSet<String> {
        self.inner
            .keys()
            .await
            .into_iter()
            .filter_map(|key| match key.strip_prefix(&self.prefix) {
                Some(own) => Some(own.to_string()),
                None if self.include_global && !is_user_scoped(&key) => Some(key),
                None => None,
            })
            .collect()
    }
}

fn write_atomically(path: &Path, file: &LedgerFile) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec_pretty(file)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Backoff schedule for ledger writes after a successful send.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Records `key`, retrying with exponential backoff (base, 2×base, ...).
/// Returns the last error once attempts are exhausted.
pub async fn record_with_retry(
    ledger: &dyn Ledger,
    key: &str,
    metadata: serde_json::Value,
    policy: RetryPolicy,
) -> Result<bool, LedgerWriteError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match ledger.record(key, metadata.clone()).await {
            Ok(inserted) => return Ok(inserted),
            Err(e) if attempt + 1 < attempts => {
                let delay = policy.base_delay * (1 << attempt);
                warn!(
                    "Ledger write attempt {} for '{}' failed ({}), retrying after {}ms",
                    attempt + 1,
                    key,
                    e.reason,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_record_is_insert_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonFileLedger::open(dir.path().join("ledger.json"))
            .await
            .unwrap();

        assert!(!ledger.contains("acme.com").await);
        assert!(ledger.record("acme.com", serde_json::json!({})).await.unwrap());
        assert!(!ledger.record("acme.com", serde_json::json!({})).await.unwrap());
        assert!(ledger.contains("acme.com").await);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");
        {
            let ledger = JsonFileLedger::open(&path).await.unwrap();
            ledger
                .record("beta.com", serde_json::json!({"run": "r1"}))
                .await
                .unwrap();
        }

        let reopened = JsonFileLedger::open(&path).await.unwrap();
        assert!(reopened.contains("beta.com").await);
        assert_eq!(reopened.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(JsonFileLedger::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_user_views_do_not_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("email_ledger.json");
        let file: Arc<dyn Ledger> = Arc::new(JsonFileLedger::open(&path).await.unwrap());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let alice_view = UserLedger::new(file.clone(), alice, false);
        let bob_view = UserLedger::new(file.clone(), bob, false);

        assert!(alice_view.record("acme.com", serde_json::json!({})).await.unwrap());
        assert!(alice_view.contains("acme.com").await);
        assert!(!bob_view.contains("acme.com").await);
        assert!(bob_view.keys().await.is_empty());

        assert!(bob_view.record("acme.com", serde_json::json!({})).await.unwrap());
        assert!(!alice_view.record("acme.com", serde_json::json!({})).await.unwrap());
        assert_eq!(alice_view.keys().await, HashSet::from(["acme.com".to_string()]));

        let reopened = JsonFileLedger::open(&path).await.unwrap();
        assert!(reopened.contains(&format!("{bob}:acme.com")).await);
        assert!(!reopened.contains("acme.com").await);
    }

    #[tokio::test]
    async fn test_user_view_includes_global_keys_when_asked() {
        let shared: Arc<dyn Ledger> = Arc::new(fake::MemoryLedger::with_keys(&["acme solar", "job:101"]));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        UserLedger::new(shared.clone(), bob, true)
            .record("beta.com", serde_json::json!({}))
            .await
            .unwrap();

        let alice_view = UserLedger::new(shared.clone(), alice, true);
        assert!(alice_view.contains("acme solar").await);
        assert!(!alice_view.contains("beta.com").await);
        assert_eq!(
            alice_view.keys().await,
            HashSet::from(["acme solar".to_string(), "job:101".to_string()])
        );

        let per_channel = UserLedger::new(shared, alice, false);
        assert!(!per_channel.contains("acme solar").await);
        assert!(per_channel.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_records_of_same_key_insert_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(
            JsonFileLedger::open(dir.path().join("ledger.json"))
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.record("gamma.io", serde_json::json!({})).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for h in handles {
            if h.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1, "exactly one writer may record a key");
    }

    #[tokio::test]
    async fn test_concurrent_records_of_different_keys_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Arc::new(JsonFileLedger::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .record(&format!("company{i}.com"), serde_json::json!({}))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let reopened = JsonFileLedger::open(&path).await.unwrap();
        assert_eq!(reopened.keys().await.len(), 10);
    }
}
