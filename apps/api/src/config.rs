use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::outreach::candidate::DedupScope;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Root for ledger files and uploaded résumés.
    pub data_dir: PathBuf,
    pub send_delay: Duration,
    pub max_discovery_attempts: u32,
    pub dedup_scope: DedupScope,
    pub email_subject: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub browser_headless: bool,
    pub browser_grace: Duration,
    pub login_timeout: Duration,
    pub industry_codes_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let dedup_scope = optional_env("DEDUP_SCOPE")
            .map(|raw| raw.parse::<DedupScope>())
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))
            .context("DEDUP_SCOPE must be 'per-channel' or 'shared'")?
            .unwrap_or_default();

        Ok(Config {
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://outreach.db?mode=rwc".to_string()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            data_dir: optional_env("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            send_delay: Duration::from_secs(parse_env("SEND_DELAY_SECS", 2)?),
            max_discovery_attempts: parse_env("MAX_DISCOVERY_ATTEMPTS", 10)?,
            dedup_scope,
            email_subject: optional_env("EMAIL_SUBJECT").unwrap_or_else(|| {
                "Undergraduate Student Interested in Internship Opportunities".to_string()
            }),
            smtp_host: optional_env("SMTP_HOST"),
            smtp_port: optional_env("SMTP_PORT")
                .map(|p| p.parse::<u16>())
                .transpose()
                .context("SMTP_PORT must be a valid port number")?,
            browser_headless: parse_env("BROWSER_HEADLESS", false)?,
            browser_grace: Duration::from_secs(parse_env("BROWSER_GRACE_SECS", 10)?),
            login_timeout: Duration::from_secs(parse_env("LOGIN_TIMEOUT_SECS", 300)?),
            industry_codes_path: optional_env("INDUSTRY_CODES_PATH").map(PathBuf::from),
        })
    }

    pub fn email_ledger_path(&self) -> PathBuf {
        self.data_dir.join("email_ledger.json")
    }

    pub fn dm_ledger_path(&self) -> PathBuf {
        self.data_dir.join("dm_ledger.json")
    }

    pub fn shared_ledger_path(&self) -> PathBuf {
        self.data_dir.join("contact_ledger.json")
    }

    pub fn resumes_dir(&self) -> PathBuf {
        self.data_dir.join("resumes")
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with all state kept under `data_dir`.
    pub fn for_tests(data_dir: PathBuf) -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            anthropic_api_key: "test-key".to_string(),
            port: 0,
            rust_log: "debug".to_string(),
            data_dir,
            send_delay: Duration::ZERO,
            max_discovery_attempts: 2,
            dedup_scope: DedupScope::PerChannel,
            email_subject: "Internship inquiry".to_string(),
            smtp_host: None,
            smtp_port: None,
            browser_headless: true,
            browser_grace: Duration::ZERO,
            login_timeout: Duration::from_millis(50),
            industry_codes_path: None,
        }
    }
}
