//! Core outreach data model: candidates, drafted messages, contact records and
//! the dedup-key rules shared by Filter and Delivery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Characters of the body kept in a contact record's summary.
pub const SUMMARY_CHARS: usize = 100;

/// Delivery medium. Each channel has its own pacing and key scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Dm,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Dm => "dm",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "dm" => Ok(Channel::Dm),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// Whether email and DM contacts share dedup keys.
///
/// `PerChannel`: email dedups on domain, DM on company name, each against its own ledger.
/// `Shared`: one ledger, and every candidate is checked/recorded under both its
/// domain key (when it has one) and its organization key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupScope {
    #[default]
    PerChannel,
    Shared,
}

impl FromStr for DedupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-channel" | "per_channel" => Ok(DedupScope::PerChannel),
            "shared" => Ok(DedupScope::Shared),
            other => Err(format!("unknown dedup scope '{other}'")),
        }
    }
}

/// The criteria a candidate was discovered under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OriginCriteria {
    LocationIndustry { location: String, industry: String },
    CityJobField { city: String, job_field: String },
}

impl OriginCriteria {
    /// The industry / field half of the criteria, used to tailor prompts.
    pub fn field(&self) -> &str {
        match self {
            OriginCriteria::LocationIndustry { industry, .. } => industry,
            OriginCriteria::CityJobField { job_field, .. } => job_field,
        }
    }
}

/// A discovered target before a message is drafted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub organization_name: String,
    pub contact_name: Option<String>,
    pub contact_address: Option<String>,
    pub origin_criteria: OriginCriteria,
}

impl Candidate {
    /// Primary dedup key: lower-cased email domain when the address is an email,
    /// otherwise the normalized organization name.
    pub fn dedup_key(&self) -> String {
        self.contact_address
            .as_deref()
            .and_then(email_domain)
            .unwrap_or_else(|| normalize_org(&self.organization_name))
    }

    /// Every key this candidate must be absent under before it can be contacted.
    pub fn ledger_keys(&self, scope: DedupScope) -> Vec<String> {
        let primary = self.dedup_key();
        match scope {
            DedupScope::PerChannel => vec![primary],
            DedupScope::Shared => {
                let org = normalize_org(&self.organization_name);
                if org == primary || org.is_empty() {
                    vec![primary]
                } else {
                    vec![primary, org]
                }
            }
        }
    }
}

/// Candidate plus the LLM-drafted body. Consumed by Delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DraftedMessage {
    pub candidate: Candidate,
    pub body_text: String,
    pub generated_at: DateTime<Utc>,
}

impl DraftedMessage {
    pub fn summary(&self) -> String {
        summarize(&self.body_text)
    }
}

/// Durable record of one successful send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub dedup_key: String,
    pub organization_name: String,
    pub contact_name: Option<String>,
    pub contact_address: Option<String>,
    pub job_title: Option<String>,
    pub message_summary: String,
    pub sent_at: DateTime<Utc>,
}

impl ContactRecord {
    pub fn from_draft(draft: &DraftedMessage, sent_at: DateTime<Utc>) -> Self {
        Self {
            dedup_key: draft.candidate.dedup_key(),
            organization_name: draft.candidate.organization_name.clone(),
            contact_name: draft.candidate.contact_name.clone(),
            contact_address: draft.candidate.contact_address.clone(),
            job_title: None,
            message_summary: draft.summary(),
            sent_at,
        }
    }
}

/// First `SUMMARY_CHARS` characters of `body`, not word-boundary aware.
pub fn summarize(body: &str) -> String {
    body.chars().take(SUMMARY_CHARS).collect()
}

/// Lower-cased domain of an email address, or `None` if `address` is not one.
pub fn email_domain(address: &str) -> Option<String> {
    let (local, domain) = address.trim().rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('.');
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

/// Trimmed, lower-cased organization name with internal whitespace collapsed.
pub fn normalize_org(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
pub(crate) fn email_candidate(org: &str, name: Option<&str>, address: &str) -> Candidate {
    Candidate {
        organization_name: org.to_string(),
        contact_name: name.map(String::from),
        contact_address: Some(address.to_string()),
        origin_criteria: OriginCriteria::LocationIndustry {
            location: "Atlanta".to_string(),
            industry: "Clean Tech".to_string(),
        },
    }
}
