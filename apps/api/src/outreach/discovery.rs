//! Discovery stage: ask the LLM for a bounded list of candidates.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm_client::{parse_json, LlmError, LlmProvider};
use crate::outreach::candidate::{email_domain, Candidate, OriginCriteria};
use crate::outreach::prompts::{
    industry_examples, DISCOVERY_PROMPT_TEMPLATE, DISCOVERY_SYSTEM,
};

/// Upper bound a caller may request in one run.
pub const MAX_REQUESTED: u32 = 50;

const DISCOVERY_MAX_TOKENS: u32 = 4096;

/// Attempts per call: the first try plus one retry on malformed output.
const PARSE_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Discovery output was malformed: {0}")]
    Malformed(String),
}

/// One element of the JSON array the LLM returns.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    organization_name: String,
    #[serde(default)]
    contact_name: Option<String>,
    #[serde(default)]
    contact_address: Option<String>,
}

/// Produces at most `max` candidates matching `criteria`, in LLM order.
///
/// An empty list is the LLM reporting exhaustion and is returned as `Ok`.
/// Output that is not a JSON list of candidate objects is retried once, then
/// fails with `DiscoveryError::Malformed`.
pub async fn discover(
    llm: &dyn LlmProvider,
    criteria: &OriginCriteria,
    max: u32,
) -> Result<Vec<Candidate>, DiscoveryError> {
    let max = max.clamp(1, MAX_REQUESTED);
    let prompt = build_prompt(criteria, max);

    let mut last_reason = String::new();
    for attempt in 1..=PARSE_ATTEMPTS {
        let text = llm
            .complete(&prompt, DISCOVERY_SYSTEM, DISCOVERY_MAX_TOKENS)
            .await?;

        match parse_candidates(&text, criteria, max) {
            Ok(candidates) => {
                info!(
                    "Discovery returned {} candidates for {:?}",
                    candidates.len(),
                    criteria
                );
                return Ok(candidates);
            }
            Err(DiscoveryError::Malformed(reason)) => {
                warn!("Discovery attempt {attempt} produced malformed output: {reason}");
                last_reason = reason;
            }
            Err(e) => return Err(e),
        }
    }

    Err(DiscoveryError::Malformed(last_reason))
}

fn build_prompt(criteria: &OriginCriteria, max: u32) -> String {
    let (location, industry) = match criteria {
        OriginCriteria::LocationIndustry { location, industry } => (location, industry),
        OriginCriteria::CityJobField { city, job_field } => (city, job_field),
    };

    DISCOVERY_PROMPT_TEMPLATE
        .replace("{count}", &max.to_string())
        .replace("{industry_examples}", &industry_examples(industry))
        .replace("{industry}", industry)
        .replace("{location}", location)
}

/// Parses LLM text into candidates.
///
/// Items with a blank organization name or a non-email `contact_address` are
/// dropped with a warning; a response that is not a list of objects is an error.
pub fn parse_candidates(
    text: &str,
    criteria: &OriginCriteria,
    max: u32,
) -> Result<Vec<Candidate>, DiscoveryError> {
    let raw: Vec<RawCandidate> = match parse_json(text) {
        Ok(raw) => raw,
        Err(LlmError::Parse(e)) => return Err(DiscoveryError::Malformed(e.to_string())),
        Err(LlmError::EmptyContent) => {
            return Err(DiscoveryError::Malformed("empty response".to_string()))
        }
        Err(e) => return Err(DiscoveryError::Llm(e)),
    };

    let candidates = raw
        .into_iter()
        .filter_map(|item| {
            let organization_name = item.organization_name.trim().to_string();
            if organization_name.is_empty() {
                warn!("Dropping discovered item with a blank organization name");
                return None;
            }

            let contact_address = item
                .contact_address
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());
            if let Some(address) = &contact_address {
                if email_domain(address).is_none() {
                    warn!("Dropping {organization_name}: '{address}' is not an email address");
                    return None;
                }
            }

            Some(Candidate {
                organization_name,
                contact_name: item
                    .contact_name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
                contact_address,
                origin_criteria: criteria.clone(),
            })
        })
        .take(max as usize)
        .collect();

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::fake::ScriptedLlm;

    fn criteria() -> OriginCriteria {
        OriginCriteria::LocationIndustry {
            location: "Atlanta".to_string(),
            industry: "Clean Tech".to_string(),
        }
    }

    #[tokio::test]
    async fn test_discover_parses_and_bounds_candidates() {
        let llm = ScriptedLlm::new([Ok(r#"```json
            [
              {"organization_name": "Acme", "contact_name": "Jane", "contact_address": "jane@acme.com"},
              {"organization_name": "Beta", "contact_name": null, "contact_address": "hr@beta.com"},
              {"organization_name": "Gamma", "contact_name": null, "contact_address": "hi@gamma.io"}
            ]
            ```"#)]);

        let found = discover(&llm, &criteria(), 2).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].organization_name, "Acme");
        assert_eq!(found[0].contact_name.as_deref(), Some("Jane"));
        assert_eq!(found[1].contact_name, None);
        assert_eq!(found[1].origin_criteria, criteria());

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("up to 2 real"));
        assert!(prompt.contains("Atlanta"));
        assert!(prompt.contains("renewable energy"));
    }

    #[tokio::test]
    async fn test_empty_list_is_exhaustion_not_error() {
        let llm = ScriptedLlm::new([Ok("[]")]);
        let found = discover(&llm, &criteria(), 5).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried_once() {
        let llm = ScriptedLlm::new([
            Ok("Sure! Here are some companies: Acme, Beta"),
            Ok(r#"[{"organization_name": "Acme", "contact_name": null, "contact_address": "hr@acme.com"}]"#),
        ]);
        let found = discover(&llm, &criteria(), 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(llm.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_twice_fails() {
        let llm = ScriptedLlm::new([
            Ok(r#"{"organization_name": "Acme"}"#),
            Ok("not json"),
        ]);
        let err = discover(&llm, &criteria(), 5).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_llm_failure_is_not_retried_here() {
        let llm = ScriptedLlm::new([Err("overloaded")]);
        let err = discover(&llm, &criteria(), 5).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Llm(_)));
        assert_eq!(llm.prompts().len(), 1);
    }

    #[test]
    fn test_non_email_addresses_are_dropped() {
        let text = r#"[
            {"organization_name": "Acme", "contact_name": null, "contact_address": "acme.com"},
            {"organization_name": "  ", "contact_name": null, "contact_address": "x@blank.com"},
            {"organization_name": "Beta", "contact_name": "", "contact_address": "hr@beta.com"}
        ]"#;
        let found = parse_candidates(text, &criteria(), 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].organization_name, "Beta");
        assert_eq!(found[0].contact_name, None);
    }
}
