//! Employer targeting on the job platform: industries, location and search URL.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use url::form_urlencoded::byte_serialize;

use super::prompts::{
    INDUSTRY_MATCH_PROMPT_TEMPLATE, INDUSTRY_MATCH_SYSTEM, LOCATION_PROMPT_TEMPLATE,
    LOCATION_SYSTEM,
};
use crate::llm_client::{call_json, LlmProvider};

pub const EMPLOYER_SEARCH_URL: &str = "https://app.joinhandshake.com/employer-search";
pub const LOGIN_URL: &str = "https://app.joinhandshake.com/login";
pub const EMPLOYERS_URL: &str = "https://app.joinhandshake.com/employers";

/// `jobType` value for internships.
pub const INTERNSHIP_JOB_TYPE: u32 = 3;

const SEARCH_RADIUS: &str = "50mi";
const US_CENTER: &str = "39.8283,-98.5795";
const MAX_INDUSTRIES: usize = 2;
const CLEANTECH_INDUSTRY: &str = "Utilities & Renewable Energy";

/// Platform industry categories with the keywords that point at each.
pub const INDUSTRIES: &[(&str, &[&str])] = &[
    ("Accounting", &["accounting", "cpa", "audit", "tax"]),
    ("Advertising, PR & Marketing", &["advertising", "marketing", "pr", "public relations", "brand", "social media"]),
    ("Aerospace", &["aerospace", "aviation", "aircraft", "space", "satellite"]),
    ("Agriculture", &["agriculture", "farming", "agribusiness", "crop"]),
    ("Animal & Wildlife", &["animal", "wildlife", "veterinary", "zoo"]),
    ("Architecture and Planning", &["architecture", "urban planning", "building design"]),
    ("Automotive", &["automotive", "automobile", "car", "vehicle manufacturing"]),
    ("Biotech & Life Sciences", &["biotech", "biotechnology", "life sciences", "genomics", "bioinformatics"]),
    ("Civil Engineering", &["civil engineering", "infrastructure", "construction engineering"]),
    ("Commercial Banking & Credit", &["banking", "commercial bank", "credit", "lending"]),
    ("Computer Networking", &["networking", "cisco", "network security"]),
    ("Construction", &["construction", "building", "contractor"]),
    ("CPG - Consumer Packaged Goods", &["cpg", "consumer goods", "fmcg", "packaged goods"]),
    ("Defense", &["defense", "military", "homeland security"]),
    ("Design", &["design", "graphic design", "ux", "ui", "product design"]),
    ("Electronic & Computer Hardware", &["hardware", "electronics", "semiconductor", "chip"]),
    ("Energy", &["energy", "power", "oil", "gas", "fossil fuel"]),
    ("Engineering & Construction", &["engineering services"]),
    ("Environmental Services", &["environmental", "waste management", "recycling"]),
    ("Farming, Ranching and Fishing", &["ranch", "fishing", "aquaculture"]),
    ("Fashion", &["fashion", "apparel", "clothing", "textile"]),
    ("Financial Services", &["financial services", "wealth management", "financial planning", "fintech"]),
    ("Food & Beverage", &["food", "beverage", "food production"]),
    ("Forestry", &["forestry", "timber", "logging"]),
    ("Government - Consulting", &["government consulting", "public sector consulting"]),
    ("Government - Intelligence", &["intelligence", "cia", "nsa"]),
    ("Government - Local, State & Federal", &["government", "federal", "local government", "public sector"]),
    ("Healthcare", &["healthcare", "hospital", "medical", "health services"]),
    ("Higher Education", &["university", "college", "higher education", "academic"]),
    ("Hotels & Accommodation", &["hotel", "hospitality", "accommodation", "lodging"]),
    ("Human Resources", &["hr", "human resources", "talent"]),
    ("Information Technology", &["it", "information technology", "tech support", "systems"]),
    ("Insurance", &["insurance", "underwriting", "actuarial"]),
    ("Interior Design", &["interior design", "interior decorator"]),
    ("International Affairs", &["international relations", "diplomacy", "foreign affairs"]),
    ("Internet & Software", &["software", "saas", "tech", "internet", "web", "app", "platform"]),
    ("Investment / Portfolio Management", &["investment management", "portfolio", "asset management"]),
    ("Investment Banking", &["investment banking", "mergers", "acquisitions"]),
    ("Journalism, Media & Publishing", &["journalism", "media", "publishing", "news"]),
    ("K-12 Education", &["k-12", "elementary", "secondary", "teaching"]),
    ("Landscaping", &["landscaping", "lawn care", "grounds"]),
    ("Legal & Law Enforcement", &["legal", "law", "attorney", "law enforcement", "police"]),
    ("Library Services", &["library", "librarian", "archives"]),
    ("Management Consulting", &["consulting", "strategy", "management consulting", "business"]),
    ("Manufacturing", &["manufacturing", "production", "factory", "industrial"]),
    ("Medical Devices", &["medical device", "medical equipment", "medtech"]),
    ("Movies, TV, Music", &["film", "television", "tv", "music", "entertainment"]),
    ("Natural Resources", &["natural resources", "mining", "extraction"]),
    ("NGO", &["ngo", "non-governmental", "international development"]),
    ("Non-Profit - Other", &["nonprofit", "non-profit", "charity", "foundation"]),
    ("Oil & Gas", &["petroleum", "upstream", "downstream"]),
    ("Other Education", &["education", "training", "learning"]),
    ("Other Industries", &["other", "miscellaneous"]),
    ("Performing and Fine Arts", &["performing arts", "fine arts", "theater", "dance"]),
    ("Pharmaceuticals", &["pharmaceutical", "pharma", "drug", "medicines"]),
    ("Politics", &["politics", "political", "campaign", "policy"]),
    ("Real Estate", &["real estate", "property", "commercial real estate"]),
    ("Religious Work", &["religious", "ministry", "church", "faith"]),
    ("Research", &["research", "r&d", "lab", "scientist"]),
    ("Restaurants & Food Service", &["restaurant", "food service", "dining"]),
    ("Retail Stores", &["retail", "store", "shop", "merchandising"]),
    ("Sales & Marketing", &["sales", "business development"]),
    ("Scientific and Technical Consulting", &["scientific consulting", "technical consulting", "engineering consulting"]),
    ("Social Assistance", &["social work", "social services", "community services"]),
    ("Sports & Leisure", &["sports", "recreation", "fitness", "athletics"]),
    ("Staffing & Recruiting", &["staffing", "recruiting", "talent acquisition"]),
    ("Summer Camps/Outdoor Recreation", &["summer camp", "outdoor recreation", "camp"]),
    ("Telecommunications", &["telecom", "telecommunications", "wireless", "mobile"]),
    ("Tourism", &["tourism", "travel", "tour"]),
    ("Transportation & Logistics", &["transportation", "logistics", "supply chain", "shipping"]),
    (CLEANTECH_INDUSTRY, &["utilities", "renewable energy", "clean energy", "cleantech", "solar", "wind", "green energy", "sustainable energy"]),
    ("Veterinary", &["veterinary", "vet", "animal health"]),
    ("Wholesale Trade", &["wholesale", "distribution", "trade"]),
];

const CLEANTECH_KEYWORDS: &[&str] = &[
    "cleantech", "clean tech", "clean energy", "clean technology", "renewable", "solar", "wind",
    "green energy", "sustainable energy", "sustainability", "utilities",
];

const TECH_KEYWORDS: &[&str] = &[
    "tech", "software", "engineer", "developer", "computer", "data", "ai", "ml", "app", "web",
    "coding", "programming",
];

#[derive(Debug, Error)]
pub enum TargetingError {
    #[error("Invalid location '{0}': use \"City, State\" (e.g. \"Dallas, Texas\")")]
    InvalidLocation(String),
}

/// Maps industry names to the platform's numeric ids.
#[derive(Debug, Clone, Default)]
pub struct IndustryCatalog {
    ids: HashMap<String, u32>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    name: String,
    id: u32,
}

impl IndustryCatalog {
    /// Loads `[{"name": ..., "id": ...}]`. Without a path the catalog is empty
    /// and searches run without an industry filter.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read industry codes {}", path.display()))?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("Industry codes {} are not valid JSON", path.display()))?;
        info!("Loaded {} industry codes", entries.len());
        Ok(Self::from_pairs(entries.into_iter().map(|e| (e.name, e.id))))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            ids: pairs.into_iter().collect(),
        }
    }

    /// Ids for `names`, dropping names without one.
    pub fn ids_for(&self, names: &[&str]) -> Vec<u32> {
        names
            .iter()
            .filter_map(|name| {
                let id = self.ids.get(*name).copied();
                if id.is_none() {
                    warn!("No industry id known for '{name}'");
                }
                id
            })
            .collect()
    }
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '&' && c != '-')
        .filter(|w| !w.is_empty())
        .collect()
}

/// Multi-word keywords match as substrings, single words as whole words.
fn mentions(field: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        field.contains(keyword)
    } else {
        words(field).contains(&keyword)
    }
}

pub fn is_cleantech(job_field: &str) -> bool {
    let field = job_field.to_lowercase();
    CLEANTECH_KEYWORDS.iter().any(|k| mentions(&field, k))
}

/// Up to two industries whose name or keywords match `job_field`.
pub fn keyword_industries(job_field: &str) -> Vec<&'static str> {
    let field = job_field.trim().to_lowercase();
    if field.is_empty() {
        return Vec::new();
    }

    let by_name = INDUSTRIES.iter().filter(|(name, _)| {
        let name = name.to_lowercase();
        name.contains(&field) || field.contains(&name)
    });
    let by_keyword = INDUSTRIES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| mentions(&field, k)));

    let mut matched: Vec<&'static str> = Vec::new();
    for (name, _) in by_name.chain(by_keyword) {
        if !matched.contains(name) {
            matched.push(name);
        }
        if matched.len() == MAX_INDUSTRIES {
            break;
        }
    }
    matched
}

/// Last-resort industry when nothing else matches.
pub fn default_industry(job_field: &str) -> &'static str {
    let field = job_field.to_lowercase();
    if TECH_KEYWORDS.iter().any(|k| mentions(&field, k)) {
        "Internet & Software"
    } else {
        "Other Industries"
    }
}

/// Industry names for `job_field`: cleantech override, then the LLM, then
/// keyword matching, then a default. Always returns 1-2 names.
pub async fn match_industries(llm: &dyn LlmProvider, job_field: &str) -> Vec<&'static str> {
    if is_cleantech(job_field) {
        info!("'{job_field}' is clean-energy related; using {CLEANTECH_INDUSTRY}");
        return vec![CLEANTECH_INDUSTRY];
    }

    let listing = INDUSTRIES
        .iter()
        .map(|(name, _)| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = INDUSTRY_MATCH_PROMPT_TEMPLATE
        .replace("{job_field}", job_field)
        .replace("{industries}", &listing);

    match call_json::<Vec<String>>(llm, &prompt, INDUSTRY_MATCH_SYSTEM, 300).await {
        Ok(names) => {
            let known: Vec<&'static str> = names
                .iter()
                .filter_map(|n| INDUSTRIES.iter().find(|(name, _)| *name == n.trim()))
                .map(|(name, _)| *name)
                .take(MAX_INDUSTRIES)
                .collect();
            if !known.is_empty() {
                info!("Matched '{job_field}' to {known:?}");
                return known;
            }
            warn!("LLM returned no known industries for '{job_field}': {names:?}");
        }
        Err(e) => warn!("Industry matching via LLM failed: {e}"),
    }

    let matched = keyword_industries(job_field);
    if !matched.is_empty() {
        return matched;
    }
    vec![default_industry(job_field)]
}

/// Location filter fields as the employer search expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFilter {
    pub distance: String,
    pub point: String,
    pub label: String,
    pub kind: String,
}

impl LocationFilter {
    fn new(point: &str, label: String) -> Self {
        Self {
            distance: SEARCH_RADIUS.to_string(),
            point: point.to_string(),
            label,
            kind: "place".to_string(),
        }
    }
}

/// Splits "City, State" into trimmed parts; both must be non-empty.
pub fn parse_city_state(input: &str) -> Result<(String, String), TargetingError> {
    let invalid = || TargetingError::InvalidLocation(input.to_string());
    let (city, state) = input.split_once(',').ok_or_else(invalid)?;
    let (city, state) = (city.trim(), state.trim());
    if city.is_empty() || state.is_empty() {
        return Err(invalid());
    }
    Ok((city.to_string(), state.to_string()))
}

/// Validates and normalizes a "lat,long" answer.
fn parse_coordinates(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | ' ' | '\n' | '\r' | '\t'))
        .collect();
    let (lat, long) = cleaned.split_once(',')?;
    let lat: f64 = lat.parse().ok()?;
    let long: f64 = long.parse().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
        return None;
    }
    Some(format!("{lat},{long}"))
}

/// Geocodes "City, State" through the LLM. Falls back to the centre of the US
/// labelled with the city when the answer is unusable.
///
/// `input` must already have passed `parse_city_state`.
pub async fn resolve_location(llm: &dyn LlmProvider, input: &str) -> LocationFilter {
    let (city, state) = match parse_city_state(input) {
        Ok(parts) => parts,
        Err(e) => {
            warn!("{e}; using fallback location");
            let city = input.split(',').next().unwrap_or(input).trim().to_string();
            return LocationFilter::new(US_CENTER, format!("{city}, United States"));
        }
    };

    let prompt = LOCATION_PROMPT_TEMPLATE
        .replace("{city}", &city)
        .replace("{state}", &state);

    match llm.complete(&prompt, LOCATION_SYSTEM, 100).await {
        Ok(text) => match parse_coordinates(&text) {
            Some(point) => {
                return LocationFilter::new(&point, format!("{city}, {state}, United States"))
            }
            None => warn!("Unusable coordinates for {city}, {state}: {text:?}"),
        },
        Err(e) => warn!("Geocoding {city}, {state} failed: {e}"),
    }

    LocationFilter::new(US_CENTER, format!("{city}, United States"))
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Builds the filtered employer-search URL. Brackets are pre-encoded the way
/// the platform's own links write them.
pub fn employer_search_url(
    industry_ids: &[u32],
    location: &LocationFilter,
    job_type: Option<u32>,
) -> String {
    let mut url = format!("{EMPLOYER_SEARCH_URL}?per_page=50");

    if let Some(job_type) = job_type {
        url.push_str(&format!("&jobType={job_type}"));
    }

    url.push_str(&format!(
        "&locations%5B%5D%5Bdistance%5D={}",
        encode(&location.distance)
    ));
    url.push_str(&format!("&locations%5B%5D%5Bpoint%5D={}", encode(&location.point)));
    url.push_str(&format!("&locations%5B%5D%5Blabel%5D={}", encode(&location.label)));
    url.push_str(&format!("&locations%5B%5D%5Btype%5D={}", encode(&location.kind)));

    for id in industry_ids {
        url.push_str(&format!("&industryIds%5B%5D={id}"));
    }
    for size in 1..=4 {
        url.push_str(&format!("&institutionSizeIds%5B%5D={size}"));
    }

    url.push_str("&page=1");
    url
}
