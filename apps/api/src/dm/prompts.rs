// LLM prompt constants for DM targeting.

/// System prompt for industry matching — enforces JSON-only output.
pub const INDUSTRY_MATCH_SYSTEM: &str = "You map a student's job interests onto a fixed list \
    of industry categories. \
    You MUST respond with valid JSON only — a JSON array of category names. \
    Do NOT include any text outside the JSON array. \
    Do NOT use markdown code fences.";

/// Industry matching prompt template.
/// Replace: {job_field}, {industries}
pub const INDUSTRY_MATCH_PROMPT_TEMPLATE: &str = r#"Desired job field: "{job_field}"

Available industry categories:
{industries}

Pick the 1-2 categories from the list above that best match the desired job field.

RULES:
- Return at least 1 category, copied EXACTLY as written above
- Clean energy, cleantech, renewable, solar, wind or sustainable energy → ["Utilities & Renewable Energy"] only
- General "tech", "technology" or "startups" → ["Internet & Software"]
- "business" → ["Management Consulting"]
- "energy" that is not clean or renewable → ["Energy"]

Example: ["Internet & Software", "Information Technology"]"#;

/// System prompt for geocoding a US city.
pub const LOCATION_SYSTEM: &str = "You return coordinates for US cities. \
    Respond with the coordinates only, formatted as latitude,longitude. \
    No JSON, no markdown, no explanation.";

/// Geocoding prompt template.
/// Replace: {city}, {state}
pub const LOCATION_PROMPT_TEMPLATE: &str = r#"City: "{city}, {state}"

Return ONLY the coordinates as "latitude,longitude".
Examples:
- Dallas, Texas → 32.781339,-96.799759
- San Francisco, CA → 37.7749,-122.4194"#;
