// All LLM prompt constants for the outreach pipeline.

/// System prompt for candidate discovery; enforces JSON-only output.
pub const DISCOVERY_SYSTEM: &str = "You are a startup research assistant who knows regional \
    company ecosystems well. \
    You MUST respond with valid JSON only — a JSON array of company objects. \
    Do NOT include any text outside the JSON array. \
    Do NOT use markdown code fences. \
    Do NOT invent companies or domains you are unsure about.";

/// Discovery prompt template.
/// Replace: {count}, {industry}, {location}, {industry_examples}
pub const DISCOVERY_PROMPT_TEMPLATE: &str = r#"Find up to {count} real, currently operating {industry} companies based in or with a significant presence in {location}.

COMPANY RULES:
- Only companies working in {industry} {industry_examples}
- Early-stage companies and startups only, roughly 10-200 employees, founded in the last 10 years
- Only companies you are highly confident exist today

CONTACT RULES:
- contact_address must be a real email address on the company's primary domain (e.g. "careers@acmesolar.com")
- Prefer hiring inboxes (careers@, jobs@, talent@, internships@) or a named recruiter
- contact_name is the person's name when the address belongs to a person, otherwise null
- Never include a protocol or "www." in the domain part

QUALITY OVER QUANTITY:
Returning fewer than {count} companies is better than guessing. If you know of no further
companies matching these rules, return an empty array [].

Return a JSON array with this EXACT schema (no extra fields):
[
  {"organization_name": "Acme Solar", "contact_name": null, "contact_address": "careers@acmesolar.com"}
]"#;

/// System prompt for message drafting; enforces JSON-only output.
pub const EMAIL_DRAFT_SYSTEM: &str = "You are an expert career coach drafting cold outreach \
    emails for a student seeking internships. \
    You MUST respond with valid JSON only — a single JSON object. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT fabricate facts about the company or the applicant.";

/// Email draft prompt template.
/// Replace: {industry}, {organization_name}, {contact_line}, {resume_section}, {custom_section}
pub const EMAIL_DRAFT_PROMPT_TEMPLATE: &str = r#"Draft one internship outreach email to {organization_name}, a company in the {industry} industry.
{contact_line}

The email must:
1. Reference specific work the company is doing in {industry}
2. Connect the applicant's background to the company's mission
3. Sound authentic and human, professional but warm
4. Ask about internship opportunities without being pushy
5. Stay between 150 and 200 words
6. Mention that the applicant's resume is attached

Address the company team when no contact name is given. Extract the applicant's name,
university and major from the resume when available and sign off with the applicant's name.
{resume_section}{custom_section}
Return a JSON object with this EXACT schema (no extra fields, no subject line):
{"body_text": "Hi Acme Solar Team, ..."}"#;

/// Section inserted when a résumé excerpt is available.
/// Replace: {resume_text}
pub const RESUME_SECTION_TEMPLATE: &str = "\nRESUME:\n{resume_text}\n";

/// Section inserted when the user supplied extra talking points.
/// Replace: {custom_message}
pub const CUSTOM_SECTION_TEMPLATE: &str =
    "\nAlso work in this point from the applicant: {custom_message}\n";

/// System prompt for DM drafting. Plain text out, not JSON.
pub const DM_DRAFT_SYSTEM: &str = "You help a student write short, natural direct messages \
    to recruiters on a campus job platform. \
    Respond with the message body only. \
    Do NOT include a greeting, signature, subject line or placeholders.";

/// DM body prompt template.
/// Replace: {organization_name}, {recruiter}, {resume_section}, {custom_section}
pub const DM_DRAFT_PROMPT_TEMPLATE: &str = r#"Company: {organization_name}
Recruiter: {recruiter}. Refer to them only by full name or title (e.g. "Dr. Alice Wonderland" or "Dr. Wonderland"), never by their job description.
{resume_section}
Write a short professional direct message, 3-4 sentences at most, that:
1. Expresses genuine interest in opportunities at {organization_name}
2. Highlights 1-2 relevant skills or experiences from the resume
3. Asks about internship or full-time opportunities and offers to talk further
4. Sounds conversational rather than stiff
{custom_section}
Start directly with the content. The message must be ready to send as-is."#;

/// Used when a DM body cannot be drafted by the LLM.
/// Replace: {organization_name}
pub const DM_FALLBACK_BODY_TEMPLATE: &str = "I'm very interested in exploring internship and \
full-time opportunities at {organization_name}. I believe my skills and experience would be a \
great fit for your team.\n\nWould you be available for a brief conversation about potential \
opportunities?";

/// Sub-sector hints that steer discovery toward the right companies.
pub fn industry_examples(industry: &str) -> String {
    let lower = industry.to_lowercase();
    let has_word = |w: &str| lower.split(|c: char| !c.is_alphanumeric()).any(|t| t == w);

    if lower.contains("clean tech") || lower.contains("cleantech") || lower.contains("green") {
        "(renewable energy, carbon capture, waste reduction, sustainable materials, etc.)".into()
    } else if has_word("ai") || has_word("ml") || lower.contains("machine learning") {
        "(machine learning, natural language processing, computer vision, AI tooling, etc.)".into()
    } else if lower.contains("fintech") {
        "(payments, banking, investment platforms, financial software, etc.)".into()
    } else if lower.contains("health") {
        "(medical devices, health tech, biotech, telemedicine, etc.)".into()
    } else if lower.contains("saas") {
        "(B2B software, enterprise tools, cloud platforms, productivity software, etc.)".into()
    } else {
        format!("({industry} related technologies and services)")
    }
}
