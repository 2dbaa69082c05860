//! Recruiter DMs on the job platform, driven through a real browser.

pub mod chrome;
pub mod driver;
pub mod handlers;
pub mod machine;
pub mod prompts;
pub mod selectors;
pub mod targeting;
