//! Discovery → Filter → Generation → Delivery for outreach campaigns, plus
//! the contact ledger and per-user history both channels share.

pub mod campaign;
pub mod candidate;
pub mod delivery;
pub mod discovery;
pub mod filter;
pub mod generation;
pub mod handlers;
pub mod history;
pub mod ledger;
pub mod prompts;
pub mod resume;
pub mod smtp;
