//! Browser capability used by the DM workflow, plus selector-chain resolution.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// One way of locating an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Css(&'static str),
    XPath(&'static str),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(s) => write!(f, "css={s}"),
            Selector::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Ordered fallback list; the first selector that matches wins.
#[derive(Debug, Clone, Copy)]
pub struct SelectorChain {
    pub name: &'static str,
    pub selectors: &'static [Selector],
    /// How long each selector is given to appear.
    pub timeout: Duration,
}

/// A resolved element, identified by the selector that found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub selector: Selector,
}

/// An `<a>` element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    pub href: String,
    pub text: String,
}

#[derive(Debug, Error)]
#[error("No element matched the {chain} ({tried} selectors tried)")]
pub struct SelectorNotFound {
    pub chain: &'static str,
    pub tried: usize,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    SelectorNotFound(#[from] SelectorNotFound),

    #[error("Browser error: {0}")]
    Browser(String),
}

impl From<anyhow::Error> for DriverError {
    fn from(e: anyhow::Error) -> Self {
        DriverError::Browser(format!("{e:#}"))
    }
}

/// The UI operations the DM workflow needs from a browser session.
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Whether `selector` matches a visible element within `timeout`.
    async fn is_visible(&self, selector: Selector, timeout: Duration) -> Result<bool, DriverError>;

    async fn click(&self, locator: Locator) -> Result<(), DriverError>;

    /// Replaces the element's content with `text`.
    async fn fill(&self, locator: Locator, text: &str) -> Result<(), DriverError>;

    /// Inner text of every element matching `selector`, in document order.
    async fn texts(&self, selector: Selector) -> Result<Vec<String>, DriverError>;

    async fn links(&self) -> Result<Vec<Link>, DriverError>;

    /// Scrolls until the page stops growing or `max_scrolls` is reached, then back to the top.
    async fn scroll_to_bottom(&self, max_scrolls: u32, wait: Duration) -> Result<(), DriverError>;

    /// Lets the page settle after an interaction.
    async fn pause(&self, duration: Duration);

    async fn close(&self);
}

/// Opens a fresh browser session for one DM run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn UiDriver>, DriverError>;
}

/// Resolves `chain` to the first selector that matches.
///
/// A selector that errors is treated like one that does not match; only an
/// exhausted chain is an error.
pub async fn find_element(
    driver: &dyn UiDriver,
    chain: &SelectorChain,
) -> Result<Locator, SelectorNotFound> {
    for &selector in chain.selectors {
        match driver.is_visible(selector, chain.timeout).await {
            Ok(true) => {
                debug!("{} resolved by {selector}", chain.name);
                return Ok(Locator { selector });
            }
            Ok(false) => {}
            Err(e) => debug!("{} selector {selector} failed: {e}", chain.name),
        }
    }

    Err(SelectorNotFound {
        chain: chain.name,
        tried: chain.selectors.len(),
    })
}
