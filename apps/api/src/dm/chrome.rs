//! `UiDriver` backed by a local Chrome via headless_chrome.
//!
//! headless_chrome is synchronous, so every call runs on the blocking pool
//! against a shared `Arc<Tab>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{info, warn};

use super::driver::{BrowserLauncher, DriverError, Link, Locator, Selector, UiDriver};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

pub struct ChromeDriver {
    // Dropping the browser kills the Chrome process.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub async fn launch(headless: bool) -> Result<Self, DriverError> {
        let driver = tokio::task::spawn_blocking(move || -> anyhow::Result<Self> {
            let options = LaunchOptions {
                headless,
                sandbox: false,
                window_size: Some((1920, 1080)),
                // The user may take minutes to log in by hand
                idle_browser_timeout: Duration::from_secs(900),
                ..Default::default()
            };
            let browser = Browser::new(options)?;
            let tab = browser.new_tab()?;
            tab.set_default_timeout(DEFAULT_TIMEOUT);
            Ok(Self {
                _browser: browser,
                tab,
            })
        })
        .await
        .map_err(|e| DriverError::Browser(format!("browser launch task failed: {e}")))??;

        info!("Chrome launched (headless: {headless})");
        Ok(driver)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| DriverError::Browser(format!("browser task failed: {e}")))?
            .map_err(DriverError::from)
    }

    /// Evaluates `expression`, which must produce a JSON string.
    async fn eval_json<T>(&self, expression: String) -> Result<T, DriverError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        self.blocking(move |tab| {
            let result = tab.evaluate(&expression, false)?;
            let raw = result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| anyhow::anyhow!("script returned no JSON string"))?;
            Ok(serde_json::from_str(&raw)?)
        })
        .await
    }
}

/// Launches a new local Chrome for every DM run.
#[derive(Debug, Clone, Copy)]
pub struct ChromeLauncher {
    pub headless: bool,
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn UiDriver>, DriverError> {
        let driver = ChromeDriver::launch(self.headless).await?;
        Ok(Arc::new(driver))
    }
}

/// JS expression yielding an array of the nodes matching `selector`.
fn nodes_js(selector: Selector) -> String {
    // serde_json quoting produces a valid JS string literal
    match selector {
        Selector::Css(css) => format!(
            "Array.from(document.querySelectorAll({}))",
            serde_json::Value::from(css)
        ),
        Selector::XPath(xpath) => format!(
            "(() => {{ const r = document.evaluate({}, document, null, \
             XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; \
             for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); \
             return out; }})()",
            serde_json::Value::from(xpath)
        ),
    }
}

fn first_node_js(selector: Selector) -> String {
    format!("{}[0]", nodes_js(selector))
}

#[async_trait]
impl UiDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn is_visible(&self, selector: Selector, timeout: Duration) -> Result<bool, DriverError> {
        self.blocking(move |tab| {
            let found = match selector {
                Selector::Css(css) => tab.wait_for_element_with_custom_timeout(css, timeout).is_ok(),
                Selector::XPath(xpath) => {
                    tab.wait_for_xpath_with_custom_timeout(xpath, timeout).is_ok()
                }
            };
            Ok(found)
        })
        .await
    }

    async fn click(&self, locator: Locator) -> Result<(), DriverError> {
        self.blocking(move |tab| {
            match locator.selector {
                Selector::Css(css) => {
                    tab.find_element(css)?.click()?;
                }
                Selector::XPath(xpath) => {
                    tab.find_element_by_xpath(xpath)?.click()?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn fill(&self, locator: Locator, text: &str) -> Result<(), DriverError> {
        // Clear and focus through JS, then insert the text in one go so that
        // newlines are not sent as Enter key presses.
        let clear = format!(
            "(() => {{ const el = {}; if (!el) return false; \
             if ('value' in el) {{ el.value = ''; }} else {{ el.textContent = ''; }} \
             el.focus(); return true; }})()",
            first_node_js(locator.selector)
        );
        let text = text.to_string();
        self.blocking(move |tab| {
            let cleared = tab.evaluate(&clear, false)?;
            if cleared.value != Some(serde_json::Value::Bool(true)) {
                anyhow::bail!("element {} disappeared before fill", locator.selector);
            }
            tab.send_character(&text)?;
            Ok(())
        })
        .await
    }

    async fn texts(&self, selector: Selector) -> Result<Vec<String>, DriverError> {
        self.eval_json(format!(
            "JSON.stringify({}.map(e => e.innerText || ''))",
            nodes_js(selector)
        ))
        .await
    }

    async fn links(&self) -> Result<Vec<Link>, DriverError> {
        self.eval_json(
            "JSON.stringify(Array.from(document.querySelectorAll('a'))\
             .map(a => ({ href: a.href || '', text: a.innerText || '' })))"
                .to_string(),
        )
        .await
    }

    async fn scroll_to_bottom(&self, max_scrolls: u32, wait: Duration) -> Result<(), DriverError> {
        let height = "JSON.stringify(document.body.scrollHeight)".to_string();
        let mut last: i64 = self.eval_json(height.clone()).await?;

        for _ in 0..max_scrolls {
            self.blocking(|tab| {
                tab.evaluate("window.scrollTo(0, document.body.scrollHeight)", false)?;
                Ok(())
            })
            .await?;
            tokio::time::sleep(wait).await;

            let current: i64 = self.eval_json(height.clone()).await?;
            if current == last {
                break;
            }
            last = current;
        }

        self.blocking(|tab| {
            tab.evaluate("window.scrollTo(0, 0)", false)?;
            Ok(())
        })
        .await
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(&self) {
        if let Err(e) = self
            .blocking(|tab| {
                tab.close(true)?;
                Ok(())
            })
            .await
        {
            warn!("Error closing browser tab: {e}");
        }
    }
}
