use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use culler_core::config::Selectors;
use culler_core::error::AppError;
use culler_core::traits::{ActionTrigger, CellHandle, Control, ControlScope, RenderedListHost};
use futures::StreamExt;
use serde::de::DeserializeOwned;

use crate::locator::TriggerLocator;
use crate::navigation::{following_url, profile_handle};

/// Toast texts that mean the host is throttling actions.
const THROTTLE_MARKERS: &[&str] = &[
    "rate limit",
    "try again later",
    "too many requests",
    "unable to unfollow",
];

/// Browser settings.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Attach to a running Chrome (DevTools websocket URL) instead of
    /// launching one. The attached browser keeps its logged-in session.
    pub ws_url: Option<String>,
    /// Profile directory for a launched browser, so a login persists.
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub navigation_timeout: Duration,
    /// Interval between polls while waiting for an element.
    pub poll_interval: Duration,
    pub selectors: Selectors,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            user_data_dir: None,
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
            selectors: Selectors::default(),
        }
    }
}

impl BrowserConfig {
    /// Reads `CULLER_CHROME_WS`, `CULLER_CHROME_PROFILE` and
    /// `CULLER_HEADLESS` (default true).
    pub fn from_env() -> Self {
        Self {
            ws_url: std::env::var("CULLER_CHROME_WS").ok(),
            user_data_dir: std::env::var("CULLER_CHROME_PROFILE").ok().map(PathBuf::from),
            headless: std::env::var("CULLER_HEADLESS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            ..Self::default()
        }
    }
}

/// [`RenderedListHost`] and [`ActionTrigger`] over a Chromium tab, driven
/// through the Chrome DevTools Protocol.
///
/// All clones share one browser process and one tab. Every DOM access is
/// a short script evaluated in the page.
#[derive(Clone)]
pub struct BrowserHost {
    /// Held so the browser process outlives every clone of the tab.
    #[allow(dead_code)]
    browser: Arc<Browser>,
    page: Page,
    locator: TriggerLocator,
    config: BrowserConfig,
}

impl BrowserHost {
    /// Launches (or attaches to) a browser and opens a blank tab.
    pub async fn launch(config: BrowserConfig) -> Result<Self, AppError> {
        let (browser, mut handler) = match &config.ws_url {
            Some(ws) => Browser::connect(ws.clone())
                .await
                .map_err(|e| AppError::HostError(format!("Failed to attach to browser: {e}")))?,
            None => {
                let mut builder = chromiumoxide::BrowserConfig::builder()
                    .no_sandbox()
                    .arg("--disable-gpu")
                    .arg("--disable-dev-shm-usage")
                    .arg("--no-first-run");
                if !config.headless {
                    builder = builder.with_head();
                }
                if let Some(dir) = &config.user_data_dir {
                    builder = builder.user_data_dir(dir);
                }
                if let Some(bin) = find_chrome_binary() {
                    tracing::info!("Using Chrome binary: {}", bin.display());
                    builder = builder.chrome_executable(bin);
                }
                let cdp_config = builder
                    .build()
                    .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;
                Browser::launch(cdp_config)
                    .await
                    .map_err(|e| AppError::HostError(format!("Failed to launch browser: {e}")))?
            }
        };

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(cdp_error)?;
        Ok(Self {
            browser: Arc::new(browser),
            page,
            locator: TriggerLocator::new()?,
            config,
        })
    }

    /// Opens `handle`'s following list and waits for the first cell.
    pub async fn open_following(&self, handle: &str) -> Result<(), AppError> {
        let url = following_url(handle)?;
        tracing::info!(%url, "Opening following list");

        tokio::time::timeout(self.config.navigation_timeout, self.page.goto(url.as_str()))
            .await
            .map_err(|_| AppError::HostTimeout {
                selector: url.to_string(),
                millis: self.config.navigation_timeout.as_millis() as u64,
            })?
            .map_err(cdp_error)?;

        let landed = self.page.url().await.map_err(cdp_error)?.unwrap_or_default();
        profile_handle(&landed)?;
        self.wait_for(&self.config.selectors.cell, self.config.navigation_timeout)
            .await?;
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, AppError> {
        self.page
            .evaluate(script)
            .await
            .map_err(cdp_error)?
            .into_value()
            .map_err(|e| AppError::HostError(format!("Unexpected script result: {e}")))
    }

    async fn number(&self, expression: &str) -> Result<f64, AppError> {
        self.eval(format!("Number({expression})")).await
    }

    async fn exists(&self, selector: &str) -> Result<bool, AppError> {
        self.eval(format!("document.querySelector({}) !== null", js(selector)))
            .await
    }
}

impl RenderedListHost for BrowserHost {
    async fn enumerate(&self, selector: &str) -> Result<Vec<CellHandle>, AppError> {
        let markup: Vec<String> = self
            .eval(format!(
                "Array.from(document.querySelectorAll({})).map(el => el.outerHTML)",
                js(selector)
            ))
            .await?;
        Ok(markup
            .into_iter()
            .enumerate()
            .map(|(i, m)| CellHandle::new(i, m))
            .collect())
    }

    async fn scroll_by(&self, delta: f64) -> Result<(), AppError> {
        self.eval::<bool>(format!("(window.scrollBy(0, {delta}), true)"))
            .await
            .map(drop)
    }

    async fn scroll_to(&self, position: f64) -> Result<(), AppError> {
        self.eval::<bool>(format!("(window.scrollTo(0, {position}), true)"))
            .await
            .map(drop)
    }

    async fn current_extent(&self) -> Result<f64, AppError> {
        self.number("document.documentElement.scrollHeight").await
    }

    async fn current_position(&self) -> Result<f64, AppError> {
        self.number("window.scrollY").await
    }

    async fn viewport_height(&self) -> Result<f64, AppError> {
        self.number("window.innerHeight").await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<CellHandle, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(cell) = self.enumerate(selector).await?.into_iter().next() {
                return Ok(cell);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::HostTimeout {
                    selector: selector.to_string(),
                    millis: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn throttled(&self) -> Result<bool, AppError> {
        let markers: Vec<String> = THROTTLE_MARKERS.iter().map(|m| m.to_string()).collect();
        let markers = serde_json::to_string(&markers)?;
        self.eval(format!(
            r#"(() => {{
                const markers = {markers};
                return Array.from(document.querySelectorAll('[data-testid="toast"], [role="alert"]'))
                    .some(el => markers.some(m => el.textContent.toLowerCase().includes(m)));
            }})()"#
        ))
        .await
    }
}

impl ActionTrigger for BrowserHost {
    fn locate(&self, cell: &CellHandle) -> Option<Control> {
        self.locator.locate(cell)
    }

    async fn activate(&self, control: &Control) -> Result<(), AppError> {
        let target = control_target(&self.config.selectors.cell, control);
        let clicked: bool = self
            .eval(format!(
                "(() => {{ const el = {target}; if (!el) return false; \
                 el.scrollIntoView({{ block: 'center' }}); el.click(); return true; }})()"
            ))
            .await?;
        if clicked {
            Ok(())
        } else {
            Err(AppError::HostError(format!(
                "Control {} is no longer rendered",
                control.selector
            )))
        }
    }

    async fn confirmation_prompt(&self, timeout: Duration) -> Result<Option<Control>, AppError> {
        let selectors = &self.config.selectors;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for candidate in [&selectors.confirm, &selectors.alt_confirm] {
                if self.exists(candidate).await? {
                    return Ok(Some(Control::in_document(candidate.clone())));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Script expression resolving `control` to a live element, or null.
fn control_target(cell_selector: &str, control: &Control) -> String {
    let cells = format!(
        "Array.from(document.querySelectorAll({}))",
        js(cell_selector)
    );
    match (&control.scope, &control.entity) {
        // The cell linking to the entity's profile, wherever it is now.
        (ControlScope::Cell(_), Some(id)) => format!(
            "(() => {{ const href = '/' + {}.toLowerCase(); \
             const cell = {cells}.find(c => Array.from(c.querySelectorAll('a[href]')) \
             .some(a => a.getAttribute('href').toLowerCase() === href)); \
             return cell ? cell.querySelector({}) : null; }})()",
            js(id),
            js(&control.selector)
        ),
        (ControlScope::Cell(index), None) => format!(
            "(() => {{ const cell = {cells}[{index}]; \
             return cell ? cell.querySelector({}) : null; }})()",
            js(&control.selector)
        ),
        (ControlScope::Document, _) => format!("document.querySelector({})", js(&control.selector)),
    }
}

/// A JS string literal for `s`.
fn js(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn cdp_error(e: CdpError) -> AppError {
    let msg = e.to_string();
    if AppError::is_disconnect_message(&msg) {
        AppError::HostDisconnected(msg)
    } else {
        AppError::HostError(msg)
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via snap, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags. We look for the real
/// binary inside the snap first, then fall back to well-known paths.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}
