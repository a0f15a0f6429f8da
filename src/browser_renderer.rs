//! Full-browser capture strategy
//!
//! Every render launches its own Chromium process with a throwaway profile,
//! emulates a phone, seeds any stored session, scrolls the page to trigger
//! lazy-loaded content and returns the rendered DOM. The process and profile
//! are torn down whether the render succeeds or not.

use crate::{
    create_browser_config, AuthState, Config, PageRenderer, SnapshotError, StorageState,
    StoredCookie,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
    TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// How long the resource count must stay flat before the page counts as idle.
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_millis(100);

const NETWORK_PROBE_JS: &str = "({ ready: document.readyState, \
resources: performance.getEntriesByType('resource').length })";
const SCROLL_TO_BOTTOM_JS: &str =
    "window.scrollTo(0, document.body ? document.body.scrollHeight : 0)";

#[derive(Debug, Deserialize)]
struct NetworkProbe {
    ready: String,
    resources: u64,
}

/// Browser-rendering strategy backed by chromiumoxide.
#[derive(Clone)]
pub struct BrowserRenderer {
    config: Arc<Config>,
    limiter: Arc<Semaphore>,
}

impl BrowserRenderer {
    pub fn new(config: Arc<Config>) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_renders.max(1)));
        Self { config, limiter }
    }

    async fn render(&self, url: &str, auth: &AuthState) -> Result<String, SnapshotError> {
        // Load the session before paying for a browser launch.
        let storage_state = match &auth.storage_state {
            Some(path) => Some(StorageState::load(path).await?),
            None => None,
        };

        let profile_dir = tempfile::Builder::new()
            .prefix("page-snapshot-profile-")
            .tempdir()
            .map_err(|e| rendering(format!("failed to create profile dir: {e}")))?;
        let browser_config = create_browser_config(&self.config, profile_dir.path())
            .map_err(|e| rendering(format!("invalid browser config: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| rendering(format!("browser launch failed: {e}")))?;

        // The handler drives the DevTools connection and must be polled for the
        // browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let result = self
            .render_in_browser(&browser, url, storage_state.as_ref(), &auth.cookies)
            .await;

        if let Err(e) = browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Failed to reap browser process: {}", e);
        }
        handler_task.abort();
        drop(profile_dir);

        result
    }

    async fn render_in_browser(
        &self,
        browser: &Browser,
        url: &str,
        storage_state: Option<&StorageState>,
        cookies: &[StoredCookie],
    ) -> Result<String, SnapshotError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| rendering(format!("failed to open page: {e}")))?;

        self.prepare_page(&page, storage_state, cookies).await?;

        let navigation_timeout = self.config.browser_timeout;
        match timeout(navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(rendering(format!("navigation failed: {e}"))),
            Err(_) => {
                return Err(rendering(format!(
                    "navigation timed out after {navigation_timeout:?}"
                )))
            }
        }

        self.wait_for_network_idle(&page).await?;

        for pass in 0..self.config.scroll_passes {
            page.evaluate(SCROLL_TO_BOTTOM_JS)
                .await
                .map_err(|e| rendering(format!("scroll pass {} failed: {e}", pass + 1)))?;
            sleep(self.config.scroll_pause).await;
        }

        self.wait_for_network_idle(&page).await?;

        let html = page
            .content()
            .await
            .map_err(|e| rendering(format!("failed to read page content: {e}")))?;

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }

        Ok(html)
    }

    async fn prepare_page(
        &self,
        page: &Page,
        storage_state: Option<&StorageState>,
        cookies: &[StoredCookie],
    ) -> Result<(), SnapshotError> {
        let viewport = &self.config.viewport;
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(viewport.mobile)
            .build()
            .map_err(rendering)?;
        page.execute(metrics)
            .await
            .map_err(|e| rendering(format!("failed to set viewport: {e}")))?;

        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(self.config.user_agent.clone())
            .accept_language(self.config.accept_language.clone())
            .build()
            .map_err(rendering)?;
        page.execute(user_agent)
            .await
            .map_err(|e| rendering(format!("failed to set user agent: {e}")))?;

        let mut headers = serde_json::Map::new();
        headers.insert(
            "Accept-Language".to_string(),
            self.config.accept_language.clone().into(),
        );
        if let Some(referer) = &self.config.referer {
            headers.insert("Referer".to_string(), referer.clone().into());
        }
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(headers),
        )))
        .await
        .map_err(|e| rendering(format!("failed to set extra headers: {e}")))?;

        let mut all_cookies: Vec<&StoredCookie> = Vec::new();
        if let Some(state) = storage_state {
            all_cookies.extend(state.cookies.iter());
            if let Some(script) = local_storage_script(state) {
                page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
                    .await
                    .map_err(|e| rendering(format!("failed to seed localStorage: {e}")))?;
            }
        }
        all_cookies.extend(cookies.iter());

        if !all_cookies.is_empty() {
            let params = all_cookies
                .into_iter()
                .map(to_cookie_param)
                .collect::<Result<Vec<_>, _>>()?;
            debug!("Applying {} cookies", params.len());
            page.set_cookies(params)
                .await
                .map_err(|e| rendering(format!("failed to set cookies: {e}")))?;
        }

        Ok(())
    }

    async fn wait_for_network_idle(&self, page: &Page) -> Result<(), SnapshotError> {
        let limit = self.config.browser_timeout;
        let wait = async {
            let mut last_count: Option<u64> = None;
            let mut quiet_since = Instant::now();
            loop {
                match page.evaluate(NETWORK_PROBE_JS).await {
                    Ok(result) => match result.into_value::<NetworkProbe>() {
                        Ok(probe) => {
                            let settled = probe.ready == "complete"
                                && last_count == Some(probe.resources);
                            if !settled {
                                last_count = Some(probe.resources);
                                quiet_since = Instant::now();
                            } else if quiet_since.elapsed() >= NETWORK_IDLE_WINDOW {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!("Unreadable network probe: {:?}", e);
                            quiet_since = Instant::now();
                        }
                    },
                    Err(e) => {
                        // Usually a navigation replacing the execution context.
                        debug!("Network probe failed: {}", e);
                        quiet_since = Instant::now();
                    }
                }
                sleep(NETWORK_POLL_INTERVAL).await;
            }
        };

        timeout(limit, wait)
            .await
            .map_err(|_| rendering(format!("timed out waiting for network idle after {limit:?}")))
    }
}

#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn fetch(&self, url: &str, auth: &AuthState) -> Result<String, SnapshotError> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| rendering(format!("render limiter closed: {e}")))?;

        info!(url = %url, "Rendering page in browser");
        let started = Instant::now();

        // Rendering runs on its own task so it never stalls the caller's.
        let renderer = self.clone();
        let task_url = url.to_string();
        let task_auth = auth.clone();
        let html = tokio::spawn(async move { renderer.render(&task_url, &task_auth).await })
            .await
            .map_err(|e| rendering(format!("render task failed: {e}")))??;

        debug!(url = %url, elapsed = ?started.elapsed(), bytes = html.len(), "Browser render finished");
        Ok(html)
    }
}

fn rendering(detail: impl Into<String>) -> SnapshotError {
    SnapshotError::Rendering(detail.into())
}

fn to_cookie_param(cookie: &StoredCookie) -> Result<CookieParam, SnapshotError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone());

    if let Some(url) = &cookie.url {
        builder = builder.url(url.clone());
    }
    if let Some(domain) = &cookie.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(path) = &cookie.path {
        builder = builder.path(path.clone());
    }
    if let Some(secure) = cookie.secure {
        builder = builder.secure(secure);
    }
    if let Some(http_only) = cookie.http_only {
        builder = builder.http_only(http_only);
    }
    if let Some(expires) = cookie.expires.filter(|e| *e >= 0.0) {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    if let Some(same_site) = cookie.same_site.as_deref().and_then(parse_same_site) {
        builder = builder.same_site(same_site);
    }

    builder
        .build()
        .map_err(|e| rendering(format!("invalid cookie {}: {e}", cookie.name)))
}

fn parse_same_site(value: &str) -> Option<CookieSameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

/// Script run before any page script that restores localStorage for the
/// matching origin only.
fn local_storage_script(state: &StorageState) -> Option<String> {
    let mut seeds = serde_json::Map::new();
    for origin in state.origins.iter().filter(|o| !o.local_storage.is_empty()) {
        let items: Vec<serde_json::Value> = origin
            .local_storage
            .iter()
            .map(|item| serde_json::json!([item.name, item.value]))
            .collect();
        seeds.insert(origin.origin.clone(), serde_json::Value::Array(items));
    }
    if seeds.is_empty() {
        return None;
    }

    Some(format!(
        "(() => {{ const seeds = {}; const items = seeds[window.location.origin]; \
         if (!items) return; \
         try {{ for (const [k, v] of items) {{ window.localStorage.setItem(k, v); }} }} catch (e) {{}} }})();",
        serde_json::Value::Object(seeds)
    ))
}
