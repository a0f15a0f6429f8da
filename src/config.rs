//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the snapshot service,
//! covering storage locations, fetch timeouts, browser emulation settings and the
//! host list that always requires browser rendering.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `headless` is left unset.
pub const HEADLESS_ENV_VAR: &str = "SNAPSHOT_HEADLESS";

/// Mobile user agent presented by the browser strategy.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) \
AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 \
MicroMessenger/8.0.40(0x1800282e) NetType/WIFI Language/zh_CN";

/// Main configuration structure for the snapshot service
///
/// Every field has a default, so a config file only needs to list the values it
/// changes.
///
/// # Examples
///
/// ```rust
/// use page_snapshot::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     js_heavy_hosts: vec!["spa.example.com".to_string()],
///     ..Default::default()
/// };
/// assert!(config.is_js_heavy_host("SPA.example.com"));
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory that receives the archived HTML files (default: ./data/snapshots)
    ///
    /// The same directory is exposed under `/snapshots/` by the HTTP server.
    pub snapshot_root: PathBuf,

    /// Public base URL under which snapshot files are served
    /// (default: http://localhost:8000/snapshots)
    pub snapshot_base_url: String,

    /// JSON-lines audit log of capture attempts (default: ./data/history.jsonl)
    pub history_file: PathBuf,

    /// Timeout for the direct HTTP fetch (default: 20 seconds)
    pub request_timeout: Duration,

    /// Timeout for browser navigation and each network-idle wait (default: 45 seconds)
    pub browser_timeout: Duration,

    /// Run the browser headless (default: true)
    ///
    /// When `None`, the `SNAPSHOT_HEADLESS` environment variable decides.
    pub headless: Option<bool>,

    /// Directory holding per-host storage-state files written by the session
    /// capture tool, looked up as `{session_dir}/{hostname}.json`.
    pub session_dir: Option<PathBuf>,

    /// Hostnames that always go straight to the browser strategy
    pub js_heavy_hosts: Vec<String>,

    /// Origins allowed by the CORS layer; empty disables it
    pub cors_origins: Vec<String>,

    /// Address the HTTP server binds to (default: 127.0.0.1:8000)
    pub bind_address: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Browser viewport used for rendering
    pub viewport: Viewport,

    /// User-Agent presented by the browser strategy
    pub user_agent: String,

    /// Accept-Language header sent by the browser strategy
    pub accept_language: String,

    /// Referer header sent by the browser strategy
    pub referer: Option<String>,

    /// Number of scroll-to-bottom passes used to trigger lazy loading (default: 6)
    pub scroll_passes: usize,

    /// Pause after each scroll pass (default: 200ms)
    pub scroll_pause: Duration,

    /// Upper bound on browser processes running at once (default: CPU count)
    pub max_concurrent_renders: usize,

    /// Fall back to the browser when the HTTP response has an unsupported
    /// content type (default: true)
    pub fallback_on_unsupported_content: bool,

    /// Port for the Prometheus exporter; disabled when `None`
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_root: PathBuf::from("./data/snapshots"),
            snapshot_base_url: "http://localhost:8000/snapshots".to_string(),
            history_file: PathBuf::from("./data/history.jsonl"),
            request_timeout: Duration::from_secs(20),
            browser_timeout: Duration::from_secs(45),
            headless: Some(true),
            session_dir: Some(PathBuf::from("./data/sessions")),
            js_heavy_hosts: vec!["mp.weixin.qq.com".to_string()],
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            bind_address: "127.0.0.1:8000".to_string(),
            chrome_path: None,
            viewport: Viewport::default(),
            user_agent: MOBILE_USER_AGENT.to_string(),
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
            referer: Some("https://mp.weixin.qq.com/".to_string()),
            scroll_passes: 6,
            scroll_pause: Duration::from_millis(200),
            max_concurrent_renders: num_cpus::get().max(1),
            fallback_on_unsupported_content: true,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load a configuration file (JSON). Missing fields take their defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than 0".into(),
            ));
        }

        if self.browser_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "browser timeout must be greater than 0".into(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ConfigError::Invalid(
                "viewport dimensions must be greater than 0".into(),
            ));
        }

        if self.max_concurrent_renders == 0 {
            return Err(ConfigError::Invalid(
                "max concurrent renders must be greater than 0".into(),
            ));
        }

        if self.snapshot_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("snapshot base URL is empty".into()));
        }

        url::Url::parse(&self.snapshot_base_url)
            .map_err(|e| ConfigError::Invalid(format!("snapshot base URL: {e}")))?;

        Ok(())
    }

    /// Lower-cased host set used by the strategy policy.
    pub fn js_heavy_host_set(&self) -> HashSet<String> {
        self.js_heavy_hosts
            .iter()
            .map(|host| host.trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect()
    }

    pub fn is_js_heavy_host(&self, host: &str) -> bool {
        self.js_heavy_host_set().contains(&host.to_ascii_lowercase())
    }

    /// Resolve the effective headless flag, consulting the environment when
    /// the config leaves it open.
    pub fn resolve_headless(&self) -> bool {
        match self.headless {
            Some(value) => value,
            None => headless_from_env(std::env::var(HEADLESS_ENV_VAR).ok().as_deref()),
        }
    }
}

fn headless_from_env(value: Option<&str>) -> bool {
    let value = value.unwrap_or("1").trim().to_ascii_lowercase();
    !matches!(value.as_str(), "0" | "false" | "no")
}

/// Browser viewport configuration
///
/// The default emulates a phone-sized screen, which is what the JS-heavy hosts
/// serve their full article markup to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 414)
    pub width: u32,

    /// Viewport height in pixels (default: 896)
    pub height: u32,

    /// Device pixel ratio (default: 2.0)
    pub device_scale_factor: f64,

    /// Whether to emulate a mobile device (default: true)
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 414,
            height: 896,
            device_scale_factor: 2.0,
            mobile: true,
        }
    }
}

/// Generate Chrome command-line arguments for one isolated render
///
/// Each render gets its own user-data directory so concurrent browser
/// processes never share profile state.
///
/// # Examples
///
/// ```rust
/// use page_snapshot::{Config, get_chrome_args};
///
/// let config = Config::default();
/// let args = get_chrome_args(&config, std::path::Path::new("/tmp/profile"));
/// assert!(args.contains(&"--no-sandbox".to_string()));
/// ```
pub fn get_chrome_args(config: &Config, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--disable-features=ProcessSingleton".to_string(),
        format!("--lang={}", primary_language(&config.accept_language)),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--user-data-dir={}", user_data_dir.display()),
    ];

    if config.resolve_headless() {
        args.push("--headless=new".to_string());
    }

    args
}

fn primary_language(accept_language: &str) -> &str {
    accept_language
        .split(',')
        .next()
        .map(|lang| lang.split(';').next().unwrap_or(lang).trim())
        .filter(|lang| !lang.is_empty())
        .unwrap_or("en-US")
}

pub fn create_browser_config(
    config: &Config,
    user_data_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, String> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .user_data_dir(user_data_dir)
        .request_timeout(config.browser_timeout)
        .args(get_chrome_args(config, user_data_dir));

    // chromiumoxide adds its own headless flag unless told to run with a head;
    // the args above already carry the right mode.
    builder = builder.with_head();

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build()
}
