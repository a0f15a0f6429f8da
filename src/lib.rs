//! # Page Snapshot
//!
//! Archives web pages as self-contained static HTML. Each capture fetches the
//! page, strips every `<script>`, anchors relative links to the original
//! origin with a `<base>` tag, prepends a provenance comment and stores the
//! result under a directory that the built-in HTTP server publishes. Every
//! attempt is recorded in an append-only JSON-lines history.
//!
//! ## Capture strategies
//!
//! | Strategy | Used when | Backed by |
//! |----------|-----------|-----------|
//! | **HTTP** | Default for every host | `reqwest`, redirects followed, HTML only |
//! | **Browser** | JS-heavy hosts, `force_browser`, or after an HTTP failure | Chromium via `chromiumoxide`, mobile emulation, lazy-load scrolling |
//!
//! A failed HTTP capture always falls back to the browser when one is
//! configured. If the browser fails too, its error is the one reported.
//!
//! ## Stored sessions
//!
//! Browser renders of `host` pick up `{session_dir}/{host}.json` when present.
//! The file uses the storage-state layout (cookies plus per-origin
//! localStorage) written by common browser automation tools.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_snapshot::{Config, SnapshotService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = SnapshotService::new(Arc::new(Config::default()))?;
//!     let snapshot = service.create_snapshot("https://example.com", false).await?;
//!     println!("Archived to {}", snapshot.archived_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Serve the API
//! ```bash
//! page-snapshot serve --bind 0.0.0.0:8000 --metrics-port 9100
//! ```
//!
//! ### Capture from the command line
//! ```bash
//! page-snapshot capture https://example.com --input urls.txt
//! page-snapshot history list --limit 20
//! ```

/// Configuration and settings for the snapshot service
pub mod config;

/// Error types
pub mod error;

/// HTML rewriting: script removal, base tag, provenance comment
pub mod sanitizer;

/// Append-only capture history
pub mod history;

/// The strategy capability and authentication state
pub mod renderer;

/// Direct HTTP strategy
pub mod http_fetcher;

/// Headless Chromium strategy
pub mod browser_renderer;

/// Strategy selection, fallback and artifact storage
pub mod snapshot_service;

/// Concurrent capture of URL lists
pub mod batch;

/// HTTP API
pub mod server;

/// Command-line interface implementation
pub mod cli;

/// Capture metrics and the Prometheus exporter
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use self::metrics::install_prometheus_exporter;
pub use batch::*;
pub use browser_renderer::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use history::*;
pub use http_fetcher::*;
pub use renderer::*;
pub use sanitizer::*;
pub use server::*;
pub use snapshot_service::*;
pub use utils::*;
