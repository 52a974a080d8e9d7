//! # fruitstand
//!
//! A render pipeline for networked signage displays.
//!
//! Displays poll the server and receive either an encoded bitmap (e-ink and
//! other static panels) or a raw HTML page (browser displays). For each
//! request the pipeline:
//!
//! 1. identifies the display and records what it reports about itself
//! 2. runs the access gate (secret, approval status, playlist, screen)
//! 3. advances the display's playlist rotation and resolves screen config
//! 4. renders the screen through an external headless browser process
//! 5. maps the bitmap onto the panel's color spec and encodes it
//!
//! Displays that are denied (unauthenticated, pending approval, ...) are
//! shown a system fallback screen instead of content, so every identified
//! display always gets something renderable back.
//!
//! ## Quick Start (axum)
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fruitstand::{
//!     axum_ext, HttpFetcher, MemoryStore, Orchestrator, ProcessRenderer, ScreenRegistry, Settings,
//! };
//!
//! let settings = Settings::from_env()?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(MemoryStore::new()),
//!     ScreenRegistry::with_builtin_screens(),
//!     settings.clone(),
//!     Arc::new(ProcessRenderer::new(settings.renderer.clone())),
//!     Arc::new(HttpFetcher::new(settings.renderer.timeout())?),
//! );
//! let app = axum_ext::router(Arc::new(orchestrator));
//! ```
//!
//! ## Device Request
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/display/render` | GET | Render for the display named by `k` |
//! | `/display/render/{display_id}` | GET | Render for a known display id |
//!
//! Query parameters are documented in [`request`]. The response carries
//! `Content-Type` and [`REFRESH_HEADER`] with the seconds until the display
//! should poll again.
//!
//! ## Color Specs
//!
//! | Key | Bits | Output |
//! |-----|------|--------|
//! | `1b` | 1 | Black/white, thresholded |
//! | `3b` | 3 | 8-color palette, dithered |
//! | `3b7` | 3 | 7-color palette, dithered |
//! | `16b` | 16 | RGB passthrough |
//! | `full` | 24 | RGB passthrough |
//!
//! ## Feature Flags
//!
//! - `axum` - Axum extractor and router
//! - `full` - All features

pub mod cache;
pub mod color;
pub mod config;
pub mod device;
mod error;
pub mod gate;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod request;
pub mod rotation;
pub mod screen;
pub mod settings;
pub mod store;

pub use cache::Cache;
pub use error::Error;
pub use gate::{Denial, DenialKind, GateOutcome};
pub use orchestrator::{Orchestrator, RenderResponse};
pub use render::{HttpFetcher, PageFetcher, ProcessRenderer, Renderer};
pub use request::DeviceRequest;
pub use screen::{ScreenRegistry, ScreenType};
pub use settings::Settings;
pub use store::{MemoryStore, Store};

/// Panel width assumed when a display does not report one
pub const DEFAULT_WIDTH: u32 = 800;

/// Panel height assumed when a display does not report one
pub const DEFAULT_HEIGHT: u32 = 480;

/// Largest panel edge accepted from a display, in pixels
pub const MAX_DIMENSION: u32 = 4096;

/// Refresh interval in seconds for fallback screens
pub const DEFAULT_REFRESH_INTERVAL: u32 = 600;

/// Response header announcing the refresh interval in seconds
pub const REFRESH_HEADER: &str = "X-Refresh-Interval";

#[cfg(feature = "axum")]
pub mod axum_ext;
