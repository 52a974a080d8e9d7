//! External page rendering.
//!
//! Static and dynamic displays receive a bitmap produced by an external
//! renderer process (a headless browser driver such as `render.js`). The
//! process is invoked as
//!
//! ```text
//! <command> <args...> --url <url> --width <w> --height <h> --path <out> [--browser <name>]
//! ```
//!
//! and must write a raster image to `<out>` before exiting. It is killed
//! when it exceeds the configured time budget.
//!
//! Browser-class displays receive the page itself, fetched over HTTP.
//!
//! # Example
//!
//! ```rust,ignore
//! use fruitstand::render::{ProcessRenderer, Renderer};
//! use fruitstand::settings::RendererSettings;
//!
//! let renderer = ProcessRenderer::new(RendererSettings::default());
//! let png = renderer.render("http://127.0.0.1:5000/screens/render/quote", 800, 480).await?;
//! ```

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::Error;
use crate::settings::RendererSettings;

/// Content type assumed when a fetched page does not declare one.
pub const DEFAULT_PAGE_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Turns a screen URL into raster image bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, width: u32, height: u32) -> Result<Vec<u8>, Error>;
}

/// Runs the configured renderer command once per render.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    settings: RendererSettings,
}

impl ProcessRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Render options appended after the configured arguments.
    pub fn render_args(&self, url: &str, width: u32, height: u32, path: &Path) -> Vec<String> {
        let mut args = vec![
            "--url".to_string(),
            url.to_string(),
            "--width".to_string(),
            width.to_string(),
            "--height".to_string(),
            height.to_string(),
            "--path".to_string(),
            path.display().to_string(),
        ];
        if let Some(browser) = &self.settings.browser {
            args.push("--browser".to_string());
            args.push(browser.clone());
        }
        args
    }
}

#[async_trait]
impl Renderer for ProcessRenderer {
    async fn render(&self, url: &str, width: u32, height: u32) -> Result<Vec<u8>, Error> {
        tokio::fs::create_dir_all(&self.settings.temp_dir)
            .await
            .map_err(|e| Error::Io(format!("Failed to create render dir: {}", e)))?;

        let path = self
            .settings
            .temp_dir
            .join(format!("{}.png", Uuid::new_v4().simple()));

        let child = Command::new(&self.settings.command)
            .args(&self.settings.args)
            .args(self.render_args(url, width, height, &path))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let timeout = self.settings.timeout();
        let output = match tokio::time::timeout(timeout, child).await {
            Ok(result) => {
                result.map_err(|e| Error::Render(format!("Failed to run renderer: {}", e)))?
            }
            Err(_) => {
                // Dropping the future killed the process
                let _ = tokio::fs::remove_file(&path).await;
                return Err(Error::RenderTimeout {
                    secs: timeout.as_secs(),
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::warn!("Renderer stderr: {}", stderr.trim());
        }
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(Error::Render(format!("Renderer exited with {}", output.status)));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Render(format!("Renderer produced no image: {}", e)))?;
        let _ = tokio::fs::remove_file(&path).await;

        tracing::debug!(url, width, height, bytes = bytes.len(), "rendered page");
        Ok(bytes)
    }
}

/// A page returned unchanged to a browser-class display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Fetches a screen URL's raw bytes.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, Error>;
}

/// [`PageFetcher`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_PAGE_CONTENT_TYPE)
            .to_string();
        let body = response.bytes().await?.to_vec();
        Ok(FetchedPage { body, content_type })
    }
}
