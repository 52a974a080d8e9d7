//! Render orchestration.
//!
//! One [`Orchestrator::handle`] call serves one device request end to end:
//! sync the device, run the access gate, build the screen URL, then either
//! pass the page through (browser displays) or render, convert and encode
//! a bitmap.
//!
//! Apart from an unidentifiable device, every request gets something the
//! device can show. Denials render their fallback screen. Failures after
//! the gate are logged and re-routed once to the error screen, and if that
//! fails too the device receives a blank image of its own geometry.

use std::sync::Arc;

use image::{Rgb, RgbImage};
use serde_json::{Map, Value};

use crate::cache::Cache;
use crate::color;
use crate::error::Error;
use crate::gate::{self, Denial, DenialKind, GateOutcome};
use crate::model::{Device, DisplayClass, ImageFormat, PlaylistEntry};
use crate::render::{PageFetcher, Renderer};
use crate::request::DeviceRequest;
use crate::screen::{ScreenRegistry, ScreenType};
use crate::settings::Settings;
use crate::store::Store;
use crate::{DEFAULT_HEIGHT, DEFAULT_REFRESH_INTERVAL, DEFAULT_WIDTH, MAX_DIMENSION};

/// Bytes to send back to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResponse {
    pub body: Vec<u8>,
    pub content_type: String,
    /// Seconds until the device should ask again
    pub refresh_interval: u32,
}

/// How to produce output for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    pub device_id: Option<i64>,
    pub display_class: DisplayClass,
    pub color_spec: String,
    pub image_format: ImageFormat,
    pub bit_depth: Option<u8>,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    pub fn from_device(device: &Device) -> Self {
        Self {
            device_id: Some(device.id),
            display_class: device.display_class,
            color_spec: device.color_spec.clone(),
            image_format: device.image_format,
            bit_depth: device.bit_depth,
            width: panel_edge(Some(device.width), DEFAULT_WIDTH),
            height: panel_edge(Some(device.height), DEFAULT_HEIGHT),
        }
    }

    /// Best guess when no device record is available.
    pub fn from_request(request: &DeviceRequest) -> Self {
        Self {
            device_id: request.display_id,
            display_class: request.display_class.unwrap_or_default(),
            color_spec: request
                .color_spec
                .clone()
                .unwrap_or_else(|| crate::device::DEFAULT_COLOR_SPEC.to_string()),
            image_format: request.image_format.unwrap_or_default(),
            bit_depth: request.bit_depth,
            width: panel_edge(request.width, DEFAULT_WIDTH),
            height: panel_edge(request.height, DEFAULT_HEIGHT),
        }
    }
}

/// Stored rows may predate request validation.
fn panel_edge(reported: Option<u32>, default: u32) -> u32 {
    match reported {
        Some(0) | None => default,
        Some(edge) => edge.min(MAX_DIMENSION),
    }
}

/// Serves device requests against a store, a screen registry and a renderer.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    registry: ScreenRegistry,
    settings: Settings,
    renderer: Arc<dyn Renderer>,
    fetcher: Arc<dyn PageFetcher>,
    cache: Cache,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ScreenRegistry,
        settings: Settings,
        renderer: Arc<dyn Renderer>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            renderer,
            fetcher,
            cache: Cache::disabled(),
        }
    }

    /// Cache shared with screen content handlers.
    #[must_use]
    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &ScreenRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Serve one device request.
    ///
    /// Only [`DenialKind::DeviceNotFound`] comes back as `Err`; there is no
    /// device to show a fallback screen on.
    pub async fn handle(&self, request: &DeviceRequest) -> Result<RenderResponse, Denial> {
        let outcome =
            match gate::evaluate(&*self.store, &self.registry, &self.settings, request).await {
                Ok(outcome) => outcome,
                Err(err) => GateOutcome::Denied(Denial::infrastructure(&err, None)),
            };

        let auth = match outcome {
            GateOutcome::Authorized(auth) => auth,
            GateOutcome::Denied(denial) if denial.kind == DenialKind::DeviceNotFound => {
                denial.log();
                return Err(denial);
            }
            GateOutcome::Denied(denial) => return Ok(self.fallback(request, denial).await),
        };

        let target = RenderTarget::from_device(&auth.device);
        let url = self.screen_url(&auth.screen, &target, Some(&auth.entry), request, None);
        match self.produce(&target, &url).await {
            Ok((body, content_type)) => {
                tracing::info!(
                    device = auth.device.id,
                    screen = %auth.screen.key,
                    entry = auth.entry.id,
                    bytes = body.len(),
                    "rendered display"
                );
                Ok(RenderResponse {
                    body,
                    content_type,
                    refresh_interval: auth
                        .entry
                        .refresh_interval
                        .unwrap_or(auth.playlist.default_refresh_interval),
                })
            }
            Err(err) => {
                let denial = Denial::infrastructure(&err, Some(&auth.device))
                    .with_entry(&auth.entry)
                    .with_screen(auth.screen.key.clone());
                Ok(self.fallback(request, denial).await)
            }
        }
    }

    /// Fully qualified URL of a screen's content endpoint for one device.
    ///
    /// Carries the device id, the entry id, request context and, for
    /// fallback screens, the denial being explained.
    pub fn screen_url(
        &self,
        screen: &ScreenType,
        target: &RenderTarget,
        entry: Option<&PlaylistEntry>,
        request: &DeviceRequest,
        denial: Option<&Denial>,
    ) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(id) = target.device_id {
            query.append_pair("display", &id.to_string());
        }
        if let Some(entry) = entry {
            query.append_pair("entry", &entry.id.to_string());
        }
        if !request.metrics.is_empty() {
            query.append_pair("metrics", &json_text(&request.metrics));
        }
        if !request.extra.is_empty() {
            query.append_pair("extra", &json_text(&request.extra));
        }
        if let Some(denial) = denial {
            query.append_pair("error_id", denial.id.as_str());
            query.append_pair("error_title", denial.title());
            query.append_pair("error_message", &denial.message);
            let code = denial.device.as_ref().and_then(|d| d.approval_code.as_deref());
            if let (DenialKind::PendingApproval, Some(code)) = (denial.kind, code) {
                query.append_pair("code", code);
            }
        }

        let query = query.finish();
        let base = self.settings.base_url.trim_end_matches('/');
        if query.is_empty() {
            format!("{}{}", base, screen.endpoint)
        } else {
            format!("{}{}?{}", base, screen.endpoint, query)
        }
    }

    /// Page bytes for browser displays, otherwise a converted bitmap.
    async fn produce(&self, target: &RenderTarget, url: &str) -> Result<(Vec<u8>, String), Error> {
        if target.display_class == DisplayClass::Browser {
            let page = self.fetcher.fetch(url).await?;
            return Ok((page.body, page.content_type));
        }

        let raw = self.renderer.render(url, target.width, target.height).await?;
        let rgb = color::decode(&raw)?;
        if rgb.dimensions() != (target.width, target.height) {
            tracing::warn!(
                expected = ?(target.width, target.height),
                actual = ?rgb.dimensions(),
                "renderer returned unexpected geometry"
            );
        }
        let converted = color::convert_colors(&rgb, &target.color_spec, target.bit_depth);
        let body = color::encode(converted, target.image_format)?;
        Ok((body, target.image_format.mime_type().to_string()))
    }

    /// Show the denial's fallback screen, or a blank image if that fails.
    ///
    /// The denial is logged once: as is when the fallback screen renders,
    /// otherwise wrapped with the fallback failure under the same id.
    async fn fallback(&self, request: &DeviceRequest, denial: Denial) -> RenderResponse {
        let target = match &denial.device {
            Some(device) => RenderTarget::from_device(device),
            None => RenderTarget::from_request(request),
        };

        let result = match self.registry.get(denial.fallback_screen()) {
            Some(screen) => {
                let url = self.screen_url(&screen, &target, None, request, Some(&denial));
                self.produce(&target, &url).await
            }
            None => Err(Error::Config(format!(
                "fallback screen {} is not registered",
                denial.fallback_screen()
            ))),
        };

        let (body, content_type) = match result {
            Ok(output) => {
                denial.log();
                output
            }
            Err(err) => {
                let mut failed = Denial::wrap(DenialKind::Infrastructure, denial);
                failed.message = format!("{}; fallback screen failed: {}", failed.message, err);
                failed.log();
                blank(&target)
            }
        };

        RenderResponse {
            body,
            content_type,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

fn json_text(map: &Map<String, Value>) -> String {
    Value::Object(map.clone()).to_string()
}

/// Minimal renderable output when nothing else worked.
fn blank(target: &RenderTarget) -> (Vec<u8>, String) {
    if target.display_class == DisplayClass::Browser {
        return (
            b"<!DOCTYPE html><html><body></body></html>".to_vec(),
            crate::render::DEFAULT_PAGE_CONTENT_TYPE.to_string(),
        );
    }
    let image = RgbImage::from_pixel(
        panel_edge(Some(target.width), DEFAULT_WIDTH),
        panel_edge(Some(target.height), DEFAULT_HEIGHT),
        Rgb([255, 255, 255]),
    );
    let converted = color::convert_colors(&image, &target.color_spec, target.bit_depth);
    match color::encode(converted, target.image_format) {
        Ok(body) => (body, target.image_format.mime_type().to_string()),
        Err(err) => {
            tracing::error!("Failed to encode blank image: {}", err);
            (Vec::new(), target.image_format.mime_type().to_string())
        }
    }
}
