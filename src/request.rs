//! Device request parameters.
//!
//! Devices identify themselves and report their capabilities in the query
//! string of the render request:
//!
//! | Parameter | Meaning |
//! |-----------|---------|
//! | `k` | Stable device key (required unless the path names a device) |
//! | `ds` | Display class: `static`, `dynamic`, `browser` |
//! | `cs` | Color spec key: `1b`, `3b`, `3b7`, `16b`, `full` |
//! | `w`, `h` | Panel geometry in pixels, `1..=4096` |
//! | `fmt` | Output format: `png`, `bmp`, `jpeg` (used at creation only) |
//! | `bits` | Output bit depth override (used at creation only) |
//! | `s` | Access secret key |
//! | `metrics` | JSON object of extra sensor readings |
//! | `extra` | JSON object of free-form context |
//! | `playlist`, `entry` | Preview overrides, honored in debug mode only |
//!
//! Raw sensor parameters (`batt`, `wifi_dbm`, ...) are folded into
//! `metrics`; see [`crate::metrics`].
//!
//! # Example
//!
//! ```
//! use fruitstand::DeviceRequest;
//!
//! let req = DeviceRequest::from_query_string("k=lobby&cs=3b7&w=800&h=480&batt=4.2");
//! assert_eq!(req.key.as_deref(), Some("lobby"));
//! assert_eq!(req.width, Some(800));
//! assert_eq!(req.metrics["batt"]["p"], 1.0);
//! ```

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::metrics;
use crate::model::{DisplayClass, ImageFormat};
use crate::MAX_DIMENSION;

/// Everything a device told us about itself in one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRequest {
    /// Self-reported stable key (`k`)
    pub key: Option<String>,
    /// Explicit device id from the request path
    pub display_id: Option<i64>,
    pub display_class: Option<DisplayClass>,
    pub color_spec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub image_format: Option<ImageFormat>,
    pub bit_depth: Option<u8>,
    /// Access secret key (`s`)
    pub secret: Option<String>,
    /// Sensor readings passed through to the screen
    pub metrics: Map<String, Value>,
    /// Free-form context passed through to the screen
    pub extra: Map<String, Value>,
    /// Preview override: playlist id
    pub playlist_id: Option<i64>,
    /// Preview override: playlist entry id
    pub entry_id: Option<i64>,
}

impl DeviceRequest {
    /// Create a request for a device key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Set panel geometry.
    #[must_use]
    pub fn with_geometry(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set display class.
    #[must_use]
    pub fn with_display_class(mut self, class: DisplayClass) -> Self {
        self.display_class = Some(class);
        self
    }

    /// Set color spec key.
    #[must_use]
    pub fn with_color_spec(mut self, spec: impl Into<String>) -> Self {
        self.color_spec = Some(spec.into());
        self
    }

    /// Set output image format.
    #[must_use]
    pub fn with_image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = Some(format);
        self
    }

    /// Set output bit depth.
    #[must_use]
    pub fn with_bit_depth(mut self, bits: u8) -> Self {
        self.bit_depth = Some(bits);
        self
    }

    /// Set access secret key.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set explicit device id.
    #[must_use]
    pub fn with_display_id(mut self, id: i64) -> Self {
        self.display_id = Some(id);
        self
    }

    /// Set preview overrides.
    #[must_use]
    pub fn with_preview(mut self, playlist_id: Option<i64>, entry_id: Option<i64>) -> Self {
        self.playlist_id = playlist_id;
        self.entry_id = entry_id;
        self
    }

    /// Parse a request from a raw query string.
    pub fn from_query_string(query: &str) -> Self {
        let params: HashMap<String, String> = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self::from_params(&params)
    }

    /// Build a request from decoded query parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let text = |name: &str| {
            params
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        // Zero or oversized panels are treated as unreported
        let dimension = |name: &str| {
            params
                .get(name)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| (1..=MAX_DIMENSION).contains(v))
        };

        let mut metrics = metrics::collect(params);
        for (k, v) in json_object(params.get("metrics")) {
            metrics.insert(k, v);
        }

        Self {
            key: text("k"),
            display_id: params.get("display").and_then(|v| v.trim().parse().ok()),
            display_class: params.get("ds").and_then(|v| DisplayClass::parse(v)),
            color_spec: text("cs"),
            width: dimension("w"),
            height: dimension("h"),
            image_format: params.get("fmt").and_then(|v| ImageFormat::parse(v)),
            bit_depth: params.get("bits").and_then(|v| v.trim().parse().ok()),
            secret: text("s"),
            metrics,
            extra: json_object(params.get("extra")),
            playlist_id: params.get("playlist").and_then(|v| v.trim().parse().ok()),
            entry_id: params.get("entry").and_then(|v| v.trim().parse().ok()),
        }
    }
}

/// Decode a JSON object parameter; anything else is an empty map.
fn json_object(raw: Option<&String>) -> Map<String, Value> {
    match raw.map(|r| serde_json::from_str::<Value>(r)) {
        Some(Ok(Value::Object(map))) => map,
        Some(Ok(_)) | Some(Err(_)) => {
            tracing::debug!("ignoring malformed JSON context parameter");
            Map::new()
        }
        None => Map::new(),
    }
}
