//! Persistent entities read and written by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Waiting for an operator to enter its approval code
    Pending,
    /// Approved and rendering its playlist
    Active,
    /// Rejected by an operator
    Disapproved,
}

impl DeviceStatus {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            DeviceStatus::Pending => "Pending Approval",
            DeviceStatus::Active => "Active",
            DeviceStatus::Disapproved => "Disapproved",
        }
    }
}

/// What kind of output a display can show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayClass {
    /// Static displays, like e-ink, that cannot show animation
    #[default]
    Static,
    /// Displays like LCDs that can show an animation
    Dynamic,
    /// Displays that render HTML and CSS themselves
    Browser,
}

impl DisplayClass {
    /// Parse the `ds` request parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "static" => Some(DisplayClass::Static),
            "dynamic" => Some(DisplayClass::Dynamic),
            "browser" => Some(DisplayClass::Browser),
            _ => None,
        }
    }
}

/// Container format of the encoded image sent to a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Bmp,
    Jpeg,
    #[default]
    Png,
}

impl ImageFormat {
    /// Parse the `fmt` request parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "bmp" => Some(ImageFormat::Bmp),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            _ => None,
        }
    }

    /// MIME type for the `Content-Type` header.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// One physical signage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    /// Self-reported stable identity (unique)
    pub key: String,
    pub name: String,
    pub status: DeviceStatus,
    /// One-time code shown on screen while `pending`
    pub approval_code: Option<String>,
    pub display_class: DisplayClass,
    /// Key into the color spec table (e.g. `1b`, `3b7`, `full`)
    pub color_spec: String,
    pub image_format: ImageFormat,
    /// Operator override for the output bit depth
    pub bit_depth: Option<u8>,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub playlist_id: Option<i64>,
    /// Last shown playlist entry; may be stale
    pub cursor: Option<i64>,
    pub secret_id: Option<i64>,
}

/// The columns a device check-in may write. Everything else on the row
/// belongs to operators.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub seen_at: DateTime<Utc>,
    pub display_class: Option<DisplayClass>,
    pub color_spec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// `Some` replaces the secret association, `None` leaves it alone
    pub secret_id: Option<Option<i64>>,
}

impl DeviceReport {
    /// Write the reported columns onto an existing row.
    pub fn apply(&self, device: &mut Device) {
        device.last_seen_at = self.seen_at;
        if let Some(class) = self.display_class {
            device.display_class = class;
        }
        if let Some(spec) = &self.color_spec {
            device.color_spec = spec.clone();
        }
        if let Some(width) = self.width {
            device.width = width;
        }
        if let Some(height) = self.height {
            device.height = height;
        }
        if let Some(secret_id) = self.secret_id {
            device.secret_id = secret_id;
        }
    }
}

/// Status of an access secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStatus {
    Active,
    Disabled,
}

/// Shared credential a device may present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessSecret {
    pub id: i64,
    pub name: String,
    /// Value devices send in the `s` parameter
    pub key: String,
    pub status: SecretStatus,
}

/// Named, ordered rotation of screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Seconds between refreshes when an entry does not override it
    pub default_refresh_interval: u32,
}

/// One placement of a screen type within a playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: i64,
    pub playlist_id: i64,
    pub screen_key: String,
    /// Relative position; gaps are allowed
    pub order: i32,
    pub refresh_interval: Option<u32>,
}

/// Where a stored config value applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    /// Every placement of this screen type
    Screen(String),
    /// One playlist entry only
    Entry(i64),
}

/// A persisted config override. The value is stored as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub scope: ConfigScope,
    pub key: String,
    pub value_serialized: String,
}

/// A store-backed cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub expires_at: DateTime<Utc>,
    pub payload: String,
}
