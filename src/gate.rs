//! Access gate.
//!
//! Decides what a resolved device may see. Checks run in a fixed order and
//! the first match wins:
//!
//! 1. no device could be resolved: [`DenialKind::DeviceNotFound`]
//! 2. auth gating on and the device has no usable secret: [`DenialKind::Unauthenticated`]
//! 3. approval gating on and the device is pending: [`DenialKind::PendingApproval`]
//! 4. approval gating on and the device is disapproved: [`DenialKind::Disapproved`]
//! 5. otherwise resolve playlist, rotation and config
//! 6. no playlist or no entry: [`DenialKind::PlaylistNotFound`]
//! 7. entry names an unregistered screen: [`DenialKind::ScreenNotFound`]
//!
//! The gate only classifies. Logging a denial and rendering its fallback
//! screen is left to the caller.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::config::{self, ConfigMap};
use crate::device;
use crate::error::Error;
use crate::model::{Device, DeviceStatus, Playlist, PlaylistEntry, SecretStatus};
use crate::request::DeviceRequest;
use crate::rotation;
use crate::screen::{ScreenRegistry, ScreenType, APPROVAL_CODE_SCREEN, ERROR_SCREEN};
use crate::settings::Settings;
use crate::store::Store;

/// Short identifier tying a logged incident to the screen a device shows.
///
/// Formatted as two groups of four hex digits, e.g. `3f2a-9c01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", &hex[..4], &hex[4..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a device is not shown its scheduled content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialKind {
    DeviceNotFound,
    Unauthenticated,
    PendingApproval,
    Disapproved,
    PlaylistNotFound,
    ScreenNotFound,
    /// Store, network or renderer failure
    Infrastructure,
}

impl DenialKind {
    pub fn title(self) -> &'static str {
        match self {
            DenialKind::DeviceNotFound => "Display Not Found",
            DenialKind::Unauthenticated => "Unauthenticated",
            DenialKind::PendingApproval => "Pending Approval",
            DenialKind::Disapproved => "Display Disapproved",
            DenialKind::PlaylistNotFound => "Playlist Not Found",
            DenialKind::ScreenNotFound => "Screen Not Found",
            DenialKind::Infrastructure => "Internal Error",
        }
    }

    /// System screen shown in place of content.
    pub fn fallback_screen(self) -> &'static str {
        match self {
            DenialKind::PendingApproval => APPROVAL_CODE_SCREEN,
            _ => ERROR_SCREEN,
        }
    }

    /// A pending device is just waiting, everything else is a fault.
    pub fn is_logged(self) -> bool {
        !matches!(self, DenialKind::PendingApproval)
    }
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A non-authorized gate outcome with whatever context was known.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message} [{id}]")]
pub struct Denial {
    pub kind: DenialKind,
    pub id: CorrelationId,
    pub message: String,
    pub device: Option<Device>,
    pub playlist_id: Option<i64>,
    pub entry_id: Option<i64>,
    pub screen_key: Option<String>,
}

impl Denial {
    /// New denial with a fresh correlation id.
    pub fn new(kind: DenialKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            id: CorrelationId::new(),
            message: message.into(),
            device: None,
            playlist_id: None,
            entry_id: None,
            screen_key: None,
        }
    }

    /// Infrastructure failure, optionally attributed to a device.
    pub fn infrastructure(err: &Error, device: Option<&Device>) -> Self {
        let mut denial = Self::new(DenialKind::Infrastructure, err.to_string());
        denial.device = device.cloned();
        denial
    }

    /// Re-classify `other` as `kind`, keeping its correlation id and context.
    pub fn wrap(kind: DenialKind, other: Denial) -> Self {
        Self { kind, ..other }
    }

    #[must_use]
    pub fn with_device(mut self, device: &Device) -> Self {
        self.device = Some(device.clone());
        self
    }

    #[must_use]
    pub fn with_playlist(mut self, playlist_id: i64) -> Self {
        self.playlist_id = Some(playlist_id);
        self
    }

    #[must_use]
    pub fn with_entry(mut self, entry: &PlaylistEntry) -> Self {
        self.playlist_id = Some(entry.playlist_id);
        self.entry_id = Some(entry.id);
        self
    }

    #[must_use]
    pub fn with_screen(mut self, key: impl Into<String>) -> Self {
        self.screen_key = Some(key.into());
        self
    }

    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    pub fn fallback_screen(&self) -> &'static str {
        self.kind.fallback_screen()
    }

    /// Log once at error level, unless the kind is silent.
    pub fn log(&self) {
        if !self.kind.is_logged() {
            return;
        }
        tracing::error!(
            correlation_id = %self.id,
            kind = ?self.kind,
            device = self.device.as_ref().map(|d| d.id),
            playlist = self.playlist_id,
            entry = self.entry_id,
            screen = self.screen_key.as_deref(),
            "{}",
            self.message
        );
    }
}

/// What an authorized device is shown.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub device: Device,
    pub playlist: Playlist,
    pub entry: PlaylistEntry,
    pub screen: Arc<ScreenType>,
    pub config: ConfigMap,
}

/// Result of running the gate.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Authorized(Authorized),
    Denied(Denial),
}

impl GateOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GateOutcome::Authorized(_))
    }
}

/// Resolve the request's device and run every check.
///
/// `Err` is reserved for infrastructure failures; expected conditions come
/// back as [`GateOutcome::Denied`].
pub async fn evaluate<S>(
    store: &S,
    registry: &ScreenRegistry,
    settings: &Settings,
    request: &DeviceRequest,
) -> Result<GateOutcome, Error>
where
    S: Store + ?Sized,
{
    match device::load_device(store, settings, request).await? {
        Some(device) => authorize(store, registry, settings, &device, request).await,
        None => {
            let message = match (request.display_id, request.key.as_deref()) {
                (Some(id), _) => format!("No display with id {}", id),
                (None, Some(key)) => format!("No display with key {}", key),
                (None, None) => "Request did not identify a display".to_string(),
            };
            Ok(GateOutcome::Denied(Denial::new(
                DenialKind::DeviceNotFound,
                message,
            )))
        }
    }
}

/// Run checks 2 to 7 for an already resolved device.
pub async fn authorize<S>(
    store: &S,
    registry: &ScreenRegistry,
    settings: &Settings,
    device: &Device,
    request: &DeviceRequest,
) -> Result<GateOutcome, Error>
where
    S: Store + ?Sized,
{
    let deny = |kind: DenialKind, message: &str| -> Result<GateOutcome, Error> {
        Ok(GateOutcome::Denied(
            Denial::new(kind, message).with_device(device),
        ))
    };

    if settings.enable_display_auth {
        let secret = match device.secret_id {
            Some(id) => store.find_secret(id).await?,
            None => None,
        };
        match secret {
            None => return deny(DenialKind::Unauthenticated, "Display has no access secret"),
            Some(s) if s.status == SecretStatus::Disabled => {
                return deny(
                    DenialKind::Unauthenticated,
                    &format!("Access secret {} is disabled", s.name),
                )
            }
            Some(_) => {}
        }
    }

    if settings.enable_display_approval {
        match device.status {
            DeviceStatus::Pending => {
                return deny(DenialKind::PendingApproval, "Display is waiting for approval")
            }
            DeviceStatus::Disapproved => {
                return deny(DenialKind::Disapproved, "Display was disapproved")
            }
            DeviceStatus::Active => {}
        }
    }

    let entry = match select_entry(store, settings, device, request).await? {
        Ok(entry) => entry,
        Err(denial) => return Ok(GateOutcome::Denied(denial)),
    };

    let Some(playlist) = store.find_playlist(entry.playlist_id).await? else {
        return Ok(GateOutcome::Denied(
            Denial::new(DenialKind::PlaylistNotFound, "Playlist no longer exists")
                .with_device(device)
                .with_entry(&entry),
        ));
    };

    let Some(screen) = registry.get(&entry.screen_key) else {
        return Ok(GateOutcome::Denied(
            Denial::new(
                DenialKind::ScreenNotFound,
                format!("Screen {} is not registered", entry.screen_key),
            )
            .with_device(device)
            .with_entry(&entry)
            .with_screen(entry.screen_key.clone()),
        ));
    };

    let config = config::resolve(store, &screen, Some(&entry)).await?;

    Ok(GateOutcome::Authorized(Authorized {
        device: device.clone(),
        playlist,
        entry,
        screen,
        config,
    }))
}

/// Pick the entry to show. Debug overrides preview content without touching
/// the rotation cursor.
async fn select_entry<S>(
    store: &S,
    settings: &Settings,
    device: &Device,
    request: &DeviceRequest,
) -> Result<Result<PlaylistEntry, Denial>, Error>
where
    S: Store + ?Sized,
{
    let not_found = |message: &str, playlist_id: Option<i64>| {
        let denial = Denial::new(DenialKind::PlaylistNotFound, message).with_device(device);
        match playlist_id {
            Some(id) => denial.with_playlist(id),
            None => denial,
        }
    };

    if settings.debug {
        if let Some(entry_id) = request.entry_id {
            return Ok(match store.find_entry(entry_id).await? {
                Some(entry) => Ok(entry),
                None => Err(not_found(
                    &format!("Playlist entry {} does not exist", entry_id),
                    request.playlist_id,
                )),
            });
        }
        if let Some(playlist_id) = request.playlist_id {
            let entries = store.list_entries(playlist_id).await?;
            return Ok(match entries.into_iter().next() {
                Some(entry) => Ok(entry),
                None => Err(not_found("Playlist has no screens", Some(playlist_id))),
            });
        }
    }

    let Some(playlist_id) = device.playlist_id else {
        return Ok(Err(not_found("Display has no playlist", None)));
    };
    Ok(match rotation::next_entry(store, device).await? {
        Some(entry) => Ok(entry),
        None => Err(not_found("Playlist has no screens", Some(playlist_id))),
    })
}
