//! Device identity and capability sync.
//!
//! Devices are created lazily the first time they identify themselves. Every
//! request refreshes `last_seen_at` and the capabilities the device reports
//! (display class, color spec, geometry). Output format and bit depth are
//! taken from the request only when the device is created, so operator edits
//! to them stick.

use chrono::Utc;
use rand_core::{OsRng, RngCore};

use crate::error::Error;
use crate::model::{Device, DeviceReport, DeviceStatus};
use crate::request::DeviceRequest;
use crate::settings::Settings;
use crate::store::{DeviceStore, SecretStore};
use crate::{DEFAULT_HEIGHT, DEFAULT_WIDTH};

/// Number of digits in an approval code.
pub const APPROVAL_CODE_DIGITS: usize = 6;

/// Color spec assumed for devices that do not report one.
pub const DEFAULT_COLOR_SPEC: &str = "1b";

/// Fresh numeric approval code, zero padded. Every code is equally likely.
///
/// ```
/// let code = fruitstand::device::generate_approval_code();
/// assert_eq!(code.len(), 6);
/// assert!(code.chars().all(|c| c.is_ascii_digit()));
/// ```
pub fn generate_approval_code() -> String {
    let modulus = 10u32.pow(APPROVAL_CODE_DIGITS as u32);
    // Draws at or above the last whole multiple of the modulus are rejected
    let zone = u32::MAX - u32::MAX % modulus;
    let value = loop {
        let draw = OsRng.next_u32();
        if draw < zone {
            break draw % modulus;
        }
    };
    format!("{:0width$}", value, width = APPROVAL_CODE_DIGITS)
}

/// Find or create the device named by the request key and record what it
/// reported. Returns `Ok(None)` when the request carries no key.
///
/// Only the reported columns are written to an existing device, in one
/// store call, so operator edits made meanwhile survive. A presented secret
/// key replaces the device's secret association (an unknown key clears
/// it); without one the association is left alone.
pub async fn sync_device<S>(
    store: &S,
    settings: &Settings,
    request: &DeviceRequest,
) -> Result<Option<Device>, Error>
where
    S: DeviceStore + SecretStore + ?Sized,
{
    let Some(key) = request.key.as_deref() else {
        return Ok(None);
    };
    let now = Utc::now();

    let secret_id = match request.secret.as_deref() {
        Some(secret) => Some(store.find_secret_by_key(secret).await?.map(|s| s.id)),
        None => None,
    };
    let report = DeviceReport {
        seen_at: now,
        display_class: request.display_class,
        color_spec: request.color_spec.clone(),
        width: request.width,
        height: request.height,
        secret_id,
    };

    let (status, approval_code) = if settings.enable_display_approval {
        (DeviceStatus::Pending, Some(generate_approval_code()))
    } else {
        (DeviceStatus::Active, None)
    };
    let fresh = Device {
        id: 0,
        key: key.to_string(),
        name: key.to_string(),
        status,
        approval_code,
        display_class: request.display_class.unwrap_or_default(),
        color_spec: request
            .color_spec
            .clone()
            .unwrap_or_else(|| DEFAULT_COLOR_SPEC.to_string()),
        image_format: request.image_format.unwrap_or_default(),
        bit_depth: request.bit_depth,
        width: request.width.unwrap_or(DEFAULT_WIDTH),
        height: request.height.unwrap_or(DEFAULT_HEIGHT),
        created_at: now,
        last_seen_at: now,
        playlist_id: None,
        cursor: None,
        secret_id: secret_id.flatten(),
    };

    let (device, created) = store.touch_device(&report, fresh).await?;
    if created {
        tracing::info!(key, status = ?device.status, "registered new device");
    }
    Ok(Some(device))
}

/// Resolve the device a request is about: an explicit id is looked up
/// as-is, otherwise the request key is synced. `Ok(None)` means neither
/// identified a device.
pub async fn load_device<S>(
    store: &S,
    settings: &Settings,
    request: &DeviceRequest,
) -> Result<Option<Device>, Error>
where
    S: DeviceStore + SecretStore + ?Sized,
{
    match request.display_id {
        Some(id) => store.find_device(id).await,
        None => sync_device(store, settings, request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DisplayClass, ImageFormat, SecretStatus};
    use crate::store::MemoryStore;

    fn approval_settings() -> Settings {
        Settings {
            enable_display_approval: true,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_creates_pending_with_code() {
        let store = MemoryStore::new();
        let req = DeviceRequest::new("dev-1").with_geometry(400, 300);
        let dev = sync_device(&store, &approval_settings(), &req)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dev.status, DeviceStatus::Pending);
        let code = dev.approval_code.unwrap();
        assert_eq!(code.len(), APPROVAL_CODE_DIGITS);
        assert_eq!((dev.width, dev.height), (400, 300));
        assert_eq!(dev.color_spec, DEFAULT_COLOR_SPEC);
    }

    #[tokio::test]
    async fn test_creates_active_without_approval_gate() {
        let store = MemoryStore::new();
        let dev = sync_device(&store, &Settings::default(), &DeviceRequest::new("d"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dev.status, DeviceStatus::Active);
        assert_eq!(dev.approval_code, None);
        assert_eq!((dev.width, dev.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }

    #[tokio::test]
    async fn test_resync_updates_capabilities_not_format() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let first = DeviceRequest::new("d")
            .with_image_format(ImageFormat::Bmp)
            .with_bit_depth(1)
            .with_color_spec("1b");
        let created = sync_device(&store, &settings, &first).await.unwrap().unwrap();

        let second = DeviceRequest::new("d")
            .with_image_format(ImageFormat::Jpeg)
            .with_bit_depth(24)
            .with_color_spec("full")
            .with_display_class(DisplayClass::Dynamic)
            .with_geometry(1024, 768);
        let synced = sync_device(&store, &settings, &second).await.unwrap().unwrap();

        assert_eq!(synced.id, created.id);
        assert_eq!(synced.image_format, ImageFormat::Bmp);
        assert_eq!(synced.bit_depth, Some(1));
        assert_eq!(synced.color_spec, "full");
        assert_eq!(synced.display_class, DisplayClass::Dynamic);
        assert_eq!((synced.width, synced.height), (1024, 768));
        assert!(synced.last_seen_at >= created.last_seen_at);
    }

    #[tokio::test]
    async fn test_resync_keeps_status_and_code() {
        let store = MemoryStore::new();
        let settings = approval_settings();
        let created = sync_device(&store, &settings, &DeviceRequest::new("d"))
            .await
            .unwrap()
            .unwrap();
        let again = sync_device(&store, &settings, &DeviceRequest::new("d"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.status, DeviceStatus::Pending);
        assert_eq!(again.approval_code, created.approval_code);
    }

    #[tokio::test]
    async fn test_secret_association() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let secret = store
            .add_secret("lobby", "s3cret", SecretStatus::Active)
            .unwrap();

        let dev = sync_device(&store, &settings, &DeviceRequest::new("d").with_secret("s3cret"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dev.secret_id, Some(secret.id));

        let dev = sync_device(&store, &settings, &DeviceRequest::new("d"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dev.secret_id, Some(secret.id));

        let dev = sync_device(&store, &settings, &DeviceRequest::new("d").with_secret("nope"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dev.secret_id, None);
    }

    /// Applies an operator edit right after every read, before sync writes.
    struct EditingStore {
        inner: MemoryStore,
        edit: fn(&MemoryStore),
    }

    #[async_trait::async_trait]
    impl DeviceStore for EditingStore {
        async fn find_device(&self, id: i64) -> Result<Option<Device>, Error> {
            let found = self.inner.find_device(id).await;
            (self.edit)(&self.inner);
            found
        }

        async fn find_device_by_key(&self, key: &str) -> Result<Option<Device>, Error> {
            let found = self.inner.find_device_by_key(key).await;
            (self.edit)(&self.inner);
            found
        }

        async fn upsert_device(&self, device: Device) -> Result<Device, Error> {
            self.inner.upsert_device(device).await
        }

        async fn touch_device(
            &self,
            report: &DeviceReport,
            fresh: Device,
        ) -> Result<(Device, bool), Error> {
            self.inner.touch_device(report, fresh).await
        }
    }

    #[async_trait::async_trait]
    impl SecretStore for EditingStore {
        async fn find_secret(&self, id: i64) -> Result<Option<crate::model::AccessSecret>, Error> {
            let found = self.inner.find_secret(id).await;
            (self.edit)(&self.inner);
            found
        }

        async fn find_secret_by_key(
            &self,
            key: &str,
        ) -> Result<Option<crate::model::AccessSecret>, Error> {
            let found = self.inner.find_secret_by_key(key).await;
            (self.edit)(&self.inner);
            found
        }
    }

    #[tokio::test]
    async fn test_sync_keeps_concurrent_operator_edits() {
        let settings = approval_settings();
        let store = EditingStore {
            inner: MemoryStore::new(),
            edit: |inner| {
                inner.approve_device("d").unwrap();
                inner
                    .edit_device("d", |d| {
                        d.name = "Lobby".to_string();
                        d.playlist_id = Some(5);
                        d.image_format = ImageFormat::Bmp;
                    })
                    .unwrap();
            },
        };
        let created = sync_device(&store.inner, &settings, &DeviceRequest::new("d"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.status, DeviceStatus::Pending);

        let request = DeviceRequest::new("d")
            .with_secret("unknown")
            .with_geometry(640, 384);
        let synced = sync_device(&store, &settings, &request)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(synced.status, DeviceStatus::Active);
        assert_eq!(synced.approval_code, None);
        assert_eq!(synced.name, "Lobby");
        assert_eq!(synced.playlist_id, Some(5));
        assert_eq!(synced.image_format, ImageFormat::Bmp);
        assert_eq!((synced.width, synced.height), (640, 384));
        let stored = store.inner.find_device_by_key("d").await.unwrap().unwrap();
        assert_eq!(stored, synced);
    }

    #[test]
    fn test_approval_codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..20).map(|_| generate_approval_code()).collect();
        assert!(codes.len() > 1);
        assert!(codes.iter().all(|c| c.len() == APPROVAL_CODE_DIGITS));
    }

    #[tokio::test]
    async fn test_load_device() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        assert!(load_device(&store, &settings, &DeviceRequest::default())
            .await
            .unwrap()
            .is_none());

        let created = load_device(&store, &settings, &DeviceRequest::new("d"))
            .await
            .unwrap()
            .unwrap();
        let by_id = load_device(
            &store,
            &settings,
            &DeviceRequest::default().with_display_id(created.id),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(by_id.key, "d");

        let missing = DeviceRequest::default().with_display_id(created.id + 100);
        assert!(load_device(&store, &settings, &missing)
            .await
            .unwrap()
            .is_none());
    }
}
