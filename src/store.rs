//! Persistent store interfaces.
//!
//! The pipeline treats the store as a transactional row store. Each trait
//! covers one entity family; [`Store`] bundles them so a single backend can
//! be passed around as `Arc<dyn Store>`.
//!
//! [`MemoryStore`] is a complete implementation backed by `RwLock`ed maps,
//! used by tests, demos and single-node deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Error;
use crate::model::{
    AccessSecret, CacheRecord, ConfigEntry, ConfigScope, Device, DeviceReport, DeviceStatus,
    Playlist, PlaylistEntry,
};

/// Device rows.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_device(&self, id: i64) -> Result<Option<Device>, Error>;

    async fn find_device_by_key(&self, key: &str) -> Result<Option<Device>, Error>;

    /// Insert or replace the device with the same key. A new device gets a
    /// fresh id; an existing one keeps its id and its rotation cursor, which
    /// only [`PlaylistStore::swap_cursor`] writes.
    async fn upsert_device(&self, device: Device) -> Result<Device, Error>;

    /// Record a device check-in in one atomic write. If a device with
    /// `fresh.key` exists only the reported columns change; otherwise
    /// `fresh` is inserted under a new id. The flag is `true` on insert.
    async fn touch_device(
        &self,
        report: &DeviceReport,
        fresh: Device,
    ) -> Result<(Device, bool), Error>;
}

/// Access secret rows.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn find_secret(&self, id: i64) -> Result<Option<AccessSecret>, Error>;

    async fn find_secret_by_key(&self, key: &str) -> Result<Option<AccessSecret>, Error>;
}

/// Playlists, their entries, and the per-device rotation cursor.
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    async fn find_playlist(&self, id: i64) -> Result<Option<Playlist>, Error>;

    async fn find_entry(&self, id: i64) -> Result<Option<PlaylistEntry>, Error>;

    /// All entries of a playlist ordered by `(order, id)` ascending.
    async fn list_entries(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>, Error>;

    /// Atomically set the device cursor to `new` if it currently equals
    /// `expected`. Returns `false` when another writer got there first.
    async fn swap_cursor(
        &self,
        device_id: i64,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, Error>;
}

/// Screen-scoped and entry-scoped config overrides.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_config(&self, scope: &ConfigScope) -> Result<Vec<ConfigEntry>, Error>;

    /// Insert or replace the value for `(scope, key)`.
    async fn save_config(&self, entry: ConfigEntry) -> Result<(), Error>;
}

/// Rows behind the store-backed cache driver.
#[async_trait]
pub trait CacheRecordStore: Send + Sync {
    async fn get_cache_record(&self, key: &str) -> Result<Option<CacheRecord>, Error>;

    async fn put_cache_record(&self, record: CacheRecord) -> Result<(), Error>;

    async fn delete_cache_record(&self, key: &str) -> Result<bool, Error>;
}

/// Everything the pipeline needs from persistence.
pub trait Store: DeviceStore + SecretStore + PlaylistStore + ConfigStore + CacheRecordStore {}

impl<T> Store for T where
    T: DeviceStore + SecretStore + PlaylistStore + ConfigStore + CacheRecordStore
{
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    devices: HashMap<i64, Device>,
    secrets: HashMap<i64, AccessSecret>,
    playlists: HashMap<i64, Playlist>,
    entries: HashMap<i64, PlaylistEntry>,
    config: HashMap<(ConfigScope, String), String>,
    cache: HashMap<String, CacheRecord>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store.
///
/// Uses a single `RwLock` over all tables, so every write is atomic with
/// respect to every other operation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

fn poisoned<T>(_: T) -> Error {
    Error::store("lock poisoned")
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a playlist and return it with its assigned id.
    pub fn add_playlist(
        &self,
        name: impl Into<String>,
        default_refresh_interval: u32,
    ) -> Result<Playlist, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let playlist = Playlist {
            id: tables.allocate_id(),
            name: name.into(),
            description: None,
            default_refresh_interval,
        };
        tables.playlists.insert(playlist.id, playlist.clone());
        Ok(playlist)
    }

    /// Append a screen to a playlist at the given order key.
    pub fn add_entry(
        &self,
        playlist_id: i64,
        screen_key: impl Into<String>,
        order: i32,
        refresh_interval: Option<u32>,
    ) -> Result<PlaylistEntry, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if !tables.playlists.contains_key(&playlist_id) {
            return Err(Error::store(format!("playlist {} does not exist", playlist_id)));
        }
        let entry = PlaylistEntry {
            id: tables.allocate_id(),
            playlist_id,
            screen_key: screen_key.into(),
            order,
            refresh_interval,
        };
        tables.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Delete a playlist entry. Device cursors pointing at it become stale.
    pub fn remove_entry(&self, entry_id: i64) -> Result<bool, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.config.retain(|(scope, _), _| scope != &ConfigScope::Entry(entry_id));
        Ok(tables.entries.remove(&entry_id).is_some())
    }

    /// Register an access secret.
    pub fn add_secret(
        &self,
        name: impl Into<String>,
        key: impl Into<String>,
        status: crate::model::SecretStatus,
    ) -> Result<AccessSecret, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let secret = AccessSecret {
            id: tables.allocate_id(),
            name: name.into(),
            key: key.into(),
            status,
        };
        tables.secrets.insert(secret.id, secret.clone());
        Ok(secret)
    }

    /// Apply an administrative edit to a device by key.
    pub fn edit_device<F>(&self, key: &str, edit: F) -> Result<Option<Device>, Error>
    where
        F: FnOnce(&mut Device),
    {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let device = tables.devices.values_mut().find(|d| d.key == key);
        Ok(device.map(|device| {
            edit(device);
            device.clone()
        }))
    }

    /// Assign a playlist to every device that has none. Returns how many
    /// devices changed.
    pub fn assign_unassigned(&self, playlist_id: i64) -> Result<usize, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if !tables.playlists.contains_key(&playlist_id) {
            return Err(Error::store(format!("playlist {} does not exist", playlist_id)));
        }
        let mut changed = 0;
        for device in tables.devices.values_mut().filter(|d| d.playlist_id.is_none()) {
            device.playlist_id = Some(playlist_id);
            device.cursor = None;
            changed += 1;
        }
        Ok(changed)
    }

    /// Approve a pending device; clears its approval code.
    pub fn approve_device(&self, key: &str) -> Result<Option<Device>, Error> {
        self.edit_device(key, |device| {
            device.status = DeviceStatus::Active;
            device.approval_code = None;
        })
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn find_device(&self, id: i64) -> Result<Option<Device>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.devices.get(&id).cloned())
    }

    async fn find_device_by_key(&self, key: &str) -> Result<Option<Device>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.devices.values().find(|d| d.key == key).cloned())
    }

    async fn upsert_device(&self, mut device: Device) -> Result<Device, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let existing = tables
            .devices
            .values()
            .find(|d| d.key == device.key)
            .map(|d| (d.id, d.cursor));
        match existing {
            Some((id, cursor)) => {
                device.id = id;
                device.cursor = cursor;
            }
            None => device.id = tables.allocate_id(),
        }
        tables.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn touch_device(
        &self,
        report: &DeviceReport,
        fresh: Device,
    ) -> Result<(Device, bool), Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if let Some(device) = tables.devices.values_mut().find(|d| d.key == fresh.key) {
            report.apply(device);
            return Ok((device.clone(), false));
        }
        let mut device = fresh;
        device.id = tables.allocate_id();
        tables.devices.insert(device.id, device.clone());
        Ok((device, true))
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn find_secret(&self, id: i64) -> Result<Option<AccessSecret>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.secrets.get(&id).cloned())
    }

    async fn find_secret_by_key(&self, key: &str) -> Result<Option<AccessSecret>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.secrets.values().find(|s| s.key == key).cloned())
    }
}

#[async_trait]
impl PlaylistStore for MemoryStore {
    async fn find_playlist(&self, id: i64) -> Result<Option<Playlist>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.playlists.get(&id).cloned())
    }

    async fn find_entry(&self, id: i64) -> Result<Option<PlaylistEntry>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.entries.get(&id).cloned())
    }

    async fn list_entries(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut entries: Vec<PlaylistEntry> = tables
            .entries
            .values()
            .filter(|e| e.playlist_id == playlist_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.order, e.id));
        Ok(entries)
    }

    async fn swap_cursor(
        &self,
        device_id: i64,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let device = tables
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| Error::store(format!("device {} does not exist", device_id)))?;
        if device.cursor != expected {
            return Ok(false);
        }
        device.cursor = Some(new);
        Ok(true)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_config(&self, scope: &ConfigScope) -> Result<Vec<ConfigEntry>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut entries: Vec<ConfigEntry> = tables
            .config
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|((s, key), value)| ConfigEntry {
                scope: s.clone(),
                key: key.clone(),
                value_serialized: value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn save_config(&self, entry: ConfigEntry) -> Result<(), Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables
            .config
            .insert((entry.scope, entry.key), entry.value_serialized);
        Ok(())
    }
}

#[async_trait]
impl CacheRecordStore for MemoryStore {
    async fn get_cache_record(&self, key: &str) -> Result<Option<CacheRecord>, Error> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.cache.get(key).cloned())
    }

    async fn put_cache_record(&self, record: CacheRecord) -> Result<(), Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.cache.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_cache_record(&self, key: &str) -> Result<bool, Error> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables.cache.remove(key).is_some())
    }
}
