//! Effective screen configuration.
//!
//! Resolution order, later wins per key:
//! 1. the screen type's compiled-in defaults
//! 2. screen-scoped overrides (every placement of the screen)
//! 3. entry-scoped overrides (one playlist placement)
//!
//! Stored values are JSON text. A value that fails to decode is treated as
//! absent.

use serde_json::{Map, Value};

use crate::error::Error;
use crate::model::{ConfigEntry, ConfigScope, PlaylistEntry};
use crate::screen::ScreenType;
use crate::store::ConfigStore;

/// Flattened key/value configuration handed to a screen.
pub type ConfigMap = Map<String, Value>;

/// Resolve the effective config for a screen, optionally at one placement.
pub async fn resolve<S>(
    store: &S,
    screen: &ScreenType,
    entry: Option<&PlaylistEntry>,
) -> Result<ConfigMap, Error>
where
    S: ConfigStore + ?Sized,
{
    let mut config = screen.default_config.clone();
    overlay(&mut config, load(store, &ConfigScope::Screen(screen.key.clone())).await?);
    if let Some(entry) = entry {
        overlay(&mut config, load(store, &ConfigScope::Entry(entry.id)).await?);
    }
    Ok(config)
}

/// Load the decodable values stored for one scope.
pub async fn load<S>(store: &S, scope: &ConfigScope) -> Result<ConfigMap, Error>
where
    S: ConfigStore + ?Sized,
{
    let mut out = ConfigMap::new();
    for entry in store.load_config(scope).await? {
        match serde_json::from_str::<Value>(&entry.value_serialized) {
            Ok(value) => {
                out.insert(entry.key, value);
            }
            Err(e) => {
                tracing::debug!(key = %entry.key, ?scope, "skipping unreadable config value: {}", e);
            }
        }
    }
    Ok(out)
}

/// Persist every key of `config` into `scope`, replacing existing values.
pub async fn save<S>(store: &S, scope: &ConfigScope, config: &ConfigMap) -> Result<(), Error>
where
    S: ConfigStore + ?Sized,
{
    for (key, value) in config {
        store
            .save_config(ConfigEntry {
                scope: scope.clone(),
                key: key.clone(),
                value_serialized: serde_json::to_string(value)?,
            })
            .await?;
    }
    Ok(())
}

fn overlay(base: &mut ConfigMap, top: ConfigMap) {
    for (key, value) in top {
        base.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn entry(id: i64) -> PlaylistEntry {
        PlaylistEntry {
            id,
            playlist_id: 1,
            screen_key: "quotes".to_string(),
            order: 0,
            refresh_interval: None,
        }
    }

    fn map(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_entry_beats_screen_beats_default() {
        let store = MemoryStore::new();
        let screen = ScreenType::new("quotes", "Quotes")
            .with_default("mode", "random")
            .with_default("author", "anon")
            .with_default("image", false);
        save(
            &store,
            &ConfigScope::Screen("quotes".to_string()),
            &map(json!({"mode": "today", "author": "basho"})),
        )
        .await
        .unwrap();
        save(&store, &ConfigScope::Entry(7), &map(json!({"mode": "author"})))
            .await
            .unwrap();

        let config = resolve(&store, &screen, Some(&entry(7))).await.unwrap();
        assert_eq!(config["mode"], json!("author"));
        assert_eq!(config["author"], json!("basho"));
        assert_eq!(config["image"], json!(false));

        let config = resolve(&store, &screen, None).await.unwrap();
        assert_eq!(config["mode"], json!("today"));

        let config = resolve(&store, &screen, Some(&entry(8))).await.unwrap();
        assert_eq!(config["mode"], json!("today"));
    }

    #[tokio::test]
    async fn test_corrupt_value_is_absent() {
        let store = MemoryStore::new();
        let screen = ScreenType::new("quotes", "Quotes").with_default("mode", "random");
        store
            .save_config(ConfigEntry {
                scope: ConfigScope::Screen("quotes".to_string()),
                key: "mode".to_string(),
                value_serialized: "{not json".to_string(),
            })
            .await
            .unwrap();

        let config = resolve(&store, &screen, None).await.unwrap();
        assert_eq!(config["mode"], json!("random"));
    }

    #[tokio::test]
    async fn test_save_replaces_existing_key() {
        let store = MemoryStore::new();
        let scope = ConfigScope::Entry(3);
        save(&store, &scope, &map(json!({"units": "metric"}))).await.unwrap();
        save(&store, &scope, &map(json!({"units": "imperial"}))).await.unwrap();

        let loaded = load(&store, &scope).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["units"], json!("imperial"));
    }
}
