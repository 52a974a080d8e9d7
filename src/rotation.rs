//! Playlist rotation.
//!
//! Each call selects the entry after the device's cursor (wrapping to the
//! first) and persists it as the new cursor. A cursor that no longer names an
//! entry of the playlist restarts the rotation at the first entry.
//!
//! Calls are not idempotent: every call advances the rotation once. The
//! cursor write is a compare-and-swap, so two concurrent requests for the
//! same device advance it twice instead of both persisting the same entry.

use crate::error::Error;
use crate::model::{Device, PlaylistEntry};
use crate::store::{DeviceStore, PlaylistStore};

/// Retries of the cursor compare-and-swap before giving up.
const MAX_CURSOR_ATTEMPTS: usize = 4;

/// Pick the entry following `cursor` in an ordered entry list.
///
/// ```
/// use fruitstand::model::PlaylistEntry;
/// use fruitstand::rotation::select_next;
///
/// let entry = |id, order| PlaylistEntry {
///     id,
///     playlist_id: 1,
///     screen_key: "s".into(),
///     order,
///     refresh_interval: None,
/// };
/// let entries = vec![entry(10, 0), entry(11, 5)];
/// assert_eq!(select_next(&entries, None).unwrap().id, 10);
/// assert_eq!(select_next(&entries, Some(10)).unwrap().id, 11);
/// assert_eq!(select_next(&entries, Some(11)).unwrap().id, 10);
/// assert_eq!(select_next(&entries, Some(99)).unwrap().id, 10);
/// ```
pub fn select_next(entries: &[PlaylistEntry], cursor: Option<i64>) -> Option<&PlaylistEntry> {
    if entries.is_empty() {
        return None;
    }
    let position = cursor.and_then(|id| entries.iter().position(|e| e.id == id));
    match position {
        Some(pos) => entries.get((pos + 1) % entries.len()),
        None => entries.first(),
    }
}

/// Advance the device's rotation and return the entry to show.
///
/// Returns `Ok(None)` when the device has no playlist or the playlist has no
/// entries; nothing is written in that case.
pub async fn next_entry<S>(store: &S, device: &Device) -> Result<Option<PlaylistEntry>, Error>
where
    S: DeviceStore + PlaylistStore + ?Sized,
{
    let Some(playlist_id) = device.playlist_id else {
        return Ok(None);
    };

    let mut cursor = device.cursor;
    for attempt in 0..MAX_CURSOR_ATTEMPTS {
        let entries = store.list_entries(playlist_id).await?;
        let Some(next) = select_next(&entries, cursor) else {
            return Ok(None);
        };

        if store.swap_cursor(device.id, cursor, next.id).await? {
            tracing::debug!(
                device = device.id,
                playlist = playlist_id,
                entry = next.id,
                "rotation advanced"
            );
            return Ok(Some(next.clone()));
        }

        tracing::debug!(device = device.id, attempt, "rotation cursor moved, retrying");
        cursor = store
            .find_device(device.id)
            .await?
            .ok_or_else(|| Error::store(format!("device {} disappeared", device.id)))?
            .cursor;
    }

    Err(Error::store(format!(
        "rotation cursor for device {} kept changing",
        device.id
    )))
}
