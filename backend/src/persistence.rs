use std::path::Path;

use anyhow::Result;
use tokio::fs;
use tracing::{info, warn};

use crate::store::TelemetryStore;

/// Load the persisted store from disk. Returns an empty store if the snapshot
/// is missing or corrupt.
pub async fn load_store(path: &Path) -> TelemetryStore {
    if !path.exists() {
        info!("No snapshot at {}, starting with an empty store", path.display());
        return TelemetryStore::default();
    }

    match fs::read_to_string(path).await {
        Ok(data) => match serde_json::from_str::<TelemetryStore>(&data) {
            Ok(store) => {
                info!(
                    "Loaded snapshot from {} ({} waypoints, {} trips, {} samples)",
                    path.display(),
                    store.waypoints.len(),
                    store.trips.len(),
                    store.samples.len(),
                );
                store
            }
            Err(e) => {
                warn!("Failed to parse {}: {e}, starting empty", path.display());
                TelemetryStore::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {e}, starting empty", path.display());
            TelemetryStore::default()
        }
    }
}

/// Persist the store to disk. Written atomically via a temp file so a crash
/// mid-write never corrupts the previous snapshot.
pub async fn save_store(path: &Path, store: &TelemetryStore) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string(store)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Waypoint;
    use chrono::Utc;
    use field_geo::LatLng;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let path = std::env::temp_dir().join("fieldtrace-persistence-test.json");
        let _ = fs::remove_file(&path).await;

        let mut store = TelemetryStore::default();
        store.upsert_waypoint(Waypoint {
            id: "w1".to_string(),
            user_id: "alice".to_string(),
            name: "Clearing A".to_string(),
            pos: LatLng::new(46.8139, -71.2080),
            waypoint_type: Some("stand".to_string()),
            color: None,
            icon: None,
            created_at: Utc::now(),
        });

        save_store(&path, &store).await.unwrap();
        let loaded = load_store(&path).await;
        assert_eq!(loaded.waypoints.len(), 1);
        assert_eq!(loaded.waypoints["w1"].name, "Clearing A");

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_or_corrupt_snapshot_starts_empty() {
        let missing = std::env::temp_dir().join("fieldtrace-does-not-exist.json");
        assert!(load_store(&missing).await.waypoints.is_empty());

        let corrupt = std::env::temp_dir().join("fieldtrace-corrupt-test.json");
        fs::write(&corrupt, "{not json").await.unwrap();
        assert!(load_store(&corrupt).await.waypoints.is_empty());
        let _ = fs::remove_file(&corrupt).await;
    }
}
