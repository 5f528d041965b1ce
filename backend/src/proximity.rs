//! Proximity alert engine.
//!
//! For each new position, scans the user's waypoint catalogue, picks the
//! alert radius from the waypoint's WQS classification, and emits
//! deduplicated alerts under a per-waypoint cool-down. Classification
//! lookups are cached with a coarse TTL; the score only needs eventual
//! freshness here.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use field_geo::{haversine_m, LatLng};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::TelemetryConfig;
use crate::scoring;
use crate::state::{Classification, ProximityAlert, ProximityAlertRecord};
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy)]
struct CachedWqs {
    score: f64,
    classification: Classification,
    cached_at: DateTime<Utc>,
}

pub struct ProximityEngine {
    radius_m: f64,
    hotspot_bonus_m: f64,
    cooldown: Duration,
    cache_ttl: Duration,
    cache: RwLock<HashMap<(String, String), CachedWqs>>,
}

impl ProximityEngine {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            radius_m: config.proximity_radius_m,
            hotspot_bonus_m: config.hotspot_bonus_m,
            cooldown: config.cooldown(),
            cache_ttl: Duration::minutes(config.wqs_cache_ttl_min),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn check(&self, store: &SharedStore, user_id: &str, pos: LatLng) -> Vec<ProximityAlert> {
        self.check_at(store, user_id, pos, Utc::now()).await
    }

    /// Scan the catalogue at an explicit instant. The ledger write happens
    /// under the same store guard as the dedup read, and alerts come back
    /// sorted by ascending distance so replay is deterministic.
    pub async fn check_at(
        &self,
        store: &SharedStore,
        user_id: &str,
        pos: LatLng,
        now: DateTime<Utc>,
    ) -> Vec<ProximityAlert> {
        let mut guard = store.write().await;

        let mut candidates: Vec<(String, String, String, f64)> = Vec::new();
        for wp in guard.list_waypoints(user_id) {
            let distance = haversine_m(pos, wp.pos);
            // Nothing beyond baseline + hotspot bonus can qualify
            if distance <= self.radius_m + self.hotspot_bonus_m {
                candidates.push((
                    wp.id.clone(),
                    wp.name.clone(),
                    wp.waypoint_type.clone().unwrap_or_else(|| "unknown".to_string()),
                    distance,
                ));
            }
        }
        candidates.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal));

        let mut alerts = Vec::new();
        let since = now - self.cooldown;

        for (waypoint_id, name, waypoint_type, distance) in candidates {
            let (score, classification) =
                self.classify(&guard, user_id, &waypoint_id, now).await;

            let mut radius = self.radius_m;
            if classification == Classification::Hotspot {
                radius += self.hotspot_bonus_m;
            }

            if distance > radius {
                continue;
            }

            if guard.recent_alert_exists(user_id, &waypoint_id, since) {
                continue;
            }

            let rounded = (distance * 10.0).round() / 10.0;
            let alert = ProximityAlert {
                waypoint_id: waypoint_id.clone(),
                waypoint_name: name.clone(),
                waypoint_type,
                distance_meters: rounded,
                wqs_score: score,
                classification,
                alert_type: "proximity".to_string(),
                message: proximity_message(&name, distance, classification),
            };

            guard.alert_ledger.push(ProximityAlertRecord {
                user_id: user_id.to_string(),
                waypoint_id,
                alert: alert.clone(),
                created_at: now,
            });
            alerts.push(alert);
        }

        alerts
    }

    async fn classify(
        &self,
        store: &crate::store::TelemetryStore,
        user_id: &str,
        waypoint_id: &str,
        now: DateTime<Utc>,
    ) -> (Option<f64>, Classification) {
        let key = (user_id.to_string(), waypoint_id.to_string());

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if now - entry.cached_at < self.cache_ttl {
                    return (Some(entry.score), entry.classification);
                }
            }
        }

        match scoring::calculate_wqs(store, user_id, waypoint_id, now) {
            Ok(wqs) => {
                self.cache.write().await.insert(
                    key,
                    CachedWqs {
                        score: wqs.total_score,
                        classification: wqs.classification,
                        cached_at: now,
                    },
                );
                (Some(wqs.total_score), wqs.classification)
            }
            Err(_) => (None, Classification::Standard),
        }
    }

}

// ─── Nearby hotspots ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NearbyWaypoint {
    pub waypoint_id: String,
    pub name: String,
    #[serde(flatten)]
    pub pos: LatLng,
    pub distance_m: f64,
    pub wqs: f64,
    pub classification: Classification,
}

/// Scored waypoints within `radius_km` of a point, best score first.
pub fn nearby_hotspots(
    store: &crate::store::TelemetryStore,
    user_id: &str,
    center: LatLng,
    radius_km: f64,
    now: DateTime<Utc>,
) -> Vec<NearbyWaypoint> {
    let mut nearby: Vec<NearbyWaypoint> = store
        .list_waypoints(user_id)
        .iter()
        .filter_map(|wp| {
            let distance = haversine_m(center, wp.pos);
            if distance > radius_km * 1000.0 {
                return None;
            }
            let wqs = scoring::calculate_wqs(store, user_id, &wp.id, now).ok()?;
            Some(NearbyWaypoint {
                waypoint_id: wp.id.clone(),
                name: wp.name.clone(),
                pos: wp.pos,
                distance_m: (distance * 10.0).round() / 10.0,
                wqs: wqs.total_score,
                classification: wqs.classification,
            })
        })
        .collect();

    nearby.sort_by(|a, b| {
        b.wqs
            .partial_cmp(&a.wqs)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.waypoint_id.cmp(&b.waypoint_id))
    });
    nearby
}

fn format_distance(distance_m: f64) -> String {
    if distance_m < 1000.0 {
        format!("{}m", distance_m as i64)
    } else {
        format!("{:.1}km", distance_m / 1000.0)
    }
}

fn proximity_message(name: &str, distance_m: f64, classification: Classification) -> String {
    let dist = format_distance(distance_m);
    match classification {
        Classification::Hotspot => format!("Hotspot '{name}' at {dist} — excellent spot."),
        Classification::Good => format!("Waypoint '{name}' at {dist} — strong potential."),
        _ => format!("Approaching '{name}' ({dist})."),
    }
}
