//! Live heading session cache.
//!
//! Short-lived interactive sessions holding the user's position, a view cone,
//! wind data, and the POIs visible inside the cone. The in-process map is the
//! single authority over live sessions; every mutation writes the session
//! document through to the store. External callers never touch the map
//! directly.

use std::collections::HashMap;

use chrono::Utc;
use field_geo::{destination, haversine_m, LatLng};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::state::{
    AlertPriority, GeoPosition, HeadingAlert, HeadingAlertType, HeadingSession, HeadingState,
    HeadingSummary, Poi, ViewCone, WindData,
};
use crate::store::SharedStore;
use crate::visibility;
use crate::weather::{assess_wind, WeatherService};

pub const DEFAULT_APERTURE_DEG: f64 = 60.0;
pub const DEFAULT_RANGE_M: f64 = 500.0;

/// Arc points on the cone boundary; the polygon is the apex plus these.
const CONE_ARC_POINTS: usize = 9;

/// Rolling alert window per session.
const MAX_PENDING_ALERTS: usize = 5;

// ─── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HeadingUpdate {
    pub session_id: String,
    pub lat: f64,
    pub lng: f64,
    pub heading: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub aperture_degrees: Option<f64>,
    #[serde(default)]
    pub range_meters: Option<f64>,
}

/// Snapshot returned to the client after each position update.
#[derive(Debug, Clone, Serialize)]
pub struct HeadingViewState {
    pub session_id: String,
    pub state: HeadingState,
    pub position: GeoPosition,
    pub view_cone: ViewCone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind: Option<WindData>,
    pub pois: Vec<Poi>,
    pub alerts: Vec<HeadingAlert>,
    pub distance_traveled_m: f64,
    pub duration_seconds: i64,
}

impl HeadingViewState {
    fn from_session(session: &HeadingSession) -> Self {
        Self {
            session_id: session.id.clone(),
            state: session.state,
            position: session.position.clone(),
            view_cone: session.view_cone.clone(),
            wind: session.wind.clone(),
            pois: session.visible_pois.clone(),
            alerts: session.alerts.clone(),
            distance_traveled_m: session.distance_traveled_m,
            duration_seconds: session.duration_seconds,
        }
    }
}

// ─── Cone geometry ───────────────────────────────────────────────────────────

/// Apex plus `CONE_ARC_POINTS` boundary points, bearings stepped linearly
/// from `heading - aperture/2` to `heading + aperture/2`, reduced mod 360.
pub fn cone_vertices(apex: LatLng, heading: f64, aperture: f64, range_m: f64) -> Vec<LatLng> {
    let mut vertices = Vec::with_capacity(1 + CONE_ARC_POINTS);
    vertices.push(apex);

    let left = heading - aperture / 2.0;
    for i in 0..CONE_ARC_POINTS {
        let t = i as f64 / (CONE_ARC_POINTS - 1) as f64;
        let bearing = (left + t * aperture).rem_euclid(360.0);
        vertices.push(destination(apex, bearing, range_m));
    }

    vertices
}

// ─── Alert synthesis ─────────────────────────────────────────────────────────

/// New alerts warranted by the current wind and visible POIs, skipping ones
/// already pending on the session.
pub fn synthesize_alerts(session: &HeadingSession) -> Vec<HeadingAlert> {
    let now = Utc::now();
    let mut alerts = Vec::new();

    if let Some(wind) = &session.wind {
        if !wind.favorable
            && !session
                .alerts
                .iter()
                .any(|a| a.alert_type == HeadingAlertType::WindChange && !a.acknowledged)
        {
            alerts.push(HeadingAlert {
                id: Uuid::new_v4().to_string(),
                alert_type: HeadingAlertType::WindChange,
                priority: AlertPriority::High,
                title: "Wind change".to_string(),
                message: wind
                    .notes
                    .clone()
                    .unwrap_or_else(|| "The wind has shifted".to_string()),
                distance_m: None,
                bearing: None,
                acknowledged: false,
                created_at: now,
            });
        }
    }

    for poi in session.visible_pois.iter().take(3) {
        if poi.distance_m < 100.0 && poi.priority >= 8 {
            let already = session
                .alerts
                .iter()
                .chain(alerts.iter())
                .any(|a| a.alert_type == HeadingAlertType::PoiNearby && a.title == poi.name);
            if !already {
                alerts.push(HeadingAlert {
                    id: Uuid::new_v4().to_string(),
                    alert_type: HeadingAlertType::PoiNearby,
                    priority: AlertPriority::Medium,
                    title: poi.name.clone(),
                    message: format!("Point of interest at {}m", poi.distance_m as i64),
                    distance_m: Some(poi.distance_m),
                    bearing: Some(poi.bearing),
                    acknowledged: false,
                    created_at: now,
                });
            }
        }
    }

    alerts
}

// ─── Cache ───────────────────────────────────────────────────────────────────

pub struct HeadingCache {
    sessions: RwLock<HashMap<String, HeadingSession>>,
    store: SharedStore,
    weather: WeatherService,
    demo_pois: bool,
}

impl HeadingCache {
    pub fn new(store: SharedStore, weather: WeatherService, demo_pois: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            weather,
            demo_pois,
        }
    }

    async fn visible_pois(&self, user_id: &str, apex: LatLng, cone: &ViewCone) -> Vec<Poi> {
        let candidates = {
            let store = self.store.read().await;
            visibility::candidate_pois(&store, user_id)
        };
        let visible = visibility::filter_visible(candidates, apex, cone);
        if visible.is_empty() && self.demo_pois {
            return visibility::demo_pois(apex, cone);
        }
        visible
    }

    async fn write_through(&self, session: &HeadingSession) {
        let mut store = self.store.write().await;
        store
            .heading_sessions
            .insert(session.id.clone(), session.clone());
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    pub async fn create(
        &self,
        user_id: &str,
        lat: f64,
        lng: f64,
        heading: f64,
        aperture: Option<f64>,
        range_m: Option<f64>,
    ) -> HeadingSession {
        let now = Utc::now();
        let pos = LatLng::new(lat, lng);
        let aperture = aperture.unwrap_or(DEFAULT_APERTURE_DEG);
        let range_m = range_m.unwrap_or(DEFAULT_RANGE_M);

        let view_cone = ViewCone {
            aperture_degrees: aperture,
            range_meters: range_m,
            direction: heading,
            vertices: cone_vertices(pos, heading, aperture, range_m),
        };

        let wind = assess_wind(self.weather.current_wind(pos).await, heading);
        let visible_pois = self.visible_pois(user_id, pos, &view_cone).await;

        let session = HeadingSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            state: HeadingState::Active,
            position: GeoPosition {
                pos,
                altitude: None,
                accuracy: None,
                heading,
                speed: None,
            },
            view_cone,
            wind: Some(wind),
            visible_pois,
            alerts: Vec::new(),
            pois_visited: Vec::new(),
            started_at: now,
            last_update: now,
            ended_at: None,
            duration_seconds: 0,
            distance_traveled_m: 0.0,
        };

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.write_through(&session).await;

        info!("Heading session {} started for {user_id}", session.id);
        session
    }

    /// Cache first, store fallback (process restart leaves only the store
    /// copy).
    pub async fn get(&self, session_id: &str) -> DomainResult<HeadingSession> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Ok(session.clone());
        }

        let store = self.store.read().await;
        store
            .heading_sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("heading session {session_id}")))
    }

    pub async fn update_position(&self, update: HeadingUpdate) -> DomainResult<HeadingViewState> {
        let now = Utc::now();

        // Snapshot the session before any outbound I/O
        let snapshot = self.get(&update.session_id).await?;
        if snapshot.state != HeadingState::Active {
            return Err(DomainError::invalid_state(format!(
                "heading session {} is not active",
                update.session_id
            )));
        }

        let new_pos = LatLng::new(update.lat, update.lng);
        let mut view_cone = snapshot.view_cone.clone();
        view_cone.direction = update.heading;
        view_cone.vertices = cone_vertices(
            new_pos,
            update.heading,
            view_cone.aperture_degrees,
            view_cone.range_meters,
        );

        let wind = assess_wind(self.weather.current_wind(new_pos).await, update.heading);
        let visible_pois = self
            .visible_pois(&snapshot.user_id, new_pos, &view_cone)
            .await;

        // Apply atomically: the distance accumulator is read-modify-write and
        // concurrent updates for the same session must not lose segments
        let doc = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(update.session_id.clone())
                .or_insert(snapshot);

            if session.state != HeadingState::Active {
                return Err(DomainError::invalid_state(format!(
                    "heading session {} is not active",
                    update.session_id
                )));
            }

            session.distance_traveled_m += haversine_m(session.position.pos, new_pos);
            session.position = GeoPosition {
                pos: new_pos,
                altitude: update.altitude,
                accuracy: update.accuracy,
                heading: update.heading,
                speed: update.speed,
            };
            session.view_cone = view_cone;
            session.wind = Some(wind);
            session.visible_pois = visible_pois;

            // Keep the unacknowledged tail, then append anything new
            let new_alerts = synthesize_alerts(session);
            session.alerts.retain(|a| !a.acknowledged);
            session.alerts.truncate(MAX_PENDING_ALERTS);
            session.alerts.extend(new_alerts);

            session.last_update = now;
            session.duration_seconds = (now - session.started_at).num_seconds();
            session.clone()
        };

        self.write_through(&doc).await;
        Ok(HeadingViewState::from_session(&doc))
    }

    pub async fn update_settings(
        &self,
        session_id: &str,
        settings: SessionSettings,
    ) -> DomainResult<HeadingSession> {
        let mut session = self.get(session_id).await?;

        if let Some(aperture) = settings.aperture_degrees {
            session.view_cone.aperture_degrees = aperture;
        }
        if let Some(range_m) = settings.range_meters {
            session.view_cone.range_meters = range_m;
        }

        session.view_cone.vertices = cone_vertices(
            session.position.pos,
            session.view_cone.direction,
            session.view_cone.aperture_degrees,
            session.view_cone.range_meters,
        );
        session.visible_pois = self
            .visible_pois(&session.user_id, session.position.pos, &session.view_cone)
            .await;

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.write_through(&session).await;

        Ok(session)
    }

    pub async fn pause(&self, session_id: &str) -> DomainResult<()> {
        self.set_state(session_id, HeadingState::Active, HeadingState::Paused)
            .await
    }

    pub async fn resume(&self, session_id: &str) -> DomainResult<()> {
        self.set_state(session_id, HeadingState::Paused, HeadingState::Active)
            .await
    }

    async fn set_state(
        &self,
        session_id: &str,
        expected: HeadingState,
        next: HeadingState,
    ) -> DomainResult<()> {
        let mut session = self.get(session_id).await?;
        if session.state != expected {
            return Err(DomainError::invalid_state(format!(
                "heading session {session_id} is not {expected:?}"
            )));
        }
        session.state = next;

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.write_through(&session).await;
        Ok(())
    }

    /// End a session: final stats, write-through, and eviction from the
    /// in-process map.
    pub async fn end(&self, session_id: &str) -> DomainResult<HeadingSummary> {
        let now = Utc::now();
        let mut session = self.get(session_id).await?;

        if session.state == HeadingState::Ended {
            return Err(DomainError::invalid_state(format!(
                "heading session {session_id} already ended"
            )));
        }

        session.state = HeadingState::Ended;
        session.ended_at = Some(now);
        session.duration_seconds = (now - session.started_at).num_seconds();

        let summary = HeadingSummary {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            duration_seconds: session.duration_seconds,
            distance_traveled_m: (session.distance_traveled_m * 10.0).round() / 10.0,
            pois_visited: session.pois_visited.len(),
            alerts_received: session.alerts.len(),
            started_at: session.started_at,
            ended_at: now,
        };

        self.write_through(&session).await;
        self.sessions.write().await.remove(session_id);

        info!(
            "Heading session {session_id} ended: {:.0} m over {} s",
            summary.distance_traveled_m, summary.duration_seconds
        );
        Ok(summary)
    }

    pub async fn acknowledge_alert(&self, session_id: &str, alert_id: &str) -> DomainResult<()> {
        let mut session = self.get(session_id).await?;

        let Some(alert) = session.alerts.iter_mut().find(|a| a.id == alert_id) else {
            return Err(DomainError::not_found(format!("alert {alert_id}")));
        };
        alert.acknowledged = true;

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.write_through(&session).await;
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Waypoint;
    use crate::store::{shared, TelemetryStore};

    const APEX: LatLng = LatLng {
        lat: 46.8,
        lng: -71.2,
    };

    fn cache_with_store(store: SharedStore) -> HeadingCache {
        HeadingCache::new(store, WeatherService::new(), false)
    }

    fn waypoint_at(id: &str, bearing: f64, distance: f64, wp_type: Option<&str>) -> Waypoint {
        Waypoint {
            id: id.to_string(),
            user_id: "alice".to_string(),
            name: format!("wp {id}"),
            pos: destination(APEX, bearing, distance),
            waypoint_type: wp_type.map(|t| t.to_string()),
            color: None,
            icon: None,
            created_at: Utc::now(),
        }
    }

    fn update(session_id: &str, pos: LatLng, heading: f64) -> HeadingUpdate {
        HeadingUpdate {
            session_id: session_id.to_string(),
            lat: pos.lat,
            lng: pos.lng,
            heading,
            altitude: None,
            accuracy: None,
            speed: None,
        }
    }

    #[tokio::test]
    async fn cone_keeps_ten_vertices_through_every_mutation() {
        let store = shared(TelemetryStore::default());
        let cache = cache_with_store(store);

        let session = cache.create("alice", 46.8, -71.2, 0.0, None, None).await;
        assert_eq!(session.view_cone.vertices.len(), 10);

        let moved = destination(APEX, 45.0, 50.0);
        let state = cache
            .update_position(update(&session.id, moved, 90.0))
            .await
            .unwrap();
        assert_eq!(state.view_cone.vertices.len(), 10);
        assert_eq!(state.view_cone.direction, 90.0);

        let updated = cache
            .update_settings(
                &session.id,
                SessionSettings {
                    aperture_degrees: Some(90.0),
                    range_meters: Some(800.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.view_cone.vertices.len(), 10);
        assert_eq!(updated.view_cone.aperture_degrees, 90.0);
    }

    #[tokio::test]
    async fn pois_filter_by_bearing_inside_the_cone() {
        let mut inner = TelemetryStore::default();
        inner.upsert_waypoint(waypoint_at("visible", 20.0, 300.0, None));
        inner.upsert_waypoint(waypoint_at("hidden", 40.0, 300.0, None));
        let cache = cache_with_store(shared(inner));

        let session = cache.create("alice", 46.8, -71.2, 0.0, Some(60.0), Some(500.0)).await;

        let ids: Vec<&str> = session.visible_pois.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["visible"]);
        assert!(session.visible_pois[0].distance_m <= 500.0);
        assert!(session.visible_pois[0].relative_angle.abs() <= 30.0);
    }

    #[tokio::test]
    async fn distance_accumulates_across_updates() {
        let store = shared(TelemetryStore::default());
        let cache = cache_with_store(store);
        let session = cache.create("alice", 46.8, -71.2, 0.0, None, None).await;

        let first = destination(APEX, 0.0, 100.0);
        let second = destination(first, 0.0, 150.0);

        cache
            .update_position(update(&session.id, first, 0.0))
            .await
            .unwrap();
        let state = cache
            .update_position(update(&session.id, second, 0.0))
            .await
            .unwrap();

        assert!((state.distance_traveled_m - 250.0).abs() < 2.0, "{}", state.distance_traveled_m);
    }

    #[tokio::test]
    async fn paused_sessions_reject_position_updates() {
        let store = shared(TelemetryStore::default());
        let cache = cache_with_store(store);
        let session = cache.create("alice", 46.8, -71.2, 0.0, None, None).await;

        cache.pause(&session.id).await.unwrap();
        let result = cache
            .update_position(update(&session.id, destination(APEX, 0.0, 10.0), 0.0))
            .await;
        assert!(matches!(result, Err(DomainError::InvalidState(_))));

        // Pausing twice is a lifecycle violation too
        assert!(matches!(
            cache.pause(&session.id).await,
            Err(DomainError::InvalidState(_))
        ));

        cache.resume(&session.id).await.unwrap();
        assert!(cache
            .update_position(update(&session.id, destination(APEX, 0.0, 10.0), 0.0))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn ending_evicts_and_summarizes() {
        let store = shared(TelemetryStore::default());
        let cache = cache_with_store(store.clone());
        let session = cache.create("alice", 46.8, -71.2, 0.0, None, None).await;

        cache
            .update_position(update(&session.id, destination(APEX, 0.0, 120.0), 0.0))
            .await
            .unwrap();

        let summary = cache.end(&session.id).await.unwrap();
        assert!((summary.distance_traveled_m - 120.0).abs() < 2.0);
        assert_eq!(summary.user_id, "alice");
        assert_eq!(cache.active_count().await, 0);

        // The store keeps the ended document; ending again is invalid
        assert!(store.read().await.heading_sessions.contains_key(&session.id));
        assert!(matches!(
            cache.end(&session.id).await,
            Err(DomainError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let cache = cache_with_store(shared(TelemetryStore::default()));
        assert!(matches!(
            cache.get("missing").await,
            Err(DomainError::NotFound(_))
        ));
    }

    // ── Alert synthesis ──────────────────────────────────────────────────────

    fn session_for_alerts(wind_favorable: bool, pois: Vec<Poi>) -> HeadingSession {
        let now = Utc::now();
        HeadingSession {
            id: "hs1".to_string(),
            user_id: "alice".to_string(),
            state: HeadingState::Active,
            position: GeoPosition {
                pos: APEX,
                altitude: None,
                accuracy: None,
                heading: 0.0,
                speed: None,
            },
            view_cone: ViewCone {
                aperture_degrees: 60.0,
                range_meters: 500.0,
                direction: 0.0,
                vertices: cone_vertices(APEX, 0.0, 60.0, 500.0),
            },
            wind: Some(WindData {
                direction_deg: 90.0,
                speed_kmh: 12.0,
                gusts_kmh: None,
                favorable: wind_favorable,
                notes: Some("Caution, wind at your back".to_string()),
            }),
            visible_pois: pois,
            alerts: Vec::new(),
            pois_visited: Vec::new(),
            started_at: now,
            last_update: now,
            ended_at: None,
            duration_seconds: 0,
            distance_traveled_m: 0.0,
        }
    }

    fn close_poi(name: &str, distance_m: f64, priority: u8) -> Poi {
        Poi {
            id: name.to_string(),
            name: name.to_string(),
            pos: APEX,
            poi_type: Some("stand".to_string()),
            icon: None,
            color: None,
            priority,
            visible_in_cone: true,
            distance_m,
            bearing: 10.0,
            relative_angle: 10.0,
        }
    }

    #[test]
    fn unfavorable_wind_raises_one_high_priority_alert() {
        let mut session = session_for_alerts(false, vec![]);

        let alerts = synthesize_alerts(&session);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, HeadingAlertType::WindChange);
        assert_eq!(alerts[0].priority, AlertPriority::High);

        // With the alert pending, no duplicate is raised
        session.alerts = alerts;
        assert!(synthesize_alerts(&session).is_empty());
    }

    #[test]
    fn close_high_priority_pois_alert_without_duplicates() {
        let session = session_for_alerts(
            true,
            vec![
                close_poi("Tree stand", 60.0, 9),
                close_poi("Feeding zone", 80.0, 8),
                close_poi("Low fence", 50.0, 3),
                close_poi("Beyond top three", 70.0, 9),
            ],
        );

        let alerts = synthesize_alerts(&session);
        // Low priority filtered; only the three closest POIs considered
        let titles: Vec<&str> = alerts.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, ["Tree stand", "Feeding zone"]);
        assert!(alerts.iter().all(|a| a.priority == AlertPriority::Medium));
    }

    #[test]
    fn favorable_wind_raises_nothing() {
        let session = session_for_alerts(true, vec![]);
        assert!(synthesize_alerts(&session).is_empty());
    }
}
