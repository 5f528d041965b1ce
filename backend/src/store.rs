use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use field_geo::{haversine_m, LatLng};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DomainError, DomainResult};
use crate::state::{
    ChatMessage, GroupMember, GroupPositionShare, HeadingSession, LocationSample,
    NotificationRecord, Observation, ProximityAlertRecord, PushSubscription, TrackingSession,
    Trip, TripProjection, UserProfile, Waypoint, WaypointVisit,
};

pub type SharedStore = Arc<RwLock<TelemetryStore>>;

pub fn shared(store: TelemetryStore) -> SharedStore {
    Arc::new(RwLock::new(store))
}

/// The process-wide document store. One collection per entity, keyed by its
/// natural id; append-only collections are plain vectors in insertion order.
/// All access goes through the surrounding `RwLock`; components lock, mutate,
/// and drop the guard before any outbound I/O.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TelemetryStore {
    #[serde(default)]
    pub users: HashMap<String, UserProfile>,
    #[serde(default)]
    pub waypoints: HashMap<String, Waypoint>,
    #[serde(default)]
    pub trips: HashMap<String, Trip>,
    #[serde(default)]
    pub visits: HashMap<String, WaypointVisit>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    /// Analytics projection of completed trips (WQS input).
    #[serde(default)]
    pub trip_projections: Vec<TripProjection>,
    #[serde(default)]
    pub samples: Vec<LocationSample>,
    #[serde(default)]
    pub sessions: HashMap<String, TrackingSession>,
    /// user_id → current subscription; overwritten on re-subscribe.
    #[serde(default)]
    pub subscriptions: HashMap<String, PushSubscription>,
    #[serde(default)]
    pub alert_ledger: Vec<ProximityAlertRecord>,
    #[serde(default)]
    pub notifications: Vec<NotificationRecord>,
    /// Write-through copies of live heading sessions (historical record).
    #[serde(default)]
    pub heading_sessions: HashMap<String, HeadingSession>,
    #[serde(default)]
    pub group_members: Vec<GroupMember>,
    /// group_id → user_id → last shared position.
    #[serde(default)]
    pub group_positions: HashMap<String, HashMap<String, GroupPositionShare>>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl TelemetryStore {
    // ── Waypoint catalogue ───────────────────────────────────────────────────

    pub fn upsert_waypoint(&mut self, waypoint: Waypoint) {
        self.waypoints.insert(waypoint.id.clone(), waypoint);
    }

    /// Lookups are scoped by owner: a waypoint belonging to another user is
    /// indistinguishable from a missing one.
    pub fn get_waypoint(&self, user_id: &str, waypoint_id: &str) -> DomainResult<&Waypoint> {
        self.waypoints
            .get(waypoint_id)
            .filter(|wp| wp.user_id == user_id)
            .ok_or_else(|| DomainError::not_found(format!("waypoint {waypoint_id}")))
    }

    pub fn list_waypoints(&self, user_id: &str) -> Vec<&Waypoint> {
        let mut list: Vec<&Waypoint> = self
            .waypoints
            .values()
            .filter(|wp| wp.user_id == user_id)
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    // ── Trips ────────────────────────────────────────────────────────────────

    /// Fetch a trip owned by `user_id`. A trip under another principal is a
    /// cross-entity constraint breach, not a missing record.
    pub fn get_owned_trip(&self, user_id: &str, trip_id: &str) -> DomainResult<&Trip> {
        let trip = self
            .trips
            .get(trip_id)
            .ok_or_else(|| DomainError::not_found(format!("trip {trip_id}")))?;
        if trip.user_id != user_id {
            return Err(DomainError::constraint(format!(
                "trip {trip_id} does not belong to the acting user"
            )));
        }
        Ok(trip)
    }

    /// Completed-trip projections within `radius_km` of a point, bounding-box
    /// prefilter then exact haversine.
    pub fn projections_near(
        &self,
        user_id: &str,
        center: LatLng,
        radius_km: f64,
    ) -> Vec<&TripProjection> {
        let lat_diff = radius_km / 111.0;
        let lng_diff = radius_km / (111.0 * center.lat.to_radians().cos().abs().max(1e-6));

        self.trip_projections
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| match p.pos {
                Some(pos) => {
                    (pos.lat - center.lat).abs() <= lat_diff
                        && (pos.lng - center.lng).abs() <= lng_diff
                        && haversine_m(pos, center) <= radius_km * 1000.0
                }
                None => false,
            })
            .collect()
    }

    // ── Tracking sessions & samples ──────────────────────────────────────────

    pub fn active_session(&self, user_id: &str) -> Option<&TrackingSession> {
        self.sessions
            .values()
            .find(|s| s.user_id == user_id && s.active)
    }

    /// Samples of one session in ascending time order.
    pub fn session_samples(&self, session_id: &str) -> Vec<&LocationSample> {
        let mut samples: Vec<&LocationSample> = self
            .samples
            .iter()
            .filter(|s| s.session_id.as_deref() == Some(session_id))
            .collect();
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        samples
    }

    /// Location history, newest first.
    pub fn location_history(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Vec<&LocationSample> {
        let mut samples: Vec<&LocationSample> = self
            .samples
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| session_id.is_none() || s.session_id.as_deref() == session_id)
            .collect();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples.truncate(limit);
        samples
    }

    // ── Proximity dedup ledger ───────────────────────────────────────────────

    pub fn recent_alert_exists(
        &self,
        user_id: &str,
        waypoint_id: &str,
        since: DateTime<Utc>,
    ) -> bool {
        self.alert_ledger.iter().any(|r| {
            r.user_id == user_id && r.waypoint_id == waypoint_id && r.created_at >= since
        })
    }

    // ── Groups ───────────────────────────────────────────────────────────────

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> bool {
        self.group_members
            .iter()
            .any(|m| m.group_id == group_id && m.user_id == user_id)
    }

    pub fn add_group_member(&mut self, member: GroupMember) {
        if !self.is_group_member(&member.group_id, &member.user_id) {
            self.group_members.push(member);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn waypoint(id: &str, user: &str, lat: f64, lng: f64) -> Waypoint {
        Waypoint {
            id: id.to_string(),
            user_id: user.to_string(),
            name: format!("wp {id}"),
            pos: LatLng::new(lat, lng),
            waypoint_type: None,
            color: None,
            icon: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn waypoint_lookup_is_owner_scoped() {
        let mut store = TelemetryStore::default();
        store.upsert_waypoint(waypoint("w1", "alice", 46.8, -71.2));

        assert!(store.get_waypoint("alice", "w1").is_ok());
        // Another principal sees NotFound, never PermissionDenied
        assert!(matches!(
            store.get_waypoint("bob", "w1"),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn foreign_trip_is_a_constraint_violation() {
        let mut store = TelemetryStore::default();
        store.trips.insert(
            "t1".to_string(),
            Trip {
                trip_id: "t1".to_string(),
                user_id: "alice".to_string(),
                title: "deer outing".to_string(),
                target_species: "deer".to_string(),
                status: crate::state::TripStatus::Planned,
                planned_date: None,
                start_time: None,
                end_time: None,
                duration_hours: None,
                weather: None,
                temperature: None,
                wind_speed: None,
                success: false,
                planned_waypoints: vec![],
                visited_waypoints: vec![],
                observations_count: 0,
                notes: None,
                created_at: Utc::now(),
                updated_at: None,
            },
        );

        assert!(store.get_owned_trip("alice", "t1").is_ok());
        assert!(matches!(
            store.get_owned_trip("bob", "t1"),
            Err(DomainError::ConstraintViolation(_))
        ));
        assert!(matches!(
            store.get_owned_trip("alice", "missing"),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn projections_near_filters_by_exact_distance() {
        let mut store = TelemetryStore::default();
        let center = LatLng::new(46.8139, -71.2080);
        let near = field_geo::destination(center, 90.0, 300.0);
        let far = field_geo::destination(center, 90.0, 900.0);

        for (i, pos) in [near, far].iter().enumerate() {
            store.trip_projections.push(TripProjection {
                trip_id: format!("t{i}"),
                user_id: "alice".to_string(),
                date: Utc::now(),
                species: "deer".to_string(),
                pos: Some(*pos),
                duration_hours: 3.0,
                weather_conditions: None,
                temperature: None,
                success: false,
                observations: 0,
                created_at: Utc::now(),
            });
        }

        let hits = store.projections_near("alice", center, 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].trip_id, "t0");
        assert!(store.projections_near("bob", center, 0.5).is_empty());
    }
}
