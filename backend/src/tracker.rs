use std::sync::Arc;

use chrono::{DateTime, Utc};
use field_geo::{haversine_m, LatLng};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::proximity::ProximityEngine;
use crate::push::PushOutbox;
use crate::state::{LocationSample, ProximityAlert, PushNotification, TrackingSession};
use crate::store::SharedStore;

#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingStatus {
    pub tracking_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub push_enabled: bool,
    pub total_locations: usize,
}

pub struct Tracker {
    store: SharedStore,
    proximity: Arc<ProximityEngine>,
    outbox: PushOutbox,
}

impl Tracker {
    pub fn new(store: SharedStore, proximity: Arc<ProximityEngine>, outbox: PushOutbox) -> Self {
        Self {
            store,
            proximity,
            outbox,
        }
    }

    // ── Position ingestion ───────────────────────────────────────────────────

    pub async fn record_position(
        &self,
        user_id: &str,
        update: LocationUpdate,
        session_id: Option<String>,
    ) -> (LocationSample, Vec<ProximityAlert>) {
        self.record_position_at(user_id, update, session_id, Utc::now())
            .await
    }

    pub async fn record_position_at(
        &self,
        user_id: &str,
        update: LocationUpdate,
        session_id: Option<String>,
        now: DateTime<Utc>,
    ) -> (LocationSample, Vec<ProximityAlert>) {
        let pos = LatLng::new(update.lat, update.lng);

        let sample = LocationSample {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.clone(),
            pos,
            accuracy: update.accuracy,
            altitude: update.altitude,
            heading: update.heading,
            speed: update.speed,
            timestamp: update.timestamp.unwrap_or(now),
        };

        {
            let mut store = self.store.write().await;
            store.samples.push(sample.clone());

            // Only the owner's active session accumulates the counter
            if let Some(sid) = &session_id {
                if let Some(session) = store.sessions.get_mut(sid) {
                    if session.user_id == user_id && session.active {
                        session.locations_count += 1;
                    }
                }
            }
        }

        let alerts = self.proximity.check_at(&self.store, user_id, pos, now).await;

        for alert in &alerts {
            self.outbox
                .submit(
                    user_id,
                    PushNotification {
                        title: "Proximity alert".to_string(),
                        body: alert.message.clone(),
                        icon: None,
                        url: Some("/map".to_string()),
                        tag: Some(format!("proximity-{}", alert.waypoint_id)),
                        data: serde_json::to_value(alert).ok(),
                    },
                )
                .await;
        }

        (sample, alerts)
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Start a tracking session, atomically closing any session still active
    /// for this user. Exactly one active session exists afterwards.
    pub async fn start_session(&self, user_id: &str) -> TrackingSession {
        let now = Utc::now();
        let mut store = self.store.write().await;

        for session in store.sessions.values_mut() {
            if session.user_id == user_id && session.active {
                session.active = false;
                session.ended_at = Some(now);
            }
        }

        let session = TrackingSession {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            started_at: now,
            ended_at: None,
            locations_count: 0,
            distance_km: 0.0,
            active: true,
        };
        store.sessions.insert(session.session_id.clone(), session.clone());
        info!("Tracking session {} started for {user_id}", session.session_id);
        session
    }

    /// End a session and compute its total distance by walking the samples in
    /// ascending time order. Ending an already-ended session is idempotent.
    pub async fn end_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> DomainResult<TrackingSession> {
        let now = Utc::now();
        let mut store = self.store.write().await;

        let session = store
            .sessions
            .get(session_id)
            .filter(|s| s.user_id == user_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("session {session_id}")))?;

        if !session.active && session.ended_at.is_some() {
            return Ok(session);
        }

        let samples = store.session_samples(session_id);
        let mut total_m = 0.0;
        for pair in samples.windows(2) {
            total_m += haversine_m(pair[0].pos, pair[1].pos);
        }

        let distance_km = (total_m / 1000.0 * 100.0).round() / 100.0;

        let Some(session) = store.sessions.get_mut(session_id) else {
            return Err(DomainError::not_found(format!("session {session_id}")));
        };
        session.active = false;
        session.ended_at = Some(now);
        session.distance_km = distance_km;
        let ended = session.clone();

        info!(
            "Tracking session {session_id} ended: {:.2} km over {} samples",
            ended.distance_km, ended.locations_count
        );
        Ok(ended)
    }

    pub async fn history(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Vec<LocationSample> {
        let store = self.store.read().await;
        store
            .location_history(user_id, session_id, limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn status(&self, user_id: &str) -> TrackingStatus {
        let store = self.store.read().await;
        let active = store.active_session(user_id);
        TrackingStatus {
            tracking_active: active.is_some(),
            session_id: active.map(|s| s.session_id.clone()),
            push_enabled: store.subscriptions.contains_key(user_id),
            total_locations: store.samples.iter().filter(|s| s.user_id == user_id).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::push::PushTransport;
    use crate::state::Waypoint;
    use crate::store::{shared, TelemetryStore};

    fn tracker() -> (Tracker, SharedStore) {
        let store = shared(TelemetryStore::default());
        let proximity = Arc::new(ProximityEngine::new(&TelemetryConfig::default()));
        let (outbox, _rx) = PushOutbox::new(store.clone(), Arc::new(PushTransport::Disabled));
        (Tracker::new(store.clone(), proximity, outbox), store)
    }

    fn update(lat: f64, lng: f64) -> LocationUpdate {
        LocationUpdate {
            lat,
            lng,
            accuracy: None,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn session_distance_sums_segments() {
        let (tracker, _store) = tracker();
        let session = tracker.start_session("alice").await;
        let sid = Some(session.session_id.clone());

        // Equator polyline: two ~111.19 m segments
        for lng in [0.0, 0.001, 0.002] {
            tracker
                .record_position("alice", update(0.0, lng), sid.clone())
                .await;
        }

        let ended = tracker
            .end_session("alice", &session.session_id)
            .await
            .unwrap();
        assert!((ended.distance_km - 0.22).abs() <= 0.01, "{}", ended.distance_km);
        assert_eq!(ended.locations_count, 3);
        assert!(!ended.active);
        assert!(ended.ended_at.is_some());
    }

    #[tokio::test]
    async fn starting_a_session_closes_the_previous_one() {
        let (tracker, store) = tracker();

        let first = tracker.start_session("alice").await;
        let second = tracker.start_session("alice").await;
        assert_ne!(first.session_id, second.session_id);

        let guard = store.read().await;
        let active: Vec<_> = guard
            .sessions
            .values()
            .filter(|s| s.user_id == "alice" && s.active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, second.session_id);
        assert!(guard.sessions[&first.session_id].ended_at.is_some());
    }

    #[tokio::test]
    async fn ending_a_foreign_session_is_not_found() {
        let (tracker, _store) = tracker();
        let session = tracker.start_session("alice").await;

        let result = tracker.end_session("bob", &session.session_id).await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn ending_twice_is_idempotent() {
        let (tracker, _store) = tracker();
        let session = tracker.start_session("alice").await;
        tracker
            .record_position("alice", update(0.0, 0.0), Some(session.session_id.clone()))
            .await;
        tracker
            .record_position("alice", update(0.0, 0.001), Some(session.session_id.clone()))
            .await;

        let first = tracker.end_session("alice", &session.session_id).await.unwrap();
        let second = tracker.end_session("alice", &session.session_id).await.unwrap();
        assert_eq!(first.distance_km, second.distance_km);
        assert_eq!(first.ended_at, second.ended_at);
    }

    #[tokio::test]
    async fn counter_ignores_sessions_of_other_users() {
        let (tracker, store) = tracker();
        let alice_session = tracker.start_session("alice").await;

        // Bob feeds positions tagged with Alice's session id
        tracker
            .record_position("bob", update(1.0, 1.0), Some(alice_session.session_id.clone()))
            .await;

        let guard = store.read().await;
        assert_eq!(guard.sessions[&alice_session.session_id].locations_count, 0);
        assert_eq!(guard.samples.len(), 1);
    }

    #[tokio::test]
    async fn alerts_are_journaled_for_push() {
        let (tracker, store) = tracker();
        {
            let mut guard = store.write().await;
            guard.upsert_waypoint(Waypoint {
                id: "w1".to_string(),
                user_id: "alice".to_string(),
                name: "Clearing A".to_string(),
                pos: LatLng::new(46.8139, -71.2080),
                waypoint_type: None,
                color: None,
                icon: None,
                created_at: Utc::now(),
            });
        }

        let (_, alerts) = tracker
            .record_position("alice", update(46.8145, -71.2080), None)
            .await;
        assert_eq!(alerts.len(), 1);

        let guard = store.read().await;
        assert_eq!(guard.notifications.len(), 1);
        assert_eq!(guard.notifications[0].notification.body, alerts[0].message);
        assert_eq!(guard.alert_ledger.len(), 1);
    }
}
