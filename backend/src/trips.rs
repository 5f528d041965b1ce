//! Trip, visit, and observation logging.
//!
//! Real field data feeding the scoring and proximity engines. Trip lifecycle
//! is monotone: planned → in_progress → completed, with no way back. Ending a
//! trip denormalizes it into the analytics projection, back-fills its visits,
//! and requests a summary mail without blocking on the send.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use field_geo::LatLng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::mail::{Mailer, TripSummary};
use crate::state::{
    Observation, ObservationType, Trip, TripProjection, TripStatus, WaypointVisit,
};
use crate::store::SharedStore;

fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &uuid[..12])
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ─── Request payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TripCreate {
    #[serde(default)]
    pub title: Option<String>,
    pub target_species: String,
    #[serde(default)]
    pub planned_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub planned_waypoints: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripStart {
    pub trip_id: String,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripEnd {
    pub trip_id: String,
    pub success: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitCreate {
    pub waypoint_id: String,
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub departure_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub activity_level: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationCreate {
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub waypoint_id: Option<String>,
    pub observation_type: ObservationType,
    pub species: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub distance_meters: Option<f64>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub behavior: Option<String>,
    #[serde(default)]
    pub location: Option<LatLng>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_count() -> u32 {
    1
}

// ─── Statistics ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketStats {
    pub trips: u32,
    pub success: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TripStatistics {
    pub total_trips: u32,
    pub successful_trips: u32,
    pub success_rate: f64,
    pub total_hours: f64,
    pub average_duration: f64,
    pub total_observations: u32,
    pub total_waypoints_visited: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_visited_waypoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite_species: Option<String>,
    pub by_species: BTreeMap<String, BucketStats>,
    pub by_weather: BTreeMap<String, BucketStats>,
    pub by_month: BTreeMap<String, BucketStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaypointStatistics {
    pub waypoint_id: String,
    pub waypoint_name: String,
    pub total_visits: u32,
    pub successful_visits: u32,
    pub success_rate: f64,
    pub total_observations: u32,
    pub average_activity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_weather: Option<String>,
    pub species_observed: Vec<String>,
}

// ─── Trip logger ─────────────────────────────────────────────────────────────

pub struct TripLogger {
    store: SharedStore,
    mailer: Mailer,
}

impl TripLogger {
    pub fn new(store: SharedStore, mailer: Mailer) -> Self {
        Self { store, mailer }
    }

    // ── Trips ────────────────────────────────────────────────────────────────

    pub async fn create_trip(&self, user_id: &str, data: TripCreate) -> Trip {
        let now = Utc::now();
        let trip = Trip {
            trip_id: short_id("trip"),
            user_id: user_id.to_string(),
            title: data
                .title
                .unwrap_or_else(|| format!("{} outing", data.target_species)),
            target_species: data.target_species,
            status: TripStatus::Planned,
            planned_date: data.planned_date,
            start_time: None,
            end_time: None,
            duration_hours: None,
            weather: None,
            temperature: None,
            wind_speed: None,
            success: false,
            planned_waypoints: data.planned_waypoints,
            visited_waypoints: Vec::new(),
            observations_count: 0,
            notes: data.notes,
            created_at: now,
            updated_at: None,
        };

        let mut store = self.store.write().await;
        store.trips.insert(trip.trip_id.clone(), trip.clone());
        info!("Created trip {} for {user_id}", trip.trip_id);
        trip
    }

    pub async fn start_trip(&self, user_id: &str, data: TripStart) -> DomainResult<Trip> {
        let now = Utc::now();
        let mut store = self.store.write().await;
        store.get_owned_trip(user_id, &data.trip_id)?;

        let Some(trip) = store.trips.get_mut(&data.trip_id) else {
            return Err(DomainError::not_found(format!("trip {}", data.trip_id)));
        };

        if trip.status != TripStatus::Planned {
            return Err(DomainError::invalid_state(format!(
                "trip {} cannot start from status {:?}",
                trip.trip_id, trip.status
            )));
        }

        trip.status = TripStatus::InProgress;
        trip.start_time = Some(now);
        trip.updated_at = Some(now);
        if data.weather.is_some() {
            trip.weather = data.weather;
        }
        if data.temperature.is_some() {
            trip.temperature = data.temperature;
        }
        if data.wind_speed.is_some() {
            trip.wind_speed = data.wind_speed;
        }

        info!("Started trip {}", trip.trip_id);
        Ok(trip.clone())
    }

    /// End a trip: derive duration and observation count, persist completion,
    /// project into analytics, back-fill visit outcomes, then request a
    /// summary mail. The mail send runs detached and can never fail the end.
    pub async fn end_trip(&self, user_id: &str, data: TripEnd) -> DomainResult<Trip> {
        let now = Utc::now();
        let mut store = self.store.write().await;
        store.get_owned_trip(user_id, &data.trip_id)?;

        let obs_count = store
            .observations
            .iter()
            .filter(|o| o.trip_id.as_deref() == Some(data.trip_id.as_str()))
            .count() as u32;

        let Some(trip) = store.trips.get_mut(&data.trip_id) else {
            return Err(DomainError::not_found(format!("trip {}", data.trip_id)));
        };

        if trip.status != TripStatus::InProgress {
            return Err(DomainError::invalid_state(format!(
                "trip {} cannot end from status {:?}",
                trip.trip_id, trip.status
            )));
        }

        let duration_hours = trip
            .start_time
            .map(|start| round2((now - start).num_milliseconds() as f64 / 3_600_000.0))
            .unwrap_or(0.0);

        trip.status = TripStatus::Completed;
        trip.end_time = Some(now);
        trip.duration_hours = Some(duration_hours);
        trip.success = data.success;
        trip.observations_count = obs_count;
        trip.updated_at = Some(now);
        if data.notes.is_some() {
            trip.notes = data.notes;
        }

        let ended = trip.clone();

        // Analytics projection: denormalized copy for read-heavy consumers,
        // anchored at the first visited waypoint when one exists.
        let projection_pos = ended
            .visited_waypoints
            .first()
            .and_then(|wp_id| store.get_waypoint(user_id, wp_id).ok().map(|wp| wp.pos))
            .or_else(|| {
                store
                    .location_history(user_id, None, 1)
                    .first()
                    .map(|s| s.pos)
            });

        store.trip_projections.push(TripProjection {
            trip_id: ended.trip_id.clone(),
            user_id: user_id.to_string(),
            date: ended.planned_date.or(ended.start_time).unwrap_or(now),
            species: ended.target_species.clone(),
            pos: projection_pos,
            duration_hours,
            weather_conditions: ended.weather.clone(),
            temperature: ended.temperature,
            success: ended.success,
            observations: obs_count,
            created_at: now,
        });

        // Visit outcomes inherit the trip result
        for visit in store.visits.values_mut() {
            if visit.trip_id.as_deref() == Some(ended.trip_id.as_str()) {
                visit.success = ended.success;
                visit.weather = ended.weather.clone();
            }
        }

        let email = store.users.get(user_id).map(|u| u.email.clone());
        drop(store);

        let summary = TripSummary {
            trip_id: ended.trip_id.clone(),
            trip_title: ended.title.clone(),
            target_species: ended.target_species.clone(),
            duration_hours,
            observations_count: obs_count,
            success: ended.success,
            start_time: ended.start_time,
            end_time: ended.end_time,
            weather: ended.weather.clone(),
            notes: ended.notes.clone(),
        };
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            match email {
                Some(email) => mailer.send_trip_summary(&email, &summary).await,
                None => info!("No email on file for trip {}, mail skipped", summary.trip_id),
            }
        });

        info!(
            "Ended trip {} — success: {}, duration: {duration_hours}h",
            ended.trip_id, ended.success
        );
        Ok(ended)
    }

    pub async fn get_trip(&self, user_id: &str, trip_id: &str) -> DomainResult<Trip> {
        let store = self.store.read().await;
        store.get_owned_trip(user_id, trip_id).cloned()
    }

    pub async fn list_trips(
        &self,
        user_id: &str,
        status: Option<TripStatus>,
        limit: usize,
    ) -> Vec<Trip> {
        let store = self.store.read().await;
        let mut trips: Vec<Trip> = store
            .trips
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trips.truncate(limit);
        trips
    }

    pub async fn active_trip(&self, user_id: &str) -> Option<Trip> {
        let store = self.store.read().await;
        store
            .trips
            .values()
            .find(|t| t.user_id == user_id && t.status == TripStatus::InProgress)
            .cloned()
    }

    // ── Waypoint visits ──────────────────────────────────────────────────────

    pub async fn log_visit(&self, user_id: &str, data: VisitCreate) -> DomainResult<WaypointVisit> {
        let now = Utc::now();
        let mut store = self.store.write().await;

        if let Some(trip_id) = &data.trip_id {
            store.get_owned_trip(user_id, trip_id)?;
        }

        let waypoint_name = store
            .get_waypoint(user_id, &data.waypoint_id)
            .map(|wp| wp.name.clone())
            .unwrap_or_else(|_| "Unknown".to_string());

        let arrival_time = data.arrival_time.unwrap_or(now);
        if let Some(departure) = data.departure_time {
            if departure < arrival_time {
                return Err(DomainError::invalid_request(
                    "departure_time precedes arrival_time",
                ));
            }
        }

        let duration_minutes = data
            .departure_time
            .map(|departure| round1((departure - arrival_time).num_seconds() as f64 / 60.0));

        let visit = WaypointVisit {
            visit_id: short_id("visit"),
            user_id: user_id.to_string(),
            waypoint_id: data.waypoint_id.clone(),
            waypoint_name,
            trip_id: data.trip_id.clone(),
            arrival_time,
            departure_time: data.departure_time,
            duration_minutes,
            weather: data.weather,
            activity_level: data.activity_level,
            success: false,
            observations_count: 0,
            notes: data.notes,
            created_at: now,
        };

        store.visits.insert(visit.visit_id.clone(), visit.clone());

        if let Some(trip_id) = &data.trip_id {
            if let Some(trip) = store.trips.get_mut(trip_id) {
                if !trip.visited_waypoints.contains(&data.waypoint_id) {
                    trip.visited_waypoints.push(data.waypoint_id.clone());
                }
            }
        }

        info!("Logged visit {} to waypoint {}", visit.visit_id, visit.waypoint_id);
        Ok(visit)
    }

    pub async fn end_visit(
        &self,
        user_id: &str,
        visit_id: &str,
        success: bool,
        notes: Option<String>,
    ) -> DomainResult<WaypointVisit> {
        let now = Utc::now();
        let mut store = self.store.write().await;

        let Some(existing) = store
            .visits
            .get(visit_id)
            .filter(|v| v.user_id == user_id)
            .cloned()
        else {
            return Err(DomainError::not_found(format!("visit {visit_id}")));
        };

        // Observations made at the waypoint during the stay
        let obs_count = store
            .observations
            .iter()
            .filter(|o| {
                o.user_id == user_id
                    && o.waypoint_id.as_deref() == Some(existing.waypoint_id.as_str())
                    && o.timestamp >= existing.arrival_time
                    && o.timestamp <= now
            })
            .count() as u32;

        let Some(visit) = store.visits.get_mut(visit_id) else {
            return Err(DomainError::not_found(format!("visit {visit_id}")));
        };

        visit.departure_time = Some(now);
        visit.duration_minutes =
            Some(round1((now - visit.arrival_time).num_seconds() as f64 / 60.0));
        visit.success = success;
        visit.observations_count = obs_count;
        if notes.is_some() {
            visit.notes = notes;
        }

        Ok(visit.clone())
    }

    pub async fn list_visits(
        &self,
        user_id: &str,
        waypoint_id: Option<&str>,
        limit: usize,
    ) -> Vec<WaypointVisit> {
        let store = self.store.read().await;
        let mut visits: Vec<WaypointVisit> = store
            .visits
            .values()
            .filter(|v| v.user_id == user_id)
            .filter(|v| waypoint_id.map(|w| v.waypoint_id == w).unwrap_or(true))
            .cloned()
            .collect();
        visits.sort_by(|a, b| b.arrival_time.cmp(&a.arrival_time));
        visits.truncate(limit);
        visits
    }

    // ── Observations ─────────────────────────────────────────────────────────

    pub async fn log_observation(
        &self,
        user_id: &str,
        data: ObservationCreate,
    ) -> DomainResult<Observation> {
        let now = Utc::now();
        let mut store = self.store.write().await;

        if let Some(trip_id) = &data.trip_id {
            store.get_owned_trip(user_id, trip_id)?;
        }

        let observation = Observation {
            observation_id: short_id("obs"),
            user_id: user_id.to_string(),
            trip_id: data.trip_id.clone(),
            waypoint_id: data.waypoint_id,
            observation_type: data.observation_type,
            species: data.species,
            count: data.count,
            distance_meters: data.distance_meters,
            direction: data.direction,
            behavior: data.behavior,
            location: data.location,
            notes: data.notes,
            timestamp: now,
        };

        store.observations.push(observation.clone());

        if let Some(trip_id) = &data.trip_id {
            if let Some(trip) = store.trips.get_mut(trip_id) {
                trip.observations_count += 1;
                // A harvest seals the outcome
                if data.observation_type == ObservationType::Harvest {
                    trip.success = true;
                }
            }
        }

        info!(
            "Logged observation {} ({:?} of {})",
            observation.observation_id, observation.observation_type, observation.species
        );
        Ok(observation)
    }

    pub async fn list_observations(
        &self,
        user_id: &str,
        trip_id: Option<&str>,
        waypoint_id: Option<&str>,
        species: Option<&str>,
        limit: usize,
    ) -> Vec<Observation> {
        let store = self.store.read().await;
        let mut observations: Vec<Observation> = store
            .observations
            .iter()
            .filter(|o| o.user_id == user_id)
            .filter(|o| trip_id.map(|t| o.trip_id.as_deref() == Some(t)).unwrap_or(true))
            .filter(|o| {
                waypoint_id
                    .map(|w| o.waypoint_id.as_deref() == Some(w))
                    .unwrap_or(true)
            })
            .filter(|o| species.map(|s| o.species == s).unwrap_or(true))
            .cloned()
            .collect();
        observations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        observations.truncate(limit);
        observations
    }

    // ── Statistics ───────────────────────────────────────────────────────────

    pub async fn statistics(&self, user_id: &str) -> TripStatistics {
        let store = self.store.read().await;
        let completed: Vec<&Trip> = store
            .trips
            .values()
            .filter(|t| t.user_id == user_id && t.status == TripStatus::Completed)
            .collect();

        if completed.is_empty() {
            return TripStatistics::default();
        }

        let total_trips = completed.len() as u32;
        let successful_trips = completed.iter().filter(|t| t.success).count() as u32;
        let total_hours: f64 = completed.iter().filter_map(|t| t.duration_hours).sum();
        let total_observations: u32 = completed.iter().map(|t| t.observations_count).sum();

        let mut by_species: BTreeMap<String, BucketStats> = BTreeMap::new();
        let mut by_weather: BTreeMap<String, BucketStats> = BTreeMap::new();
        let mut by_month: BTreeMap<String, BucketStats> = BTreeMap::new();
        let mut waypoint_counts: BTreeMap<String, u32> = BTreeMap::new();

        for trip in &completed {
            let species = by_species.entry(trip.target_species.clone()).or_default();
            species.trips += 1;
            if trip.success {
                species.success += 1;
            }

            let weather_key = trip.weather.clone().unwrap_or_else(|| "unknown".to_string());
            let weather = by_weather.entry(weather_key).or_default();
            weather.trips += 1;
            if trip.success {
                weather.success += 1;
            }

            if let Some(date) = trip.planned_date.or(trip.start_time) {
                let month = by_month
                    .entry(format!("{:04}-{:02}", date.year(), date.month()))
                    .or_default();
                month.trips += 1;
                if trip.success {
                    month.success += 1;
                }
            }

            for wp in &trip.visited_waypoints {
                *waypoint_counts.entry(wp.clone()).or_default() += 1;
            }
        }

        let total_waypoints_visited: u32 = waypoint_counts.values().sum();
        let most_visited_waypoint = waypoint_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(wp, _)| wp.clone());
        let favorite_species = by_species
            .iter()
            .max_by_key(|(_, stats)| stats.trips)
            .map(|(species, _)| species.clone());

        TripStatistics {
            total_trips,
            successful_trips,
            success_rate: round1(successful_trips as f64 / total_trips as f64 * 100.0),
            total_hours: round1(total_hours),
            average_duration: round1(total_hours / total_trips as f64),
            total_observations,
            total_waypoints_visited,
            most_visited_waypoint,
            favorite_species,
            by_species,
            by_weather,
            by_month,
        }
    }

    pub async fn waypoint_statistics(
        &self,
        user_id: &str,
        waypoint_id: &str,
    ) -> DomainResult<WaypointStatistics> {
        let store = self.store.read().await;
        let visits: Vec<&WaypointVisit> = store
            .visits
            .values()
            .filter(|v| v.user_id == user_id && v.waypoint_id == waypoint_id)
            .collect();

        if visits.is_empty() {
            return Err(DomainError::not_found(format!(
                "visits for waypoint {waypoint_id}"
            )));
        }

        let waypoint_name = store
            .get_waypoint(user_id, waypoint_id)
            .map(|wp| wp.name.clone())
            .unwrap_or_else(|_| "Unknown".to_string());

        let total_visits = visits.len() as u32;
        let successful_visits = visits.iter().filter(|v| v.success).count() as u32;
        let total_observations: u32 = visits.iter().map(|v| v.observations_count).sum();

        let activity: Vec<f64> = visits
            .iter()
            .filter_map(|v| v.activity_level.map(|a| a as f64))
            .collect();
        let average_activity = if activity.is_empty() {
            0.0
        } else {
            round1(activity.iter().sum::<f64>() / activity.len() as f64)
        };

        // Best weather needs at least two visits under that label to count
        let mut weather_buckets: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
        for visit in &visits {
            let label = visit.weather.as_deref().unwrap_or("unknown");
            let bucket = weather_buckets.entry(label).or_default();
            bucket.0 += 1;
            if visit.success {
                bucket.1 += 1;
            }
        }
        let best_weather = weather_buckets
            .iter()
            .filter(|(_, (visits, _))| *visits >= 2)
            .max_by(|a, b| {
                let rate_a = a.1 .1 as f64 / a.1 .0 as f64;
                let rate_b = b.1 .1 as f64 / b.1 .0 as f64;
                rate_a.partial_cmp(&rate_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(label, _)| label.to_string());

        let mut species_observed: Vec<String> = store
            .observations
            .iter()
            .filter(|o| o.user_id == user_id && o.waypoint_id.as_deref() == Some(waypoint_id))
            .map(|o| o.species.clone())
            .collect();
        species_observed.sort();
        species_observed.dedup();

        Ok(WaypointStatistics {
            waypoint_id: waypoint_id.to_string(),
            waypoint_name,
            total_visits,
            successful_visits,
            success_rate: round1(successful_visits as f64 / total_visits as f64 * 100.0),
            total_observations,
            average_activity,
            best_weather,
            species_observed,
        })
    }
}
