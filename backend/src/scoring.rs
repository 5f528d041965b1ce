//! Waypoint Quality Scoring.
//!
//! Combines four weighted sub-scores over the completed-trip projections
//! recorded near a waypoint into a single 0–100 score and classification.
//! Given the same store snapshot the output is bit-exact across runs: every
//! iteration that feeds an average runs in sorted order.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::DomainResult;
use crate::state::{
    Classification, HeatmapPoint, SuccessForecast, TripProjection, WaypointQualityScore,
};
use crate::store::TelemetryStore;

// Sub-score weights; must sum to 1.0.
const WEIGHT_SUCCESS_HISTORY: f64 = 0.40;
const WEIGHT_WEATHER: f64 = 0.25;
const WEIGHT_ACTIVITY: f64 = 0.20;
const WEIGHT_ACCESSIBILITY: f64 = 0.15;

/// Trips are attributed to a waypoint when their coordinates fall within
/// this radius of it.
const NEARBY_RADIUS_KM: f64 = 0.5;

/// Historical success rate expected under each weather label.
pub fn expected_weather_rate(label: &str) -> f64 {
    match label {
        "Sunny" => 0.75,
        "Cloudy" => 0.85,
        "Rainy" => 0.45,
        "Foggy" => 0.65,
        "Snowy" => 0.55,
        _ => 0.5,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ─── WQS Calculation ─────────────────────────────────────────────────────────

pub fn calculate_wqs(
    store: &TelemetryStore,
    user_id: &str,
    waypoint_id: &str,
    now: DateTime<Utc>,
) -> DomainResult<WaypointQualityScore> {
    let waypoint = store.get_waypoint(user_id, waypoint_id)?;
    let nearby = store.projections_near(user_id, waypoint.pos, NEARBY_RADIUS_KM);

    let (success_score, total, successful, success_rate, last_visit) = success_history(&nearby);
    let weather_score = weather_correlation(&nearby);
    let activity_score = activity(&nearby, now);
    let accessibility_score = accessibility(&nearby, now);

    let total_score = round1(
        success_score * WEIGHT_SUCCESS_HISTORY
            + weather_score * WEIGHT_WEATHER
            + activity_score * WEIGHT_ACTIVITY
            + accessibility_score * WEIGHT_ACCESSIBILITY,
    );

    Ok(WaypointQualityScore {
        waypoint_id: waypoint.id.clone(),
        waypoint_name: waypoint.name.clone(),
        total_score,
        success_history_score: round1(success_score),
        weather_score: round1(weather_score),
        activity_score: round1(activity_score),
        accessibility_score: round1(accessibility_score),
        total_visits: total,
        successful_visits: successful,
        success_rate: round1(success_rate),
        last_visit,
        classification: Classification::from_score(total_score),
    })
}

/// Success history, weight 0.40. Neutral 50 with no data; otherwise the raw
/// success rate plus a small volume bonus.
fn success_history(trips: &[&TripProjection]) -> (f64, u32, u32, f64, Option<DateTime<Utc>>) {
    if trips.is_empty() {
        return (50.0, 0, 0, 0.0, None);
    }

    let total = trips.len() as u32;
    let successful = trips.iter().filter(|t| t.success).count() as u32;
    let success_rate = successful as f64 / total as f64 * 100.0;

    let volume_bonus = (total as f64 * 0.5).min(10.0);
    let score = (success_rate + volume_bonus).min(100.0);

    let last_visit = trips.iter().map(|t| t.date).max();

    (score, total, successful, success_rate, last_visit)
}

/// Weather correlation, weight 0.25. For each observed weather label, compare
/// the actual success rate with the expected one; average across labels in
/// sorted order.
fn weather_correlation(trips: &[&TripProjection]) -> f64 {
    if trips.is_empty() {
        return 50.0;
    }

    let mut by_weather: std::collections::BTreeMap<&str, (u32, u32)> = Default::default();
    for trip in trips {
        let label = trip.weather_conditions.as_deref().unwrap_or("Unknown");
        let entry = by_weather.entry(label).or_insert((0, 0));
        entry.0 += 1;
        if trip.success {
            entry.1 += 1;
        }
    }

    let mut scores = Vec::new();
    for (label, (total, successful)) in &by_weather {
        if *total == 0 {
            continue;
        }
        let actual = *successful as f64 / *total as f64;
        let expected = expected_weather_rate(label);
        let score = (actual / expected.max(0.1) * 50.0 + 25.0).clamp(0.0, 100.0);
        scores.push(score);
    }

    if scores.is_empty() {
        50.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// Animal activity, weight 0.20. Driven by observation density, with a bonus
/// for activity in the last 30 days.
fn activity(trips: &[&TripProjection], now: DateTime<Utc>) -> f64 {
    if trips.is_empty() {
        return 50.0;
    }

    let total_obs: u32 = trips.iter().map(|t| t.observations).sum();
    let avg_obs = total_obs as f64 / trips.len() as f64;

    let mut score = (avg_obs * 20.0).min(100.0);

    let recent = trips.iter().any(|t| (now - t.date).num_days() < 30);
    if recent {
        score = (score + 10.0).min(100.0);
    }

    score
}

/// Accessibility / frequency, weight 0.15. New waypoints with no trips get a
/// moderate 40.
fn accessibility(trips: &[&TripProjection], now: DateTime<Utc>) -> f64 {
    if trips.is_empty() {
        return 40.0;
    }

    let total = trips.len() as f64;
    let recent_90d = trips
        .iter()
        .filter(|t| (now - t.date).num_days() < 90)
        .count() as f64;

    let frequency = (total * 5.0).min(50.0);
    let recency = (recent_90d * 10.0).min(50.0);

    frequency + recency
}

// ─── Catalogue-wide projections ──────────────────────────────────────────────

/// Score every waypoint of a user, best first.
pub fn score_all(
    store: &TelemetryStore,
    user_id: &str,
    now: DateTime<Utc>,
) -> Vec<WaypointQualityScore> {
    let mut scores: Vec<WaypointQualityScore> = store
        .list_waypoints(user_id)
        .iter()
        .filter_map(|wp| calculate_wqs(store, user_id, &wp.id, now).ok())
        .collect();
    scores.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.waypoint_id.cmp(&b.waypoint_id))
    });
    scores
}

/// All waypoints with WQS as heatmap intensity (0–1).
pub fn heatmap(store: &TelemetryStore, user_id: &str, now: DateTime<Utc>) -> Vec<HeatmapPoint> {
    store
        .list_waypoints(user_id)
        .iter()
        .filter_map(|wp| {
            let wqs = calculate_wqs(store, user_id, &wp.id, now).ok()?;
            Some(HeatmapPoint {
                pos: wp.pos,
                intensity: wqs.total_score / 100.0,
                waypoint_id: wp.id.clone(),
                waypoint_name: wp.name.clone(),
                wqs: wqs.total_score,
            })
        })
        .collect()
}

// ─── Success Forecast ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    #[serde(default)]
    pub weather_conditions: Option<String>,
    #[serde(default)]
    pub target_hour: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Deterministic success probability estimate for the user's next outing.
pub fn forecast(
    store: &TelemetryStore,
    user_id: &str,
    request: &ForecastRequest,
    now: DateTime<Utc>,
) -> SuccessForecast {
    let all = score_all(store, user_id, now);

    let Some(best) = all.into_iter().next() else {
        return SuccessForecast {
            probability: 0.0,
            confidence: "low".to_string(),
            best_waypoint: None,
            favorable_conditions: vec!["No waypoints recorded".to_string()],
            unfavorable_conditions: vec![],
        };
    };

    let base_prob = best.total_score * 0.6;

    let mut favorable = Vec::new();
    let mut unfavorable = Vec::new();

    let mut weather_mod = 0.0;
    if let Some(weather) = &request.weather_conditions {
        let rate = expected_weather_rate(weather);
        weather_mod = (rate - 0.5) * 40.0;
        if rate >= 0.7 {
            favorable.push(format!("Favorable weather: {weather}"));
        } else if rate < 0.5 {
            unfavorable.push(format!("Unfavorable weather: {weather}"));
        }
    }

    let mut time_mod = 0.0;
    let target_hour = request
        .target_hour
        .unwrap_or_else(|| chrono::Timelike::hour(&now));
    match target_hour {
        5..=7 | 16..=18 => {
            time_mod += 15.0;
            favorable.push("Prime window (dawn/dusk)".to_string());
        }
        8..=11 => {
            time_mod += 5.0;
            favorable.push("Good window (morning)".to_string());
        }
        19..=23 | 0..=4 => {
            time_mod -= 10.0;
            unfavorable.push("Poor window (night)".to_string());
        }
        _ => {}
    }

    if let Some(temp) = request.temperature {
        if (-5.0..=15.0).contains(&temp) {
            time_mod += 5.0;
            favorable.push(format!("Ideal temperature: {temp}°C"));
        } else if !(-15.0..=25.0).contains(&temp) {
            time_mod -= 10.0;
            unfavorable.push(format!("Extreme temperature: {temp}°C"));
        }
    }

    let probability = round1((base_prob + weather_mod + time_mod).clamp(5.0, 95.0));

    let confidence = if best.total_visits >= 10 {
        "high"
    } else if best.total_visits >= 3 {
        "medium"
    } else {
        "low"
    };

    SuccessForecast {
        probability,
        confidence: confidence.to_string(),
        best_waypoint: Some(best),
        favorable_conditions: favorable,
        unfavorable_conditions: unfavorable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Waypoint;
    use chrono::Duration;
    use field_geo::LatLng;

    const CENTER: LatLng = LatLng {
        lat: 46.8139,
        lng: -71.2080,
    };

    fn store_with_waypoint() -> TelemetryStore {
        let mut store = TelemetryStore::default();
        store.upsert_waypoint(Waypoint {
            id: "w1".to_string(),
            user_id: "alice".to_string(),
            name: "Clearing A".to_string(),
            pos: CENTER,
            waypoint_type: Some("stand".to_string()),
            color: None,
            icon: None,
            created_at: Utc::now(),
        });
        store
    }

    fn projection(
        i: usize,
        days_ago: i64,
        weather: &str,
        success: bool,
        observations: u32,
        now: DateTime<Utc>,
    ) -> TripProjection {
        TripProjection {
            trip_id: format!("t{i}"),
            user_id: "alice".to_string(),
            date: now - Duration::days(days_ago),
            species: "deer".to_string(),
            pos: Some(field_geo::destination(CENTER, (i as f64 * 40.0) % 360.0, 100.0)),
            duration_hours: 3.0,
            weather_conditions: Some(weather.to_string()),
            temperature: Some(5.0),
            success,
            observations,
            created_at: now,
        }
    }

    #[test]
    fn baseline_score_with_no_nearby_trips() {
        let store = store_with_waypoint();
        let wqs = calculate_wqs(&store, "alice", "w1", Utc::now()).unwrap();

        // 0.40·50 + 0.25·50 + 0.20·50 + 0.15·40 = 46.0
        assert_eq!(wqs.total_score, 46.0);
        assert_eq!(wqs.classification, Classification::Standard);
        assert_eq!(wqs.total_visits, 0);
        assert!(wqs.last_visit.is_none());
    }

    #[test]
    fn repeated_calls_are_bit_exact() {
        let now = Utc::now();
        let mut store = store_with_waypoint();
        for i in 0..12 {
            store.trip_projections.push(projection(
                i,
                (i as i64 * 11) % 120,
                ["Cloudy", "Sunny", "Rainy"][i % 3],
                i % 2 == 0,
                (i % 5) as u32,
                now,
            ));
        }

        let first = calculate_wqs(&store, "alice", "w1", now).unwrap();
        for _ in 0..10 {
            let again = calculate_wqs(&store, "alice", "w1", now).unwrap();
            assert_eq!(again.total_score, first.total_score);
            assert_eq!(again.classification, first.classification);
            assert_eq!(again.weather_score, first.weather_score);
        }
    }

    #[test]
    fn strong_recent_history_classifies_hotspot() {
        let now = Utc::now();
        let mut store = store_with_waypoint();
        for i in 0..20 {
            store
                .trip_projections
                .push(projection(i, (i as i64) % 25, "Cloudy", true, 6, now));
        }

        let wqs = calculate_wqs(&store, "alice", "w1", now).unwrap();
        assert!(wqs.total_score >= 75.0, "score {}", wqs.total_score);
        assert_eq!(wqs.classification, Classification::Hotspot);
        assert_eq!(wqs.total_visits, 20);
        assert_eq!(wqs.successful_visits, 20);
    }

    #[test]
    fn trips_outside_half_km_are_ignored() {
        let now = Utc::now();
        let mut store = store_with_waypoint();
        let mut p = projection(0, 5, "Cloudy", true, 8, now);
        p.pos = Some(field_geo::destination(CENTER, 0.0, 800.0));
        store.trip_projections.push(p);

        let wqs = calculate_wqs(&store, "alice", "w1", now).unwrap();
        assert_eq!(wqs.total_visits, 0);
        assert_eq!(wqs.total_score, 46.0);
    }

    #[test]
    fn unknown_waypoint_is_not_found() {
        let store = store_with_waypoint();
        assert!(calculate_wqs(&store, "alice", "missing", Utc::now()).is_err());
        assert!(calculate_wqs(&store, "bob", "w1", Utc::now()).is_err());
    }

    #[test]
    fn forecast_with_no_waypoints_is_low_confidence() {
        let store = TelemetryStore::default();
        let fc = forecast(
            &store,
            "alice",
            &ForecastRequest {
                weather_conditions: None,
                target_hour: None,
                temperature: None,
            },
            Utc::now(),
        );
        assert_eq!(fc.probability, 0.0);
        assert_eq!(fc.confidence, "low");
        assert!(fc.best_waypoint.is_none());
    }

    #[test]
    fn forecast_rewards_dawn_and_cloudy_weather() {
        let now = Utc::now();
        let mut store = store_with_waypoint();
        for i in 0..12 {
            store
                .trip_projections
                .push(projection(i, (i as i64) % 60, "Cloudy", i % 2 == 0, 4, now));
        }

        let dawn = forecast(
            &store,
            "alice",
            &ForecastRequest {
                weather_conditions: Some("Cloudy".to_string()),
                target_hour: Some(6),
                temperature: Some(5.0),
            },
            now,
        );
        let night = forecast(
            &store,
            "alice",
            &ForecastRequest {
                weather_conditions: Some("Rainy".to_string()),
                target_hour: Some(23),
                temperature: Some(-20.0),
            },
            now,
        );

        assert!(dawn.probability > night.probability);
        assert_eq!(dawn.confidence, "high");
        assert!((5.0..=95.0).contains(&dawn.probability));
        assert!((5.0..=95.0).contains(&night.probability));
    }
}
