//! POI visibility filtering for the live heading view.
//!
//! Projects the user's waypoint catalogue into POIs, keeps the ones inside
//! the current view cone, and ranks them by distance. A small demo set can be
//! synthesized when nothing real is visible; that path is gated by
//! configuration and must stay off in production.

use field_geo::{destination, point_in_cone, LatLng};

use crate::state::{Poi, ViewCone, Waypoint};

/// Candidate cap per refresh. A spatial index would narrow this server-side;
/// correctness only requires scanning a bounded set.
const MAX_CANDIDATES: usize = 100;

/// Visible list cap after ranking.
const MAX_VISIBLE: usize = 20;

/// Intrinsic priority of a POI by its type. Stands and blinds matter most,
/// generic waypoints least.
pub fn poi_priority(poi_type: Option<&str>) -> u8 {
    match poi_type.unwrap_or("waypoint") {
        "stand" | "blind" => 9,
        "feeding_zone" | "sign" => 8,
        "bedding_zone" | "observation" => 7,
        "camera" | "water_source" => 6,
        "trail" => 5,
        _ => 4,
    }
}

fn poi_icon(poi_type: Option<&str>) -> &'static str {
    match poi_type.unwrap_or("waypoint") {
        "stand" => "🌲",
        "blind" => "🏕️",
        "feeding_zone" => "🍽️",
        "bedding_zone" => "🛏️",
        "water_source" => "💧",
        "trail" => "👣",
        "camera" => "📷",
        "observation" => "👁️",
        "sign" => "🦌",
        _ => "📍",
    }
}

/// Project a catalogue waypoint into an unranked POI.
pub fn waypoint_to_poi(wp: &Waypoint) -> Poi {
    Poi {
        id: wp.id.clone(),
        name: wp.name.clone(),
        pos: wp.pos,
        poi_type: wp.waypoint_type.clone(),
        icon: wp
            .icon
            .clone()
            .or_else(|| Some(poi_icon(wp.waypoint_type.as_deref()).to_string())),
        color: wp.color.clone(),
        priority: poi_priority(wp.waypoint_type.as_deref()),
        visible_in_cone: false,
        distance_m: 0.0,
        bearing: 0.0,
        relative_angle: 0.0,
    }
}

/// Candidate POIs for a user, capped.
pub fn candidate_pois(store: &crate::store::TelemetryStore, user_id: &str) -> Vec<Poi> {
    store
        .list_waypoints(user_id)
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(waypoint_to_poi)
        .collect()
}

/// Keep the candidates inside the cone, annotate them, and rank by ascending
/// distance. Ties keep input order (stable sort), output capped at 20.
pub fn filter_visible(candidates: Vec<Poi>, apex: LatLng, cone: &ViewCone) -> Vec<Poi> {
    let mut visible: Vec<Poi> = candidates
        .into_iter()
        .filter_map(|mut poi| {
            let check = point_in_cone(
                apex,
                cone.direction,
                cone.aperture_degrees,
                cone.range_meters,
                poi.pos,
            );
            if !check.inside {
                return None;
            }
            poi.visible_in_cone = true;
            poi.distance_m = (check.distance_m * 10.0).round() / 10.0;
            poi.bearing = field_geo::initial_bearing(apex, poi.pos);
            poi.relative_angle = (check.relative_angle_deg * 10.0).round() / 10.0;
            Some(poi)
        })
        .collect();

    visible.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    visible.truncate(MAX_VISIBLE);
    visible
}

/// Deterministic demo POIs spread inside the cone. Optional behavior for
/// empty catalogues; disabled unless explicitly configured on.
pub fn demo_pois(apex: LatLng, cone: &ViewCone) -> Vec<Poi> {
    let placements: [(f64, f64, &str, &str); 5] = [
        (-0.35, 0.25, "trail", "Trail crossing"),
        (-0.15, 0.45, "feeding_zone", "Feeding zone"),
        (0.0, 0.6, "stand", "Tree stand"),
        (0.2, 0.35, "water_source", "Water source"),
        (0.4, 0.75, "sign", "Fresh sign"),
    ];

    let pois = placements
        .iter()
        .enumerate()
        .map(|(i, (angle_frac, range_frac, poi_type, name))| {
            let bearing =
                (cone.direction + angle_frac * cone.aperture_degrees).rem_euclid(360.0);
            let distance = range_frac * cone.range_meters;
            let pos = destination(apex, bearing, distance);
            Poi {
                id: format!("demo-{i}"),
                name: format!("{name} (demo)"),
                pos,
                poi_type: Some(poi_type.to_string()),
                icon: Some(poi_icon(Some(poi_type)).to_string()),
                color: None,
                priority: poi_priority(Some(poi_type)),
                visible_in_cone: false,
                distance_m: 0.0,
                bearing: 0.0,
                relative_angle: 0.0,
            }
        })
        .collect();

    filter_visible(pois, apex, cone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const APEX: LatLng = LatLng {
        lat: 46.8,
        lng: -71.2,
    };

    fn cone(direction: f64) -> ViewCone {
        ViewCone {
            aperture_degrees: 60.0,
            range_meters: 500.0,
            direction,
            vertices: vec![],
        }
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

    #[test]
    fn filters_by_aperture_and_range() {
        let candidates = vec![
            waypoint_to_poi(&waypoint_at("inside", 20.0, 300.0, None)),
            waypoint_to_poi(&waypoint_at("too-wide", 40.0, 300.0, None)),
            waypoint_to_poi(&waypoint_at("too-far", 0.0, 600.0, None)),
        ];

        let visible = filter_visible(candidates, APEX, &cone(0.0));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "inside");
        assert!(visible[0].visible_in_cone);
        assert!(visible[0].distance_m <= 500.0);
        assert!(visible[0].relative_angle.abs() <= 30.0);
    }

    #[test]
    fn ranked_by_ascending_distance() {
        let candidates = vec![
            waypoint_to_poi(&waypoint_at("far", 10.0, 400.0, None)),
            waypoint_to_poi(&waypoint_at("near", -10.0, 100.0, None)),
            waypoint_to_poi(&waypoint_at("mid", 0.0, 250.0, None)),
        ];

        let visible = filter_visible(candidates, APEX, &cone(0.0));
        let ids: Vec<&str> = visible.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["near", "mid", "far"]);
    }

    #[test]
    fn truncates_to_twenty() {
        let candidates: Vec<Poi> = (0..30)
            .map(|i| {
                waypoint_to_poi(&waypoint_at(
                    &format!("wp{i}"),
                    i as f64 - 15.0,
                    50.0 + i as f64 * 10.0,
                    None,
                ))
            })
            .collect();

        let visible = filter_visible(candidates, APEX, &cone(0.0));
        assert_eq!(visible.len(), 20);
    }

    #[test]
    fn priority_table_by_type() {
        assert_eq!(poi_priority(Some("stand")), 9);
        assert_eq!(poi_priority(Some("feeding_zone")), 8);
        assert_eq!(poi_priority(Some("trail")), 5);
        assert_eq!(poi_priority(None), 4);
        assert_eq!(poi_priority(Some("something-else")), 4);
    }

    #[test]
    fn demo_set_is_inside_the_cone_and_deterministic() {
        let first = demo_pois(APEX, &cone(90.0));
        let second = demo_pois(APEX, &cone(90.0));

        assert!(!first.is_empty());
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.pos, b.pos);
        }
        for poi in &first {
            assert!(poi.visible_in_cone);
            assert!(poi.distance_m <= 500.0);
            assert!(poi.relative_angle.abs() <= 30.0);
        }
    }
}
