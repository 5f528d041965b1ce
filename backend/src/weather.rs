use field_geo::LatLng;

use crate::state::WindData;

/// Raw wind report from the weather collaborator.
#[derive(Debug, Clone, Copy)]
pub struct WindReport {
    pub direction_deg: f64,
    pub speed_kmh: f64,
    pub gusts_kmh: f64,
}

/// Weather collaborator. The platform only needs current wind at a point;
/// when no real provider is wired up, a deterministic stub stands in so the
/// live view always has wind data.
#[derive(Debug, Clone, Default)]
pub struct WeatherService;

impl WeatherService {
    pub fn new() -> Self {
        Self
    }

    /// Current wind at a position. Stub implementation: derived from the
    /// coordinates, stable for a given position.
    pub async fn current_wind(&self, pos: LatLng) -> WindReport {
        let seed = (pos.lat.abs() * 7.31 + pos.lng.abs() * 13.97).fract();
        let direction_deg = (seed * 360.0 * 100.0).floor() % 360.0;
        let speed_kmh = 6.0 + (seed * 1000.0).floor() % 18.0;
        WindReport {
            direction_deg,
            speed_kmh,
            gusts_kmh: speed_kmh * 1.3,
        }
    }
}

/// Judge a wind report against the hunter's heading. Wind blowing into the
/// hunter's face carries scent away from the target area.
pub fn assess_wind(report: WindReport, heading: f64) -> WindData {
    let relative = (report.direction_deg - heading + 180.0).rem_euclid(360.0);
    let favorable = (135.0..=225.0).contains(&relative);

    let notes = if favorable {
        "Favorable wind, blowing toward you"
    } else {
        "Caution, wind at your back"
    };

    WindData {
        direction_deg: report.direction_deg,
        speed_kmh: (report.speed_kmh * 10.0).round() / 10.0,
        gusts_kmh: Some((report.gusts_kmh * 10.0).round() / 10.0),
        favorable,
        notes: Some(notes.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_wind_is_deterministic() {
        let pos = LatLng::new(46.8, -71.2);
        let svc = WeatherService::new();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let a = rt.block_on(svc.current_wind(pos));
        let b = rt.block_on(svc.current_wind(pos));
        assert_eq!(a.direction_deg, b.direction_deg);
        assert_eq!(a.speed_kmh, b.speed_kmh);
    }

    #[test]
    fn head_on_wind_is_favorable() {
        // Wind from the north; a hunter facing north takes it in the face
        let report = WindReport {
            direction_deg: 0.0,
            speed_kmh: 12.0,
            gusts_kmh: 15.0,
        };
        assert!(assess_wind(report, 0.0).favorable);

        // Facing south the same wind is at their back
        assert!(!assess_wind(report, 180.0).favorable);
    }
}
