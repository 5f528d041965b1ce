use std::collections::HashSet;

use chrono::{DateTime, Utc};
use field_geo::LatLng;
use serde::{Deserialize, Serialize};

// ─── Waypoint Catalogue ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(flatten)]
    pub pos: LatLng,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub waypoint_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─── Trips, Visits, Observations ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: String,
    pub user_id: String,
    pub title: String,
    pub target_species: String,
    pub status: TripStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    pub success: bool,
    pub planned_waypoints: Vec<String>,
    pub visited_waypoints: Vec<String>,
    pub observations_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointVisit {
    pub visit_id: String,
    pub user_id: String,
    pub waypoint_id: String,
    pub waypoint_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    pub arrival_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    /// Observed animal activity on a 0–10 scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<u8>,
    pub success: bool,
    pub observations_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Sighting,
    Tracks,
    Sounds,
    Signs,
    Harvest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waypoint_id: Option<String>,
    pub observation_type: ObservationType,
    pub species: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Denormalized completed-trip record for read-heavy consumers. This is the
/// snapshot the WQS calculator scores against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripProjection {
    pub trip_id: String,
    pub user_id: String,
    pub date: DateTime<Utc>,
    pub species: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<LatLng>,
    pub duration_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_conditions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub success: bool,
    pub observations: u32,
    pub created_at: DateTime<Utc>,
}

// ─── Location Tracking ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub pos: LatLng,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSession {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub locations_count: u32,
    pub distance_km: f64,
    pub active: bool,
}

// ─── Push ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: std::collections::HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Journaled,
    Delivered,
    Deferred,
    FailedSubscriptionGone,
    FailedTransient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub notification: PushNotification,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
    pub status: DeliveryStatus,
}

// ─── Proximity Alerts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Weak,
    Standard,
    Good,
    Hotspot,
}

impl Classification {
    /// Band thresholds apply to the already-rounded total score.
    pub fn from_score(total_score: f64) -> Self {
        if total_score >= 75.0 {
            Classification::Hotspot
        } else if total_score >= 55.0 {
            Classification::Good
        } else if total_score >= 35.0 {
            Classification::Standard
        } else {
            Classification::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Hotspot => "hotspot",
            Classification::Good => "good",
            Classification::Standard => "standard",
            Classification::Weak => "weak",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityAlert {
    pub waypoint_id: String,
    pub waypoint_name: String,
    pub waypoint_type: String,
    pub distance_meters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wqs_score: Option<f64>,
    pub classification: Classification,
    pub alert_type: String,
    pub message: String,
}

/// Dedup ledger row. One exists for `(user_id, waypoint_id)` iff an alert was
/// emitted for that pair within the cool-down window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityAlertRecord {
    pub user_id: String,
    pub waypoint_id: String,
    pub alert: ProximityAlert,
    pub created_at: DateTime<Utc>,
}

// ─── WQS Reports ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointQualityScore {
    pub waypoint_id: String,
    pub waypoint_name: String,
    pub total_score: f64,
    pub success_history_score: f64,
    pub weather_score: f64,
    pub activity_score: f64,
    pub accessibility_score: f64,
    pub total_visits: u32,
    pub successful_visits: u32,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<DateTime<Utc>>,
    pub classification: Classification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapPoint {
    #[serde(flatten)]
    pub pos: LatLng,
    pub intensity: f64,
    pub waypoint_id: String,
    pub waypoint_name: String,
    pub wqs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessForecast {
    pub probability: f64,
    pub confidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_waypoint: Option<WaypointQualityScore>,
    pub favorable_conditions: Vec<String>,
    pub unfavorable_conditions: Vec<String>,
}

// ─── Live Heading View ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingState {
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPosition {
    #[serde(flatten)]
    pub pos: LatLng,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub heading: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewCone {
    pub aperture_degrees: f64,
    pub range_meters: f64,
    pub direction: f64,
    /// Apex followed by the arc points, regenerated on every move.
    pub vertices: Vec<LatLng>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindData {
    pub direction_deg: f64,
    pub speed_kmh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gusts_kmh: Option<f64>,
    pub favorable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub pos: LatLng,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub poi_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub priority: u8,
    pub visible_in_cone: bool,
    pub distance_m: f64,
    pub bearing: f64,
    pub relative_angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingAlertType {
    WindChange,
    PoiNearby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingAlert {
    pub id: String,
    pub alert_type: HeadingAlertType,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingSession {
    pub id: String,
    pub user_id: String,
    pub state: HeadingState,
    pub position: GeoPosition,
    pub view_cone: ViewCone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind: Option<WindData>,
    pub visible_pois: Vec<Poi>,
    pub alerts: Vec<HeadingAlert>,
    pub pois_visited: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub distance_traveled_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingSummary {
    pub session_id: String,
    pub user_id: String,
    pub duration_seconds: i64,
    pub distance_traveled_m: f64,
    pub pois_visited: usize,
    pub alerts_received: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

// ─── Group Sharing & Chat ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    pub user_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPositionShare {
    pub group_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub pos: LatLng,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub status: String,
    pub is_sharing: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Location,
    Spot,
    Event,
    Alert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: HashSet<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

// ─── Users (external mirror) ─────────────────────────────────────────────────

/// The core only ever consumes these four fields of a user; accounts live in
/// an external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}
