use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Summary handed to the outbound mail collaborator when a trip ends.
#[derive(Debug, Clone, Serialize)]
pub struct TripSummary {
    pub trip_id: String,
    pub trip_title: String,
    pub target_species: String,
    pub duration_hours: f64,
    pub observations_count: u32,
    pub success: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub weather: Option<String>,
    pub notes: Option<String>,
}

/// Mail collaborator. Fire-and-forget from the core's perspective: a send
/// failure is logged and never reaches the caller.
#[derive(Debug, Clone, Default)]
pub struct Mailer;

impl Mailer {
    pub fn new() -> Self {
        Self
    }

    pub async fn send_trip_summary(&self, email: &str, summary: &TripSummary) {
        // Delivery mechanics live outside the core; here the request is
        // journaled to the log and considered handed off.
        match serde_json::to_string(summary) {
            Ok(payload) => {
                info!(
                    "Mail request: trip summary for {} to {email} ({} bytes)",
                    summary.trip_id,
                    payload.len()
                );
            }
            Err(e) => warn!("Mail request for {} could not be serialized: {e}", summary.trip_id),
        }
    }
}
