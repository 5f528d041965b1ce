use std::path::PathBuf;

use anyhow::{bail, Result};

/// VAPID keypair for the Web Push transport. When absent, the outbox only
/// journals notifications and never dials out.
#[derive(Debug, Clone)]
pub struct VapidKeys {
    pub public_key: String,
    pub private_key: String,
    pub contact_email: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Directory holding the document store snapshot.
    pub data_dir: PathBuf,
    /// Database name; the snapshot file is `<data_dir>/<data_name>.json`.
    pub data_name: String,
    /// Baseline proximity alert radius in meters.
    pub proximity_radius_m: f64,
    /// Extra radius granted to hotspot-classified waypoints.
    pub hotspot_bonus_m: f64,
    /// Dedup window between alerts for the same (user, waypoint) pair.
    pub alert_cooldown_min: i64,
    /// TTL for cached WQS classifications in the proximity engine.
    pub wqs_cache_ttl_min: i64,
    pub vapid: Option<VapidKeys>,
    /// HS256 secret for the authorization collaborator. Absent means every
    /// token resolves to the anonymous principal.
    pub auth_secret: Option<String>,
    /// Synthesize demo POIs when a view cone is empty. Must stay off in
    /// production.
    pub demo_pois: bool,
    pub port: u16,
    pub cors_origins: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl TelemetryConfig {
    /// Read configuration from the environment. The database location is
    /// mandatory; everything else has defaults.
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
            _ => bail!("DATABASE_URL is required"),
        };
        let data_name = match std::env::var("DATABASE_NAME") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("DATABASE_NAME is required"),
        };

        let vapid = match (
            std::env::var("VAPID_PUBLIC_KEY").ok().filter(|v| !v.is_empty()),
            std::env::var("VAPID_PRIVATE_KEY").ok().filter(|v| !v.is_empty()),
        ) {
            (Some(public_key), Some(private_key)) => Some(VapidKeys {
                public_key,
                private_key,
                contact_email: std::env::var("VAPID_CONTACT_EMAIL")
                    .unwrap_or_else(|_| "support@fieldtrace.app".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            data_dir,
            data_name,
            proximity_radius_m: env_parse("PROXIMITY_RADIUS_M", 500.0),
            hotspot_bonus_m: env_parse("HOTSPOT_BONUS_M", 200.0),
            alert_cooldown_min: env_parse("ALERT_COOLDOWN_MIN", 30),
            wqs_cache_ttl_min: env_parse("WQS_CACHE_TTL_MIN", 10),
            vapid,
            auth_secret: std::env::var("AUTH_SECRET").ok().filter(|v| !v.is_empty()),
            demo_pois: env_parse("DEMO_POIS", false),
            port: env_parse("PORT", 8080),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string()),
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.data_name))
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.alert_cooldown_min)
    }
}

#[cfg(test)]
impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir(),
            data_name: "fieldtrace-test".to_string(),
            proximity_radius_m: 500.0,
            hotspot_bonus_m: 200.0,
            alert_cooldown_min: 30,
            wqs_cache_ttl_min: 10,
            vapid: None,
            auth_secret: None,
            demo_pois: false,
            port: 0,
            cors_origins: "*".to_string(),
        }
    }
}
