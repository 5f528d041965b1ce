//! Group position fanout and the chat / group-alert journal.
//!
//! Positions converge last-writer-wins per `(group_id, user_id)`; snapshots
//! only expose rows refreshed inside the sharing window. Chat is append-only
//! with per-member read markers. Structured alerts carry a fixed emoji
//! vocabulary that clients depend on — the table below is wire-stable.

use chrono::{DateTime, Duration, Utc};
use field_geo::LatLng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::state::{ChatMessage, GroupPositionShare, MessageType};
use crate::store::SharedStore;

/// Rows older than this are dropped from position snapshots.
const SHARING_WINDOW_MIN: i64 = 30;

// ─── Alert vocabulary ────────────────────────────────────────────────────────

pub struct AlertMeta {
    pub emoji: &'static str,
    pub label: &'static str,
    pub priority: &'static str,
    pub vibrate: &'static [u32],
}

pub fn alert_meta(alert_type: &str) -> Option<AlertMeta> {
    let meta = match alert_type {
        "animal_spotted" => AlertMeta {
            emoji: "🦌",
            label: "Animal spotted",
            priority: "high",
            vibrate: &[200, 100, 200],
        },
        "position_marked" => AlertMeta {
            emoji: "📍",
            label: "Position marked",
            priority: "medium",
            vibrate: &[100],
        },
        "need_help" => AlertMeta {
            emoji: "🆘",
            label: "Need help",
            priority: "urgent",
            vibrate: &[400, 100, 400, 100, 400],
        },
        "shot_fired" => AlertMeta {
            emoji: "🎯",
            label: "Shot fired",
            priority: "high",
            vibrate: &[300, 100, 300],
        },
        "returning" => AlertMeta {
            emoji: "🏠",
            label: "Heading back",
            priority: "low",
            vibrate: &[100],
        },
        "break_time" => AlertMeta {
            emoji: "☕",
            label: "Taking a break",
            priority: "low",
            vibrate: &[100],
        },
        "silence" => AlertMeta {
            emoji: "🤫",
            label: "Radio silence",
            priority: "high",
            vibrate: &[200],
        },
        "meeting_point" => AlertMeta {
            emoji: "🤝",
            label: "Meeting point",
            priority: "medium",
            vibrate: &[100, 50, 100],
        },
        _ => return None,
    };
    Some(meta)
}

const ALERT_TYPES: [&str; 8] = [
    "animal_spotted",
    "position_marked",
    "need_help",
    "shot_fired",
    "returning",
    "break_time",
    "silence",
    "meeting_point",
];

/// Full alert vocabulary plus canned quick messages, for client pickers.
pub fn alert_catalog() -> Value {
    let mut alert_types = serde_json::Map::new();
    for alert_type in ALERT_TYPES {
        if let Some(meta) = alert_meta(alert_type) {
            alert_types.insert(
                alert_type.to_string(),
                json!({
                    "emoji": meta.emoji,
                    "label": meta.label,
                    "priority": meta.priority,
                    "vibrate": meta.vibrate,
                }),
            );
        }
    }

    json!({
        "alert_types": alert_types,
        "quick_messages": [
            { "text": "On my way", "emoji": "🚶" },
            { "text": "In position", "emoji": "✅" },
            { "text": "Nothing moving here", "emoji": "😴" },
            { "text": "Stay sharp", "emoji": "👀" },
            { "text": "Packing up", "emoji": "🎒" },
        ],
    })
}

// ─── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PositionShareUpdate {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "hunting".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSend {
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub location: Option<LatLng>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupAlertSend {
    pub alert_type: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<LatLng>,
}

// ─── Hub ─────────────────────────────────────────────────────────────────────

pub struct GroupHub {
    store: SharedStore,
}

impl GroupHub {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    // ── Position fanout ──────────────────────────────────────────────────────

    /// Upsert the member's shared position. Re-sharing after a stop is
    /// implicit: any update turns sharing back on.
    pub async fn update_position(
        &self,
        group_id: &str,
        user_id: &str,
        update: PositionShareUpdate,
    ) -> GroupPositionShare {
        let share = GroupPositionShare {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            pos: LatLng::new(update.lat, update.lng),
            heading: update.heading,
            status: update.status,
            is_sharing: true,
            updated_at: Utc::now(),
        };

        let mut store = self.store.write().await;
        store
            .group_positions
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string(), share.clone());
        share
    }

    pub async fn list_positions(&self, group_id: &str) -> Vec<GroupPositionShare> {
        self.list_positions_at(group_id, Utc::now()).await
    }

    pub async fn list_positions_at(
        &self,
        group_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<GroupPositionShare> {
        let cutoff = now - Duration::minutes(SHARING_WINDOW_MIN);
        let store = self.store.read().await;

        let mut positions: Vec<GroupPositionShare> = store
            .group_positions
            .get(group_id)
            .map(|rows| {
                rows.values()
                    .filter(|p| p.is_sharing && p.updated_at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        positions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        positions
    }

    /// Stop sharing but keep the last coordinates for the grace period.
    pub async fn stop_sharing(&self, group_id: &str, user_id: &str) -> DomainResult<()> {
        let mut store = self.store.write().await;
        let row = store
            .group_positions
            .get_mut(group_id)
            .and_then(|rows| rows.get_mut(user_id))
            .ok_or_else(|| DomainError::not_found(format!("position share for {user_id}")))?;
        row.is_sharing = false;
        row.updated_at = Utc::now();
        Ok(())
    }

    // ── Chat journal ─────────────────────────────────────────────────────────

    pub async fn send_message(
        &self,
        group_id: &str,
        sender_id: &str,
        send: MessageSend,
    ) -> DomainResult<ChatMessage> {
        if send.content.trim().is_empty() {
            return Err(DomainError::invalid_request("empty message content"));
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            sender_id: sender_id.to_string(),
            message_type: send.message_type,
            content: send.content,
            location: send.location,
            alert_type: None,
            created_at: Utc::now(),
            read_by: [sender_id.to_string()].into_iter().collect(),
            is_deleted: false,
        };

        let mut store = self.store.write().await;
        store.messages.push(message.clone());
        Ok(message)
    }

    /// Structured alert: the content is prefixed with the alert's standard
    /// emoji. Unknown alert types are rejected before anything is journaled.
    pub async fn send_alert(
        &self,
        group_id: &str,
        sender_id: &str,
        send: GroupAlertSend,
    ) -> DomainResult<ChatMessage> {
        let Some(meta) = alert_meta(&send.alert_type) else {
            return Err(DomainError::invalid_request(format!(
                "unknown alert type '{}'",
                send.alert_type
            )));
        };

        let text = send
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| meta.label.to_string());

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            sender_id: sender_id.to_string(),
            message_type: MessageType::Alert,
            content: format!("{} {text}", meta.emoji),
            location: send.location,
            alert_type: Some(send.alert_type.clone()),
            created_at: Utc::now(),
            read_by: [sender_id.to_string()].into_iter().collect(),
            is_deleted: false,
        };

        let mut store = self.store.write().await;
        store.messages.push(message.clone());
        info!(
            "Group alert {} in {group_id} from {sender_id}",
            send.alert_type
        );
        Ok(message)
    }

    /// Messages newest first, optionally only those strictly before a cursor.
    pub async fn messages(
        &self,
        group_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Vec<ChatMessage> {
        let store = self.store.read().await;
        let mut messages: Vec<ChatMessage> = store
            .messages
            .iter()
            .filter(|m| m.group_id == group_id && !m.is_deleted)
            .filter(|m| before.map(|b| m.created_at < b).unwrap_or(true))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        messages
    }

    /// Mark group messages read for a member, up to an optional timestamp.
    /// Returns how many messages were newly marked.
    pub async fn mark_read(
        &self,
        group_id: &str,
        user_id: &str,
        upto: Option<DateTime<Utc>>,
    ) -> usize {
        let mut store = self.store.write().await;
        let mut marked = 0;
        for message in store.messages.iter_mut() {
            if message.group_id == group_id
                && !message.is_deleted
                && upto.map(|t| message.created_at <= t).unwrap_or(true)
                && message.read_by.insert(user_id.to_string())
            {
                marked += 1;
            }
        }
        marked
    }

    pub async fn unread_count(&self, group_id: &str, user_id: &str) -> usize {
        let store = self.store.read().await;
        store
            .messages
            .iter()
            .filter(|m| m.group_id == group_id && !m.is_deleted && !m.read_by.contains(user_id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{shared, TelemetryStore};

    fn hub() -> (GroupHub, SharedStore) {
        let store = shared(TelemetryStore::default());
        (GroupHub::new(store.clone()), store)
    }

    fn share(lat: f64, lng: f64) -> PositionShareUpdate {
        PositionShareUpdate {
            lat,
            lng,
            heading: Some(45.0),
            status: "hunting".to_string(),
        }
    }

    #[tokio::test]
    async fn position_updates_converge_to_last_writer() {
        let (hub, _store) = hub();

        hub.update_position("g1", "alice", share(46.80, -71.20)).await;
        hub.update_position("g1", "alice", share(46.81, -71.21)).await;

        let positions = hub.list_positions("g1").await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].pos.lat, 46.81);
        assert!(positions[0].is_sharing);
    }

    #[tokio::test]
    async fn snapshot_drops_stale_rows() {
        let (hub, store) = hub();
        hub.update_position("g1", "alice", share(46.8, -71.2)).await;
        hub.update_position("g1", "bob", share(46.9, -71.3)).await;

        // Age Bob's row past the window
        {
            let mut guard = store.write().await;
            let row = guard
                .group_positions
                .get_mut("g1")
                .unwrap()
                .get_mut("bob")
                .unwrap();
            row.updated_at = Utc::now() - Duration::minutes(45);
        }

        let positions = hub.list_positions("g1").await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].user_id, "alice");
    }

    #[tokio::test]
    async fn stop_sharing_hides_but_keeps_coordinates() {
        let (hub, store) = hub();
        hub.update_position("g1", "alice", share(46.8, -71.2)).await;
        hub.stop_sharing("g1", "alice").await.unwrap();

        assert!(hub.list_positions("g1").await.is_empty());
        let guard = store.read().await;
        let row = &guard.group_positions["g1"]["alice"];
        assert!(!row.is_sharing);
        assert_eq!(row.pos.lat, 46.8);

        // A later update re-enables sharing
        drop(guard);
        hub.update_position("g1", "alice", share(46.81, -71.2)).await;
        assert_eq!(hub.list_positions("g1").await.len(), 1);
    }

    #[tokio::test]
    async fn structured_alerts_carry_the_standard_emoji() {
        let (hub, _store) = hub();

        let message = hub
            .send_alert(
                "g1",
                "alice",
                GroupAlertSend {
                    alert_type: "animal_spotted".to_string(),
                    message: Some("Deer 200m north-east".to_string()),
                    location: Some(LatLng::new(46.8145, -71.2075)),
                },
            )
            .await
            .unwrap();

        assert_eq!(message.message_type, MessageType::Alert);
        assert_eq!(message.alert_type.as_deref(), Some("animal_spotted"));
        assert!(message.content.contains("🦌"));
        assert!(message.content.contains("Deer 200m north-east"));

        // Default label when no custom text
        let help = hub
            .send_alert(
                "g1",
                "bob",
                GroupAlertSend {
                    alert_type: "need_help".to_string(),
                    message: None,
                    location: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(help.content, "🆘 Need help");
    }

    #[tokio::test]
    async fn unknown_alert_type_is_rejected() {
        let (hub, store) = hub();
        let result = hub
            .send_alert(
                "g1",
                "alice",
                GroupAlertSend {
                    alert_type: "smoke_signal".to_string(),
                    message: None,
                    location: None,
                },
            )
            .await;
        assert!(matches!(result, Err(DomainError::InvalidRequest(_))));
        assert!(store.read().await.messages.is_empty());
    }

    #[tokio::test]
    async fn read_markers_and_unread_counts() {
        let (hub, _store) = hub();

        for i in 0..3 {
            hub.send_message(
                "g1",
                "alice",
                MessageSend {
                    message_type: MessageType::Text,
                    content: format!("message {i}"),
                    location: None,
                },
            )
            .await
            .unwrap();
        }

        // Sender has implicitly read their own messages
        assert_eq!(hub.unread_count("g1", "alice").await, 0);
        assert_eq!(hub.unread_count("g1", "bob").await, 3);

        let marked = hub.mark_read("g1", "bob", None).await;
        assert_eq!(marked, 3);
        assert_eq!(hub.unread_count("g1", "bob").await, 0);

        // Marking again is a no-op
        assert_eq!(hub.mark_read("g1", "bob", None).await, 0);
    }

    #[tokio::test]
    async fn message_listing_paginates_backwards() {
        let (hub, store) = hub();
        for i in 0..5 {
            hub.send_message(
                "g1",
                "alice",
                MessageSend {
                    message_type: MessageType::Text,
                    content: format!("m{i}"),
                    location: None,
                },
            )
            .await
            .unwrap();
        }
        // Spread creation times out so the cursor has distinct values
        {
            let mut guard = store.write().await;
            for (i, message) in guard.messages.iter_mut().enumerate() {
                message.created_at = Utc::now() - Duration::minutes(5 - i as i64);
            }
        }

        let newest = hub.messages("g1", 2, None).await;
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].content, "m4");

        let older = hub
            .messages("g1", 10, Some(newest[1].created_at))
            .await;
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].content, "m2");
    }

    #[test]
    fn catalog_lists_all_eight_alert_types() {
        let catalog = alert_catalog();
        let types = catalog["alert_types"].as_object().unwrap();
        assert_eq!(types.len(), 8);
        for name in ALERT_TYPES {
            let entry = &types[name];
            assert!(entry["emoji"].as_str().is_some());
            assert!(entry["label"].as_str().is_some());
            assert!(entry["priority"].as_str().is_some());
            assert!(entry["vibrate"].as_array().is_some());
        }
        assert!(!catalog["quick_messages"].as_array().unwrap().is_empty());
    }
}
