//! Push outbox.
//!
//! Every alert or per-user notification is journaled first (the durable
//! record), then handed to the Web Push transport. The hot path never waits
//! on delivery: `submit` enqueues a job for the background worker and returns
//! as soon as the journal row exists. The outbox never retries; driving
//! retries is the scheduler's job, not ours.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::VapidKeys;
use crate::state::{DeliveryStatus, NotificationRecord, PushNotification, PushSubscription};
use crate::store::SharedStore;

// ─── Transport ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum TransportOutcome {
    Delivered,
    SubscriptionGone,
    Transient(String),
}

/// Web Push transport collaborator. `Disabled` is the journal-only mode used
/// when no VAPID keypair is configured.
pub enum PushTransport {
    WebPush {
        client: reqwest::Client,
        vapid: VapidKeys,
    },
    Disabled,
    #[cfg(test)]
    Fixed(TransportOutcome),
}

impl PushTransport {
    pub fn from_vapid(vapid: Option<VapidKeys>) -> Self {
        match vapid {
            Some(vapid) => {
                let client = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(5))
                    .build()
                    .unwrap_or_default();
                PushTransport::WebPush { client, vapid }
            }
            None => PushTransport::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, PushTransport::Disabled)
    }

    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushNotification,
    ) -> TransportOutcome {
        match self {
            PushTransport::Disabled => TransportOutcome::Transient("transport disabled".into()),
            #[cfg(test)]
            PushTransport::Fixed(outcome) => match outcome {
                TransportOutcome::Delivered => TransportOutcome::Delivered,
                TransportOutcome::SubscriptionGone => TransportOutcome::SubscriptionGone,
                TransportOutcome::Transient(e) => TransportOutcome::Transient(e.clone()),
            },
            PushTransport::WebPush { client, vapid } => {
                let body = match serde_json::to_vec(payload) {
                    Ok(b) => b,
                    Err(e) => return TransportOutcome::Transient(format!("encode: {e}")),
                };

                let result = client
                    .post(&subscription.endpoint)
                    .header("TTL", "60")
                    .header("Content-Type", "application/json")
                    .header("X-Vapid-Contact", format!("mailto:{}", vapid.contact_email))
                    .body(body)
                    .send()
                    .await;

                match result {
                    Ok(resp) if resp.status().is_success() => TransportOutcome::Delivered,
                    // The push service reports an invalidated subscription
                    // with 404 or 410.
                    Ok(resp)
                        if resp.status() == reqwest::StatusCode::NOT_FOUND
                            || resp.status() == reqwest::StatusCode::GONE =>
                    {
                        TransportOutcome::SubscriptionGone
                    }
                    Ok(resp) => TransportOutcome::Transient(format!("status {}", resp.status())),
                    Err(e) => TransportOutcome::Transient(e.to_string()),
                }
            }
        }
    }
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

pub struct PushJob {
    pub record_id: String,
    pub user_id: String,
    pub payload: PushNotification,
}

#[derive(Clone)]
pub struct PushOutbox {
    store: SharedStore,
    transport: Arc<PushTransport>,
    tx: mpsc::Sender<PushJob>,
}

impl PushOutbox {
    pub fn new(
        store: SharedStore,
        transport: Arc<PushTransport>,
    ) -> (Self, mpsc::Receiver<PushJob>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                store,
                transport,
                tx,
            },
            rx,
        )
    }

    /// Journal a notification and enqueue its delivery. Returns the status at
    /// the moment the request path completes: `Deferred` when no subscription
    /// exists (journal only), `Journaled` when a delivery job was queued.
    pub async fn submit(&self, user_id: &str, notification: PushNotification) -> DeliveryStatus {
        let (record_id, has_subscription) = self.journal(user_id, &notification).await;

        if !has_subscription || !self.transport.is_enabled() {
            self.set_status(&record_id, DeliveryStatus::Deferred).await;
            return DeliveryStatus::Deferred;
        }

        let job = PushJob {
            record_id: record_id.clone(),
            user_id: user_id.to_string(),
            payload: notification,
        };
        if self.tx.try_send(job).is_err() {
            // Queue full: the journal row stands, delivery is deferred.
            warn!("Push queue full, deferring notification for {user_id}");
            self.set_status(&record_id, DeliveryStatus::Deferred).await;
            return DeliveryStatus::Deferred;
        }

        DeliveryStatus::Journaled
    }

    /// Journal and deliver inline. Used by the manual notify endpoint and by
    /// the background worker through `deliver_now`.
    pub async fn dispatch(&self, user_id: &str, notification: PushNotification) -> DeliveryStatus {
        let (record_id, has_subscription) = self.journal(user_id, &notification).await;

        if !has_subscription || !self.transport.is_enabled() {
            self.set_status(&record_id, DeliveryStatus::Deferred).await;
            return DeliveryStatus::Deferred;
        }

        self.deliver_now(&record_id, user_id, &notification).await
    }

    /// Transport call for an already-journaled notification. Dropping the
    /// network call never touches anything but the journal row status.
    pub async fn deliver_now(
        &self,
        record_id: &str,
        user_id: &str,
        payload: &PushNotification,
    ) -> DeliveryStatus {
        let subscription = {
            let store = self.store.read().await;
            store.subscriptions.get(user_id).cloned()
        };

        let Some(subscription) = subscription else {
            self.set_status(record_id, DeliveryStatus::Deferred).await;
            return DeliveryStatus::Deferred;
        };

        let status = match self.transport.deliver(&subscription, payload).await {
            TransportOutcome::Delivered => {
                info!("Push delivered to {user_id}: {}", payload.title);
                DeliveryStatus::Delivered
            }
            TransportOutcome::SubscriptionGone => {
                warn!("Push subscription gone for {user_id}, removing");
                let mut store = self.store.write().await;
                store.subscriptions.remove(user_id);
                DeliveryStatus::FailedSubscriptionGone
            }
            TransportOutcome::Transient(e) => {
                warn!("Push delivery to {user_id} failed: {e}");
                DeliveryStatus::FailedTransient
            }
        };

        self.set_status(record_id, status).await;
        status
    }

    async fn journal(&self, user_id: &str, notification: &PushNotification) -> (String, bool) {
        let record_id = Uuid::new_v4().to_string();
        let mut store = self.store.write().await;
        store.notifications.push(NotificationRecord {
            id: record_id.clone(),
            user_id: user_id.to_string(),
            notification: notification.clone(),
            sent_at: Utc::now(),
            read: false,
            status: DeliveryStatus::Journaled,
        });
        let has_subscription = store.subscriptions.contains_key(user_id);
        (record_id, has_subscription)
    }

    async fn set_status(&self, record_id: &str, status: DeliveryStatus) {
        let mut store = self.store.write().await;
        if let Some(record) = store.notifications.iter_mut().find(|r| r.id == record_id) {
            record.status = status;
        }
    }
}

/// Background delivery loop. The request path only ever enqueues; this task
/// owns every outbound push call.
pub async fn run_push_worker(outbox: PushOutbox, mut rx: mpsc::Receiver<PushJob>) {
    info!("Push worker started");
    while let Some(job) = rx.recv().await {
        outbox
            .deliver_now(&job.record_id, &job.user_id, &job.payload)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{shared, TelemetryStore};
    use std::collections::HashMap;

    fn notification() -> PushNotification {
        PushNotification {
            title: "Proximity alert".to_string(),
            body: "Hotspot 'Clearing A' at 67m".to_string(),
            icon: None,
            url: None,
            tag: Some("proximity".to_string()),
            data: None,
        }
    }

    fn subscription() -> PushSubscription {
        PushSubscription {
            endpoint: "https://push.example/ep".to_string(),
            keys: HashMap::from([("auth".to_string(), "k".to_string())]),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_subscription_still_journals_and_defers() {
        let store = shared(TelemetryStore::default());
        let (outbox, _rx) = PushOutbox::new(store.clone(), Arc::new(PushTransport::Disabled));

        let status = outbox.dispatch("alice", notification()).await;
        assert_eq!(status, DeliveryStatus::Deferred);

        let guard = store.read().await;
        assert_eq!(guard.notifications.len(), 1);
        assert_eq!(guard.notifications[0].user_id, "alice");
        assert_eq!(guard.notifications[0].status, DeliveryStatus::Deferred);
        assert!(!guard.notifications[0].read);
    }

    #[tokio::test]
    async fn gone_subscription_is_deleted_as_side_effect() {
        let mut inner = TelemetryStore::default();
        inner.subscriptions.insert("alice".to_string(), subscription());
        let store = shared(inner);

        let (outbox, _rx) = PushOutbox::new(
            store.clone(),
            Arc::new(PushTransport::Fixed(TransportOutcome::SubscriptionGone)),
        );

        let status = outbox.dispatch("alice", notification()).await;
        assert_eq!(status, DeliveryStatus::FailedSubscriptionGone);

        let guard = store.read().await;
        assert!(guard.subscriptions.get("alice").is_none());
        assert_eq!(guard.notifications.len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_keeps_subscription() {
        let mut inner = TelemetryStore::default();
        inner.subscriptions.insert("alice".to_string(), subscription());
        let store = shared(inner);

        let (outbox, _rx) = PushOutbox::new(
            store.clone(),
            Arc::new(PushTransport::Fixed(TransportOutcome::Transient(
                "503".to_string(),
            ))),
        );

        let status = outbox.dispatch("alice", notification()).await;
        assert_eq!(status, DeliveryStatus::FailedTransient);
        assert!(store.read().await.subscriptions.contains_key("alice"));
    }

    #[tokio::test]
    async fn submit_enqueues_for_the_worker() {
        let mut inner = TelemetryStore::default();
        inner.subscriptions.insert("alice".to_string(), subscription());
        let store = shared(inner);

        let (outbox, mut rx) = PushOutbox::new(
            store.clone(),
            Arc::new(PushTransport::Fixed(TransportOutcome::Delivered)),
        );

        let status = outbox.submit("alice", notification()).await;
        assert_eq!(status, DeliveryStatus::Journaled);

        let job = rx.recv().await.expect("job queued");
        assert_eq!(job.user_id, "alice");

        let final_status = outbox
            .deliver_now(&job.record_id, &job.user_id, &job.payload)
            .await;
        assert_eq!(final_status, DeliveryStatus::Delivered);
        let guard = store.read().await;
        assert_eq!(guard.notifications[0].status, DeliveryStatus::Delivered);
    }
}
