use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use field_geo::LatLng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthEngine, Principal};
use crate::config::TelemetryConfig;
use crate::error::{DomainError, DomainResult};
use crate::groups::{GroupAlertSend, GroupHub, MessageSend, PositionShareUpdate};
use crate::heading::{HeadingCache, HeadingUpdate, SessionSettings};
use crate::proximity::{self, ProximityEngine};
use crate::push::PushOutbox;
use crate::scoring::{self, ForecastRequest};
use crate::state::{PushNotification, PushSubscription, TripStatus, Waypoint};
use crate::store::SharedStore;
use crate::tracker::{LocationUpdate, Tracker};
use crate::trips::{ObservationCreate, TripCreate, TripEnd, TripLogger, TripStart, VisitCreate};

// ─── Shared application state ────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<TelemetryConfig>,
    pub auth: Arc<AuthEngine>,
    pub tracker: Arc<Tracker>,
    pub trips: Arc<TripLogger>,
    pub heading: Arc<HeadingCache>,
    pub groups: Arc<GroupHub>,
    pub proximity: Arc<ProximityEngine>,
    pub outbox: PushOutbox,
}

// ─── Principal resolution ────────────────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Token first; the `X-User-Id` header is the development fallback used by
/// trusted local clients.
fn principal(state: &AppState, headers: &HeaderMap) -> Option<Principal> {
    if let Some(token) = bearer_token(headers) {
        if let Some(principal) = state.auth.resolve_principal(token) {
            return Some(principal);
        }
    }
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|user_id| Principal {
            user_id: user_id.to_string(),
            role: "hunter".to_string(),
        })
}

fn require_principal(state: &AppState, headers: &HeaderMap) -> DomainResult<Principal> {
    principal(state, headers).ok_or(DomainError::PermissionDenied)
}

/// Position recording and status reads accept unauthenticated clients.
fn principal_or_anonymous(state: &AppState, headers: &HeaderMap) -> Principal {
    principal(state, headers).unwrap_or(Principal {
        user_id: "anonymous".to_string(),
        role: "anonymous".to_string(),
    })
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn validate_coords(lat: f64, lng: f64) -> DomainResult<()> {
    if !LatLng::new(lat, lng).is_valid() {
        return Err(DomainError::invalid_request(format!(
            "coordinates out of range: ({lat}, {lng})"
        )));
    }
    Ok(())
}

fn validate_aperture(aperture: f64) -> DomainResult<()> {
    if aperture <= 0.0 || aperture > 180.0 {
        return Err(DomainError::invalid_request(format!(
            "aperture must be in (0, 180]: {aperture}"
        )));
    }
    Ok(())
}

fn validate_range(range_m: f64) -> DomainResult<()> {
    if range_m <= 0.0 || range_m > 10_000.0 {
        return Err(DomainError::invalid_request(format!(
            "range must be in (0, 10000] m: {range_m}"
        )));
    }
    Ok(())
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).min(1000)
}

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let geolocation = Router::new()
        .route("/", get(geolocation_info))
        .route("/location", post(record_location))
        .route("/history", get(location_history))
        .route("/session/start", post(session_start))
        .route("/session/:id/end", post(session_end))
        .route("/subscribe", post(subscribe_push).delete(unsubscribe_push))
        .route("/nearby-hotspots", get(nearby_hotspots))
        .route("/check-proximity", post(check_proximity))
        .route("/tracking-status", get(tracking_status))
        .route("/notify", post(send_notification));

    let trips = Router::new()
        .route("/", get(list_trips))
        .route("/create", post(create_trip))
        .route("/start", post(start_trip))
        .route("/end", post(end_trip))
        .route("/active", get(active_trip))
        .route("/observations", post(log_observation).get(list_observations))
        .route("/visits", post(log_visit).get(list_visits))
        .route("/visits/:id/end", post(end_visit))
        .route("/statistics", get(trip_statistics))
        .route("/waypoint-statistics/:id", get(waypoint_statistics));

    let scoring = Router::new()
        .route("/wqs", get(wqs_all))
        .route("/wqs/:id", get(wqs_one))
        .route("/heatmap", get(wqs_heatmap))
        .route("/forecast", post(wqs_forecast));

    let waypoints = Router::new().route("/", post(upsert_waypoint).get(list_waypoints));

    let live_heading = Router::new()
        .route("/stats", get(heading_stats))
        .route("/session", post(heading_create))
        .route("/position", post(heading_position))
        .route("/session/:id", get(heading_get))
        .route("/session/:id/settings", post(heading_settings))
        .route("/session/:id/pause", post(heading_pause))
        .route("/session/:id/resume", post(heading_resume))
        .route("/session/:id/end", post(heading_end))
        .route("/session/:id/alerts/:alert_id/ack", post(heading_ack_alert));

    let tracking = Router::new()
        .route("/group/:group_id/positions", get(group_positions))
        .route("/group/:group_id/position", post(group_position_update))
        .route("/group/:group_id/position/stop", post(group_position_stop));

    let chat = Router::new()
        .route("/alert-types", get(chat_alert_types))
        .route("/:group_id/message/:user_id", post(chat_send_message))
        .route("/:group_id/messages", get(chat_messages))
        .route("/:group_id/alert/:user_id", post(chat_send_alert))
        .route("/:group_id/read/:user_id", post(chat_mark_read))
        .route("/:group_id/unread/:user_id", get(chat_unread));

    Router::new()
        .nest("/geolocation", geolocation)
        .nest("/trips", trips)
        .nest("/waypoint-scoring", scoring)
        .nest("/waypoints", waypoints)
        .nest("/live-heading", live_heading)
        .nest("/tracking", tracking)
        .nest("/chat", chat)
        .with_state(state)
}

// ─── Geolocation handlers ────────────────────────────────────────────────────

async fn geolocation_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "module": "geolocation",
        "version": env!("CARGO_PKG_VERSION"),
        "proximity": {
            "radius_m": state.config.proximity_radius_m,
            "hotspot_bonus_m": state.config.hotspot_bonus_m,
            "cooldown_min": state.config.alert_cooldown_min,
        },
        "push_enabled": state.config.vapid.is_some(),
    }))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
}

async fn record_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    Json(update): Json<LocationUpdate>,
) -> DomainResult<Json<Value>> {
    validate_coords(update.lat, update.lng)?;
    let who = principal_or_anonymous(&state, &headers);

    let (sample, alerts) = state
        .tracker
        .record_position(&who.user_id, update, query.session_id)
        .await;

    Ok(Json(json!({
        "success": true,
        "location": sample,
        "alerts": alerts,
        "alerts_count": alerts.len(),
    })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn location_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let history = state
        .tracker
        .history(
            &who.user_id,
            query.session_id.as_deref(),
            clamp_limit(query.limit, 100),
        )
        .await;
    Ok(Json(json!({ "history": history, "count": history.len() })))
}

async fn session_start(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let session = state.tracker.start_session(&who.user_id).await;
    Ok(Json(json!({ "success": true, "session": session })))
}

async fn session_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let session = state.tracker.end_session(&who.user_id, &session_id).await?;
    Ok(Json(json!({
        "success": true,
        "session": session,
        "message": format!("Session ended, distance covered: {} km", session.distance_km),
    })))
}

#[derive(Debug, Deserialize)]
struct SubscribeBody {
    endpoint: String,
    keys: std::collections::HashMap<String, String>,
}

async fn subscribe_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubscribeBody>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    if body.endpoint.is_empty() {
        return Err(DomainError::invalid_request("empty push endpoint"));
    }

    let mut store = state.store.write().await;
    store.subscriptions.insert(
        who.user_id.clone(),
        PushSubscription {
            endpoint: body.endpoint,
            keys: body.keys,
            updated_at: Utc::now(),
        },
    );
    info!("Push subscription saved for {}", who.user_id);
    Ok(Json(json!({ "success": true })))
}

async fn unsubscribe_push(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let removed = state
        .store
        .write()
        .await
        .subscriptions
        .remove(&who.user_id)
        .is_some();
    Ok(Json(json!({ "success": removed })))
}

#[derive(Debug, Deserialize)]
struct NearbyQuery {
    lat: f64,
    lng: f64,
    #[serde(default)]
    radius_km: Option<f64>,
}

async fn nearby_hotspots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NearbyQuery>,
) -> DomainResult<Json<Value>> {
    validate_coords(query.lat, query.lng)?;
    let who = require_principal(&state, &headers)?;
    let radius_km = query.radius_km.unwrap_or(5.0);

    let store = state.store.read().await;
    let hotspots = proximity::nearby_hotspots(
        &store,
        &who.user_id,
        LatLng::new(query.lat, query.lng),
        radius_km,
        Utc::now(),
    );

    Ok(Json(json!({
        "center": { "lat": query.lat, "lng": query.lng },
        "radius_km": radius_km,
        "hotspots": hotspots,
        "count": hotspots.len(),
    })))
}

#[derive(Debug, Deserialize)]
struct ProximityBody {
    lat: f64,
    lng: f64,
}

async fn check_proximity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProximityBody>,
) -> DomainResult<Json<Value>> {
    validate_coords(body.lat, body.lng)?;
    let who = require_principal(&state, &headers)?;

    let pos = LatLng::new(body.lat, body.lng);
    let alerts = state.proximity.check(&state.store, &who.user_id, pos).await;

    for alert in &alerts {
        state
            .outbox
            .submit(
                &who.user_id,
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

    Ok(Json(json!({
        "position": { "lat": body.lat, "lng": body.lng },
        "alerts": alerts,
        "alerts_count": alerts.len(),
        "has_alerts": !alerts.is_empty(),
    })))
}

async fn tracking_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Value> {
    let who = principal_or_anonymous(&state, &headers);
    let status = state.tracker.status(&who.user_id).await;
    Json(json!(status))
}

async fn send_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(notification): Json<PushNotification>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let status = state.outbox.dispatch(&who.user_id, notification).await;
    Ok(Json(json!({ "status": status })))
}

// ─── Trip handlers ───────────────────────────────────────────────────────────

async fn create_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TripCreate>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    if body.target_species.trim().is_empty() {
        return Err(DomainError::invalid_request("target_species is required"));
    }
    let trip = state.trips.create_trip(&who.user_id, body).await;
    Ok(Json(json!({ "success": true, "trip": trip })))
}

async fn start_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TripStart>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let trip = state.trips.start_trip(&who.user_id, body).await?;
    Ok(Json(json!({ "success": true, "trip": trip })))
}

async fn end_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TripEnd>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let trip = state.trips.end_trip(&who.user_id, body).await?;
    Ok(Json(json!({ "success": true, "trip": trip })))
}

#[derive(Debug, Deserialize)]
struct TripListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_status(raw: &str) -> DomainResult<TripStatus> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| DomainError::invalid_request(format!("unknown trip status '{raw}'")))
}

async fn list_trips(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TripListQuery>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let trips = state
        .trips
        .list_trips(&who.user_id, status, clamp_limit(query.limit, 50))
        .await;
    Ok(Json(json!({ "trips": trips, "count": trips.len() })))
}

async fn active_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let trip = state.trips.active_trip(&who.user_id).await;
    Ok(Json(json!({ "trip": trip })))
}

async fn log_observation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ObservationCreate>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    if let Some(pos) = &body.location {
        validate_coords(pos.lat, pos.lng)?;
    }
    let observation = state.trips.log_observation(&who.user_id, body).await?;
    Ok(Json(json!({ "success": true, "observation": observation })))
}

#[derive(Debug, Deserialize)]
struct ObservationQuery {
    #[serde(default)]
    trip_id: Option<String>,
    #[serde(default)]
    waypoint_id: Option<String>,
    #[serde(default)]
    species: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_observations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ObservationQuery>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let observations = state
        .trips
        .list_observations(
            &who.user_id,
            query.trip_id.as_deref(),
            query.waypoint_id.as_deref(),
            query.species.as_deref(),
            clamp_limit(query.limit, 100),
        )
        .await;
    Ok(Json(json!({
        "observations": observations,
        "count": observations.len(),
    })))
}

async fn log_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<VisitCreate>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let visit = state.trips.log_visit(&who.user_id, body).await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

#[derive(Debug, Deserialize)]
struct VisitQuery {
    #[serde(default)]
    waypoint_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_visits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VisitQuery>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let visits = state
        .trips
        .list_visits(
            &who.user_id,
            query.waypoint_id.as_deref(),
            clamp_limit(query.limit, 50),
        )
        .await;
    Ok(Json(json!({ "visits": visits, "count": visits.len() })))
}

#[derive(Debug, Deserialize)]
struct VisitEndBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    notes: Option<String>,
}

async fn end_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(visit_id): Path<String>,
    Json(body): Json<VisitEndBody>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let visit = state
        .trips
        .end_visit(&who.user_id, &visit_id, body.success, body.notes)
        .await?;
    Ok(Json(json!({ "success": true, "visit": visit })))
}

async fn trip_statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let statistics = state.trips.statistics(&who.user_id).await;
    Ok(Json(json!(statistics)))
}

async fn waypoint_statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(waypoint_id): Path<String>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let statistics = state
        .trips
        .waypoint_statistics(&who.user_id, &waypoint_id)
        .await?;
    Ok(Json(json!(statistics)))
}

// ─── Waypoint scoring handlers ───────────────────────────────────────────────

async fn wqs_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(waypoint_id): Path<String>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let store = state.store.read().await;
    let wqs = scoring::calculate_wqs(&store, &who.user_id, &waypoint_id, Utc::now())?;
    Ok(Json(json!(wqs)))
}

async fn wqs_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let store = state.store.read().await;
    let scores = scoring::score_all(&store, &who.user_id, Utc::now());
    Ok(Json(json!({ "scores": scores, "count": scores.len() })))
}

async fn wqs_heatmap(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let store = state.store.read().await;
    let heatmap = scoring::heatmap(&store, &who.user_id, Utc::now());
    Ok(Json(json!({ "heatmap": heatmap, "count": heatmap.len() })))
}

async fn wqs_forecast(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ForecastRequest>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let store = state.store.read().await;
    let forecast = scoring::forecast(&store, &who.user_id, &body, Utc::now());
    Ok(Json(json!(forecast)))
}

// ─── Waypoint catalogue handlers ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WaypointUpsert {
    #[serde(default)]
    id: Option<String>,
    name: String,
    lat: f64,
    lng: f64,
    #[serde(rename = "type", default)]
    waypoint_type: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    icon: Option<String>,
}

async fn upsert_waypoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<WaypointUpsert>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    validate_coords(body.lat, body.lng)?;
    if body.name.trim().is_empty() {
        return Err(DomainError::invalid_request("waypoint name is required"));
    }

    let mut store = state.store.write().await;
    let id = body.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    // Updating someone else's waypoint id is indistinguishable from a fresh
    // id collision; reject it as not found.
    if let Some(existing) = store.waypoints.get(&id) {
        if existing.user_id != who.user_id {
            return Err(DomainError::not_found(format!("waypoint {id}")));
        }
    }

    let created_at = store
        .waypoints
        .get(&id)
        .map(|wp| wp.created_at)
        .unwrap_or_else(Utc::now);

    let waypoint = Waypoint {
        id: id.clone(),
        user_id: who.user_id.clone(),
        name: body.name,
        pos: LatLng::new(body.lat, body.lng),
        waypoint_type: body.waypoint_type,
        color: body.color,
        icon: body.icon,
        created_at,
    };
    store.upsert_waypoint(waypoint.clone());
    Ok(Json(json!({ "success": true, "waypoint": waypoint })))
}

async fn list_waypoints(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    let store = state.store.read().await;
    let waypoints: Vec<Waypoint> = store
        .list_waypoints(&who.user_id)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(json!({ "waypoints": waypoints, "count": waypoints.len() })))
}

// ─── Live heading handlers ───────────────────────────────────────────────────

async fn heading_stats(State(state): State<AppState>) -> Json<Value> {
    let store = state.store.read().await;
    Json(json!({
        "active_sessions": state.heading.active_count().await,
        "total_sessions": store.heading_sessions.len(),
        "status": "operational",
    }))
}

#[derive(Debug, Deserialize)]
struct HeadingCreateBody {
    lat: f64,
    lng: f64,
    #[serde(default)]
    heading: f64,
    #[serde(default)]
    aperture_degrees: Option<f64>,
    #[serde(default)]
    range_meters: Option<f64>,
}

async fn heading_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HeadingCreateBody>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    validate_coords(body.lat, body.lng)?;
    if let Some(aperture) = body.aperture_degrees {
        validate_aperture(aperture)?;
    }
    if let Some(range_m) = body.range_meters {
        validate_range(range_m)?;
    }

    let session = state
        .heading
        .create(
            &who.user_id,
            body.lat,
            body.lng,
            body.heading,
            body.aperture_degrees,
            body.range_meters,
        )
        .await;
    Ok(Json(json!({ "success": true, "session": session })))
}

async fn heading_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HeadingUpdate>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    validate_coords(body.lat, body.lng)?;
    let view = state.heading.update_position(body).await?;
    Ok(Json(json!(view)))
}

async fn heading_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    let session = state.heading.get(&session_id).await?;
    Ok(Json(json!({ "session": session })))
}

async fn heading_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(body): Json<SessionSettings>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    if let Some(aperture) = body.aperture_degrees {
        validate_aperture(aperture)?;
    }
    if let Some(range_m) = body.range_meters {
        validate_range(range_m)?;
    }
    let session = state.heading.update_settings(&session_id, body).await?;
    Ok(Json(json!({ "success": true, "session": session })))
}

async fn heading_pause(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    state.heading.pause(&session_id).await?;
    Ok(Json(json!({ "success": true, "state": "paused" })))
}

async fn heading_resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    state.heading.resume(&session_id).await?;
    Ok(Json(json!({ "success": true, "state": "active" })))
}

async fn heading_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    let summary = state.heading.end(&session_id).await?;
    Ok(Json(json!({ "success": true, "summary": summary })))
}

async fn heading_ack_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((session_id, alert_id)): Path<(String, String)>,
) -> DomainResult<Json<Value>> {
    require_principal(&state, &headers)?;
    state.heading.acknowledge_alert(&session_id, &alert_id).await?;
    Ok(Json(json!({ "success": true })))
}

// ─── Group tracking handlers ─────────────────────────────────────────────────

async fn group_positions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<String>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    state.auth.require_membership(&who.user_id, &group_id).await?;

    let positions = state.groups.list_positions(&group_id).await;
    Ok(Json(json!({ "positions": positions, "count": positions.len() })))
}

async fn group_position_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<String>,
    Json(body): Json<PositionShareUpdate>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    state.auth.require_membership(&who.user_id, &group_id).await?;
    validate_coords(body.lat, body.lng)?;

    let share = state
        .groups
        .update_position(&group_id, &who.user_id, body)
        .await;
    Ok(Json(json!({ "success": true, "position": share })))
}

async fn group_position_stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<String>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    state.auth.require_membership(&who.user_id, &group_id).await?;
    state.groups.stop_sharing(&group_id, &who.user_id).await?;
    Ok(Json(json!({ "success": true })))
}

// ─── Chat handlers ───────────────────────────────────────────────────────────

async fn chat_alert_types() -> Json<Value> {
    Json(crate::groups::alert_catalog())
}

async fn chat_send_message(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(String, String)>,
    Json(body): Json<MessageSend>,
) -> DomainResult<Json<Value>> {
    state.auth.require_membership(&user_id, &group_id).await?;
    if let Some(pos) = &body.location {
        validate_coords(pos.lat, pos.lng)?;
    }
    let message = state.groups.send_message(&group_id, &user_id, body).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    before: Option<DateTime<Utc>>,
}

async fn chat_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> DomainResult<Json<Value>> {
    let who = require_principal(&state, &headers)?;
    state.auth.require_membership(&who.user_id, &group_id).await?;

    let messages = state
        .groups
        .messages(&group_id, clamp_limit(query.limit, 50), query.before)
        .await;
    Ok(Json(json!({ "messages": messages, "count": messages.len() })))
}

async fn chat_send_alert(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(String, String)>,
    Json(body): Json<GroupAlertSend>,
) -> DomainResult<Json<Value>> {
    state.auth.require_membership(&user_id, &group_id).await?;
    if let Some(pos) = &body.location {
        validate_coords(pos.lat, pos.lng)?;
    }
    let message = state.groups.send_alert(&group_id, &user_id, body).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

#[derive(Debug, Deserialize)]
struct MarkReadBody {
    #[serde(default)]
    upto_ts: Option<DateTime<Utc>>,
}

async fn chat_mark_read(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(String, String)>,
    Json(body): Json<MarkReadBody>,
) -> DomainResult<Json<Value>> {
    state.auth.require_membership(&user_id, &group_id).await?;
    let marked = state.groups.mark_read(&group_id, &user_id, body.upto_ts).await;
    Ok(Json(json!({ "success": true, "marked": marked })))
}

async fn chat_unread(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(String, String)>,
) -> DomainResult<Json<Value>> {
    state.auth.require_membership(&user_id, &group_id).await?;
    let unread = state.groups.unread_count(&group_id, &user_id).await;
    Ok(Json(json!({ "unread_count": unread })))
}
