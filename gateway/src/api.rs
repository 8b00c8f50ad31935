// Gateway HTTP API
//
// REST endpoints plus SSE streaming of live overlay updates for the
// dashboard UI.

use crate::GatewayState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use fleetview_core::live::topic_for;
use fleetview_core::normalize::{heat_points, normalize_snapshot};
use fleetview_core::{Overlay, ViewMode};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Build the gateway router
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/api/live/stream", get(live_stream_handler))
        .route("/api/drivers/online", get(drivers_online_handler))
        .route("/api/rides/heatmap", post(heatmap_handler))
        .route("/api/rides/driver-stats", post(driver_stats_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Liveness probe
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestampMs": chrono::Utc::now().timestamp_millis(),
    }))
}

/// Frontend bootstrap configuration (maps key, poll period)
async fn config_handler(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "mapsApiKey": state.config.maps_api_key,
        "heatmapPollMs": state.config.heatmap_poll_ms,
    }))
}

#[derive(Deserialize)]
struct StreamQuery {
    mode: ViewMode,
}

/// SSE endpoint for live overlay updates
///
/// Each connected client counts toward the feed for its mode; the
/// feed opens with the first client and closes with the last.
async fn live_stream_handler(
    State(state): State<GatewayState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let mode = query.mode;
    let Some(topic) = topic_for(mode) else {
        return (StatusCode::BAD_REQUEST, "mode must be drivers or heatmap").into_response();
    };

    let mut sub = state.registry.open(topic);
    if state.attach_client(mode).await.is_err() {
        return (StatusCode::BAD_REQUEST, "mode must be drivers or heatmap").into_response();
    }
    info!(target: "gateway", mode = mode.as_str(), "New SSE client connected");

    // Forward envelopes into the SSE channel until the client goes
    // away, then release the feed reference.
    let (tx, rx) = mpsc::channel(64);
    let forward_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = sub.recv() => match maybe {
                    Some(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = tx.closed() => break,
            }
        }
        sub.close();
        forward_state.detach_client(mode).await;
        info!(target: "gateway", mode = mode.as_str(), "SSE client disconnected");
    });

    let stream = ReceiverStream::new(rx).filter_map(|envelope| {
        match serde_json::to_string(&envelope) {
            Ok(json) => Some(Ok::<Event, Infallible>(
                Event::default().event("update").data(json),
            )),
            Err(e) => {
                warn!(target: "gateway", error = %e, "Failed to serialize envelope");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// One-shot normalized driver snapshot
async fn drivers_online_handler(
    State(state): State<GatewayState>,
) -> Result<Json<Overlay>, StatusCode> {
    match state.upstream.fetch_online_drivers().await {
        Ok(raw) => Ok(Json(Overlay::markers(&normalize_snapshot(raw)))),
        Err(e) => {
            warn!(target: "gateway", error = %e, "Driver snapshot fetch failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

fn default_period() -> String {
    "week".to_string()
}

#[derive(Deserialize)]
struct HeatmapRequest {
    #[serde(default = "default_period")]
    period: String,
}

/// One-shot heat point derivation for a reporting period
async fn heatmap_handler(
    State(state): State<GatewayState>,
    Json(request): Json<HeatmapRequest>,
) -> Result<Json<Overlay>, StatusCode> {
    match state.upstream.fetch_ride_clusters(&request.period).await {
        Ok(clusters) => Ok(Json(Overlay::heat(heat_points(&clusters)))),
        Err(e) => {
            warn!(target: "gateway", error = %e, "Cluster fetch failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriverStatsRequest {
    driver_id: String,
    start_date: String,
    end_date: String,
}

/// Passthrough aggregate for the chart views
async fn driver_stats_handler(
    State(state): State<GatewayState>,
    Json(request): Json<DriverStatsRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state
        .upstream
        .fetch_driver_stats(&request.driver_id, &request.start_date, &request.end_date)
        .await
    {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            warn!(target: "gateway", error = %e, "Driver stats fetch failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}
