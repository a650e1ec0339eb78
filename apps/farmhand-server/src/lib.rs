//! HTTP and WebSocket surface.
//!
//! All shared components are explicit handles constructed in
//! `run_server` and injected through `AppState`; shutdown stops them
//! in reverse order (monitor, hub, sweepers).

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use farmhand_config::FarmConfig;
use farmhand_core::config::{PlatingConfig, ProfileConfig, RotationConfig};
use farmhand_core::types::TaskState;
use farmhand_fleet::{
    BulkSelector, FleetService, HttpPrinterClient, PrinterCommand,
};
use farmhand_orchestrator::{BatchOrchestrator, BatchRequest};
use farmhand_realtime::{
    ClientMessage, FleetView, MonitorSettings, Outbound, RealtimeMonitor, WebSocketHub,
};
use farmhand_slicer::{HttpSlicerClient, RetryPolicy, Retrying, SlicerGateway};
use farmhand_stores::{JsonSessionStore, SessionStore, StoreError, TaskRegistry};

#[derive(Clone)]
pub struct AppState {
    registry: Arc<TaskRegistry>,
    sessions: Arc<JsonSessionStore>,
    orchestrator: Arc<BatchOrchestrator>,
    fleet: Arc<FleetService>,
    hub: Arc<WebSocketHub>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: message.into(),
        }),
    )
}

fn map_store_error(err: StoreError) -> (StatusCode, Json<ErrorBody>) {
    match err {
        StoreError::NotFound(id) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("session '{id}' not found"),
        ),
        StoreError::InvalidKey(key) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            format!("invalid key '{key}'"),
        ),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitBatchRequest {
    session_id: String,
    /// Defaults to the session's selected files.
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    rotation: RotationConfig,
    profile: ProfileConfig,
    #[serde(default)]
    plating: Option<PlatingConfig>,
}

#[derive(Debug, Serialize)]
struct SubmitBatchResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct BulkCommandRequest {
    command: PrinterCommand,
    #[serde(flatten)]
    selector: BulkSelector,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process-with-rotation", post(submit_batch))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:task_id", get(get_task))
        .route(
            "/api/sessions/:session_id",
            get(get_session).patch(patch_session),
        )
        .route("/api/printers", get(list_printers))
        .route("/api/printers/:printer_id/command", post(printer_command))
        .route("/api/fleet/bulk-command", post(bulk_command))
        .route(
            "/api/fleet/bulk-command/validate",
            post(validate_bulk_command),
        )
        .route("/ws/fleet", get(ws_fleet))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit_batch(
    State(state): State<AppState>,
    Json(payload): Json<SubmitBatchRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let session = state
        .sessions
        .load(&payload.session_id)
        .await
        .map_err(map_store_error)?;

    let files = payload
        .files
        .unwrap_or_else(|| session.selected_files.clone());
    let task_id = uuid::Uuid::new_v4().to_string();
    let request = BatchRequest {
        task_id: task_id.clone(),
        session_id: payload.session_id,
        files,
        rotation: payload.rotation,
        profile: payload.profile,
        plating: payload.plating,
    };
    state.orchestrator.submit(request).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBatchResponse { task_id }),
    ))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let mut task = state.registry.get(&task_id).await.ok_or_else(|| {
        error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("task '{task_id}' not found"),
        )
    })?;
    // Results are part of the snapshot only once the task completed.
    if task.status != TaskState::Completed {
        task.results.clear();
    }
    Ok(Json(task))
}

async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let mut tasks = state.registry.list().await;
    for task in &mut tasks {
        if task.status != TaskState::Completed {
            task.results.clear();
        }
    }
    Json(tasks)
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let session = state
        .sessions
        .load(&session_id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(session))
}

async fn patch_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let updated = state
        .sessions
        .update(&session_id, Box::new(move |session| session.merge(&patch)))
        .await
        .map_err(map_store_error)?;
    Ok(Json(updated))
}

async fn list_printers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fleet.list().await)
}

async fn printer_command(
    State(state): State<AppState>,
    Path(printer_id): Path<String>,
    Json(command): Json<PrinterCommand>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    state
        .fleet
        .command(&printer_id, &command)
        .await
        .map_err(|e| match e {
            farmhand_fleet::FleetError::NotFound(id) => error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("printer '{id}' not found"),
            ),
            other => error_response(StatusCode::BAD_GATEWAY, "upstream", other.to_string()),
        })?;
    Ok(Json(serde_json::json!({"status": "dispatched"})))
}

async fn bulk_command(
    State(state): State<AppState>,
    Json(payload): Json<BulkCommandRequest>,
) -> impl IntoResponse {
    Json(
        state
            .fleet
            .bulk_command(&payload.selector, &payload.command)
            .await,
    )
}

async fn validate_bulk_command(
    State(state): State<AppState>,
    Json(payload): Json<BulkCommandRequest>,
) -> impl IntoResponse {
    Json(
        state
            .fleet
            .validate_bulk_command(&payload.selector, &payload.command)
            .await,
    )
}

async fn ws_fleet(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state.hub.clone(), socket))
}

/// Bridge one WebSocket onto the hub: drain the hub's outbound channel
/// to the socket, feed inbound frames back as protocol messages.
async fn handle_socket(hub: Arc<WebSocketHub>, socket: WebSocket) {
    let (client_id, mut outbound) = hub.connect().await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Message(message)) => {
                    let Ok(text) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Ping) => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                // Hub forgot us (shutdown or sweep): close politely.
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let message = serde_json::from_str::<ClientMessage>(&text)
                        .unwrap_or(ClientMessage::Unknown);
                    hub.handle_message(&client_id, message).await;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    hub.touch(&client_id).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(client_id = %client_id, error = %e, "websocket receive error");
                    break;
                }
            },
        }
    }
    hub.disconnect(&client_id).await;
}

/// Construct every component, serve until ctrl-c, then stop background
/// work in reverse order: monitor, hub sweeper, registry sweeper.
pub async fn run_server(config: FarmConfig) -> anyhow::Result<()> {
    let registry = Arc::new(TaskRegistry::with_retention(Duration::from_secs(
        config.tasks.retention_hours * 3600,
    )));
    let sessions = Arc::new(
        JsonSessionStore::new(&config.sessions.root_dir)
            .context("create session store root")?,
    );

    let transport = HttpSlicerClient::new(&config.slicer.base_url);
    let slicer: Arc<dyn SlicerGateway> = Arc::new(Retrying::new(
        transport,
        RetryPolicy {
            max_attempts: config.slicer.max_retries,
            delay: Duration::from_secs(config.slicer.retry_delay_secs),
        },
    ));
    let orchestrator = Arc::new(BatchOrchestrator::with_max_concurrent(
        registry.clone(),
        sessions.clone(),
        slicer,
        config.orchestrator.max_concurrent,
    ));

    if let Some(parent) = FsPath::new(&config.fleet.registry_path).parent() {
        std::fs::create_dir_all(parent).context("create fleet registry directory")?;
    }
    let fleet = Arc::new(
        FleetService::load(&config.fleet.registry_path, Arc::new(HttpPrinterClient::new()))
            .context("load printer registry")?,
    );
    let fleet_view: Arc<dyn FleetView> = fleet.clone();
    let hub = Arc::new(WebSocketHub::new(fleet_view.clone()));
    let monitor = RealtimeMonitor::with_settings(
        fleet_view,
        hub.clone(),
        MonitorSettings {
            update_interval: Duration::from_secs(config.realtime.update_interval_secs),
            heartbeat: Duration::from_secs(config.realtime.heartbeat_secs),
        },
    );

    let shutdown = CancellationToken::new();
    let monitor_task = tokio::spawn(monitor.run(shutdown.child_token()));
    let hub_sweeper = tokio::spawn(hub.clone().run_sweeper(shutdown.child_token()));
    let registry_sweeper = tokio::spawn(registry.clone().run_sweeper(shutdown.child_token()));

    let state = AppState {
        registry,
        sessions,
        orchestrator,
        fleet,
        hub: hub.clone(),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("bind {}", config.server.listen))?;
    info!(listen = %config.server.listen, "farmhand-server listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .context("server terminated with error")?;

    shutdown.cancel();
    let _ = monitor_task.await;
    hub.shutdown().await;
    let _ = hub_sweeper.await;
    let _ = registry_sweeper.await;
    info!("farmhand-server stopped");
    Ok(())
}
