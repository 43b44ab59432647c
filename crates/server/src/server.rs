//! HTTP and WebSocket routes
//!
//! ```text
//! GET  /debug/                      service info
//! GET  /debug/flows                 flow summaries
//! GET  /debug/flows/:name           flow detail with diagram
//! POST /debug/sessions              create a session
//! GET  /debug/sessions/:id          session snapshot
//! GET  /debug/sessions/:id/ws       command/event stream
//! ```

use crate::config::ServerConfig;
use crate::executor::{FlowExecutor, RunOutcome};
use crate::state::{SessionEntry, SessionStore, Signal};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flowdbg_common::{
    ClientCommand, Context, CreateSessionResponse, Error, FlowList, ServerEvent, ServiceInfo,
    SessionStatus,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    service_name: Arc<str>,
    store: SessionStore,
    step_delay: Duration,
}

impl AppState {
    pub fn new(config: &ServerConfig, store: SessionStore) -> Self {
        Self {
            service_name: Arc::from(config.service_name.as_str()),
            store,
            step_delay: config.step_delay(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/debug/", get(service_info))
        .route("/debug/flows", get(list_flows))
        .route("/debug/flows/:name", get(flow_detail))
        .route("/debug/sessions", post(create_session))
        .route("/debug/sessions/:id", get(get_session))
        .route("/debug/sessions/:id/ws", get(session_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!("Debug engine listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": detail.into() }))).into_response()
}

async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: state.service_name.to_string(),
        flows: state.store.flows().names(),
        active_sessions: state.store.len(),
    })
}

async fn list_flows(State(state): State<AppState>) -> Json<FlowList> {
    Json(FlowList {
        flows: state.store.flows().list_flows(),
    })
}

async fn flow_detail(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.store.flows().flow_detail(&name) {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    flow_name: Option<String>,
    #[serde(default)]
    initial_context: Context,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    let Some(flow_name) = body.flow_name.filter(|n| !n.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "flow_name is required");
    };

    match state.store.create_session(&flow_name, body.initial_context) {
        Ok(session_id) => Json(CreateSessionResponse {
            websocket_url: format!("/debug/sessions/{}/ws", session_id),
            session_id,
            flow_name,
            status: "created".to_string(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id) {
        Some(entry) => Json(entry.snapshot()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Session not found"),
    }
}

async fn session_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let entry = state.store.get(&id);
    ws.on_upgrade(move |socket| async move {
        match entry {
            Some(entry) => handle_session_socket(socket, id, entry, state.step_delay).await,
            None => reject_socket(socket).await,
        }
    })
}

/// Close code 4004 mirrors a 404 for sockets
async fn reject_socket(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 4004,
            reason: "Session not found".into(),
        })))
        .await;
}

async fn handle_session_socket(
    socket: WebSocket,
    session_id: String,
    entry: Arc<SessionEntry>,
    step_delay: Duration,
) {
    debug!("Debug socket opened for {}", session_id);
    let (mut ws_write, mut ws_read) = socket.split();
    let (events, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {}: {}", event.kind(), e);
                    continue;
                }
            };
            if let Err(e) = ws_write.send(Message::Text(text)).await {
                debug!("Debug socket write ended: {}", e);
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    while let Some(frame) = ws_read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Debug socket error: {}", e);
                break;
            }
        };

        let command = ClientCommand::decode(&text);
        if let Some(command) = &command {
            debug!("Session {} command: {}", session_id, command.name());
        }

        match command {
            Some(ClientCommand::Start) => start_run(&session_id, &entry, &events, step_delay),
            Some(ClientCommand::Continue) => entry.signal(Signal::Resume),
            Some(ClientCommand::Step) => entry.signal(Signal::Step),
            Some(ClientCommand::Stop) => {
                entry.signal(Signal::Stop);
                break;
            }
            Some(ClientCommand::AddBreakpoint { step_id }) => entry.add_breakpoint(&step_id),
            Some(ClientCommand::RemoveBreakpoint { step_id }) => entry.remove_breakpoint(&step_id),
            Some(ClientCommand::Inspect { path }) => {
                let value = entry.inspect(&path);
                let _ = events.send(ServerEvent::Inspection { path, value });
            }
            None => {}
        }

        entry.publish(&events);
    }

    entry.detach();
    drop(events);
    let _ = writer.await;
    debug!("Debug socket closed for {}", session_id);
}

fn start_run(
    session_id: &str,
    entry: &Arc<SessionEntry>,
    events: &mpsc::UnboundedSender<ServerEvent>,
    step_delay: Duration,
) {
    let control = match entry.begin_run() {
        Ok(control) => control,
        Err(e) => {
            warn!("Ignoring start for {}: {}", session_id, e);
            return;
        }
    };

    entry.set_status(SessionStatus::Running);
    let _ = events.send(ServerEvent::ExecutionStarted {
        session_id: session_id.to_string(),
    });

    let executor = FlowExecutor::new(
        entry.flow.clone(),
        entry.snapshot.clone(),
        control,
        events.clone(),
    )
    .with_step_delay(step_delay);
    let events = events.clone();
    let session_id = session_id.to_string();

    tokio::spawn(async move {
        match executor.execute().await {
            Ok(RunOutcome::Completed) => {
                let _ = events.send(ServerEvent::ExecutionCompleted { session_id });
            }
            Ok(RunOutcome::Stopped) => {}
            Err(Error::Execution(message)) => {
                let _ = events.send(ServerEvent::ExecutionError { error: message });
            }
            Err(e) => {
                let _ = events.send(ServerEvent::ExecutionError {
                    error: e.to_string(),
                });
            }
        }
    });
}
