//! Client-side mirror of a remote debug session
//!
//! [`SessionState`] is folded from the ordered event stream of one session.
//! Each fold step reports an [`Effect`] telling the caller whether the
//! diagram needs to be redrawn and whether something should be shown to the
//! user.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::protocol::ServerEvent;
use crate::types::{Context, SessionSnapshot, SessionStatus, StepRecord};

/// Local view of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub current_step: Option<String>,
    pub context: Context,
    pub history: Vec<StepRecord>,
}

/// Something the user should see
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    ExecutionError { message: String },
    DebugError { message: String },
    TransportError { message: String },
    Inspection { path: String, value: serde_json::Value },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::ExecutionError { message } => write!(f, "Execution error: {}", message),
            Alert::DebugError { message } => write!(f, "Debug error: {}", message),
            Alert::TransportError { message } => write!(f, "Connection error: {}", message),
            Alert::Inspection { path, value } => write!(f, "{} = {}", path, value),
        }
    }
}

/// Outcome of applying one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effect {
    pub redraw: bool,
    pub alert: Option<Alert>,
}

impl Effect {
    fn none() -> Self {
        Self::default()
    }

    fn redraw() -> Self {
        Self {
            redraw: true,
            alert: None,
        }
    }

    fn alert(alert: Alert) -> Self {
        Self {
            redraw: false,
            alert: Some(alert),
        }
    }
}

impl SessionState {
    /// Fresh mirror for a newly created session
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    /// Stream is open and the start command is about to go out
    pub fn connected(&mut self) {
        self.status = SessionStatus::Connected;
    }

    /// Fold one inbound event into the mirror
    pub fn apply(&mut self, event: &ServerEvent) -> Effect {
        match event {
            ServerEvent::StateUpdate { session } => {
                if let Some(snapshot) = session {
                    self.current_step = snapshot.current_step.clone();
                    self.replace_data(snapshot);
                    if let Some(status) = snapshot.status {
                        self.status = status;
                    }
                }
                Effect::redraw()
            }
            ServerEvent::ExecutionStarted { .. } => {
                info!("Execution started");
                self.status = SessionStatus::Running;
                Effect::none()
            }
            ServerEvent::StepStarted { data, session } => {
                if let Some(data) = data {
                    info!("Step started: {}", data.step_name);
                    self.current_step = Some(data.step_id.clone());
                }
                if let Some(snapshot) = session {
                    self.replace_data(snapshot);
                }
                Effect::redraw()
            }
            ServerEvent::StepCompleted { data, session } => {
                if let Some(data) = data {
                    debug!("Step completed: {} ({:?})", data.step_name, data.success);
                }
                if let Some(snapshot) = session {
                    self.replace_data(snapshot);
                }
                Effect::redraw()
            }
            ServerEvent::ExecutionCompleted { .. } => {
                info!("Execution completed");
                self.status = SessionStatus::Completed;
                Effect::redraw()
            }
            ServerEvent::ExecutionError { error } => {
                warn!("Execution error: {}", error);
                self.status = SessionStatus::Error;
                Effect::alert(Alert::ExecutionError {
                    message: error.clone(),
                })
            }
            ServerEvent::Inspection { path, value } => {
                debug!("Inspection result: {} = {}", path, value);
                Effect::alert(Alert::Inspection {
                    path: path.clone(),
                    value: value.clone(),
                })
            }
            ServerEvent::Error { message } => {
                warn!("Debug error: {}", message);
                self.status = SessionStatus::Error;
                Effect::alert(Alert::DebugError {
                    message: message.clone(),
                })
            }
        }
    }

    /// The stream closed. Terminal statuses survive, anything else becomes
    /// `disconnected`.
    pub fn closed(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Disconnected;
        }
    }

    /// The transport failed; no retry is attempted
    pub fn transport_failed(&mut self, message: impl Into<String>) -> Effect {
        self.status = SessionStatus::Error;
        Effect::alert(Alert::TransportError {
            message: message.into(),
        })
    }

    /// User asked to stop; the stream is closed right after
    pub fn stopped(&mut self) {
        self.status = SessionStatus::Stopped;
    }

    fn replace_data(&mut self, snapshot: &SessionSnapshot) {
        self.context = snapshot.context.clone().unwrap_or_default();
        self.history = snapshot.history.clone().unwrap_or_default();
    }
}
