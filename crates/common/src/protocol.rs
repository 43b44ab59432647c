//! Session stream wire protocol
//!
//! Both directions carry one JSON object per WebSocket text frame. Client
//! commands are tagged by `command`, server events by `type`.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::SessionSnapshot;

/// Client -> server command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Continue,
    Step,
    Stop,
    AddBreakpoint { step_id: String },
    RemoveBreakpoint { step_id: String },
    Inspect {
        #[serde(default)]
        path: String,
    },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Continue => "continue",
            Self::Step => "step",
            Self::Stop => "stop",
            Self::AddBreakpoint { .. } => "add_breakpoint",
            Self::RemoveBreakpoint { .. } => "remove_breakpoint",
            Self::Inspect { .. } => "inspect",
        }
    }

    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an inbound command frame, `None` for anything unrecognised
    pub fn decode(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                trace!("Ignoring command frame: {}", e);
                None
            }
        }
    }
}

/// Payload of `step_started` / `step_completed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEventData {
    pub step_id: String,
    #[serde(default)]
    pub step_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// Server -> client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    StateUpdate {
        #[serde(default)]
        session: Option<SessionSnapshot>,
    },
    ExecutionStarted {
        #[serde(default)]
        session_id: String,
    },
    StepStarted {
        #[serde(default)]
        data: Option<StepEventData>,
        #[serde(default)]
        session: Option<SessionSnapshot>,
    },
    StepCompleted {
        #[serde(default)]
        data: Option<StepEventData>,
        #[serde(default)]
        session: Option<SessionSnapshot>,
    },
    ExecutionCompleted {
        #[serde(default)]
        session_id: String,
    },
    ExecutionError {
        #[serde(default)]
        error: String,
    },
    Inspection {
        #[serde(default)]
        path: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateUpdate { .. } => "state_update",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionError { .. } => "execution_error",
            Self::Inspection { .. } => "inspection",
            Self::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an inbound event frame.
    ///
    /// Unknown `type` values and malformed frames yield `None`; the session
    /// carries on as if nothing arrived.
    pub fn decode(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(event) => Some(event),
            Err(e) => {
                trace!("Ignoring server frame: {}", e);
                None
            }
        }
    }
}
