//! Core types for flowdbg

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Variable name -> value mapping carried by a session
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Debug session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[serde(alias = "created", alias = "waiting")]
    Idle,
    Connected,
    Running,
    Paused,
    Completed,
    Error,
    Stopped,
    Disconnected,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 8] = [
        SessionStatus::Idle,
        SessionStatus::Connected,
        SessionStatus::Running,
        SessionStatus::Paused,
        SessionStatus::Completed,
        SessionStatus::Error,
        SessionStatus::Stopped,
        SessionStatus::Disconnected,
    ];

    /// Statuses a closed stream must not overwrite
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Error)
    }

    pub fn can_start(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Completed | Self::Error | Self::Stopped | Self::Disconnected
        )
    }

    pub fn can_continue(self) -> bool {
        self == Self::Paused
    }

    pub fn can_step(self) -> bool {
        self == Self::Paused
    }

    pub fn can_stop(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "idle" | "created" | "waiting" => Ok(Self::Idle),
            "connected" => Ok(Self::Connected),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown session status: {}",
                other
            ))),
        }
    }
}

/// Unknown status strings decode to `None` instead of failing the message.
fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<Option<SessionStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Timestamps that do not parse decode to `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => parse_timestamp(&s),
        _ => None,
    })
}

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Action,
    Validation,
    Decision,
    #[serde(other)]
    Other,
}

impl Default for StepType {
    fn default() -> Self {
        Self::Action
    }
}

/// A single step of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub step_type: StepType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub inputs: Context,
    /// Outputs the engine merges into the context when the step succeeds
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub outputs: Context,
    /// When set, the engine fails the step with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fails_with: Option<String>,
}

impl FlowStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            description: String::new(),
            next_steps: Vec::new(),
            inputs: Context::new(),
            outputs: Context::new(),
            fails_with: None,
        }
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next_steps.push(next.into());
        self
    }
}

/// Engine-side flow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_step: String,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
}

impl FlowDefinition {
    pub fn step(&self, id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            steps: self.steps.len(),
            start_step: self.start_step.clone(),
        }
    }
}

/// Entry of the flow listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: usize,
    #[serde(default)]
    pub start_step: String,
}

/// Flow listing response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowList {
    #[serde(default)]
    pub flows: Vec<FlowSummary>,
}

/// Flow detail as fetched by the client; immutable for a session's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDetail {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub diagram: String,
}

impl FlowDetail {
    pub fn step(&self, id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(default)]
    pub step_id: String,
    #[serde(default)]
    pub step_name: String,
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub inputs: Context,
    #[serde(default)]
    pub outputs: Context,
    #[serde(default)]
    pub error: Option<String>,
}

/// Engine-side session as serialized onto the wire
///
/// Every field is optional so a partial snapshot still projects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub flow_name: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub context: Option<Context>,
    #[serde(default)]
    pub history: Option<Vec<StepRecord>>,
    #[serde(default)]
    pub breakpoints: Vec<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of the create-session call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub flow_name: String,
    #[serde(default)]
    pub initial_context: Context,
}

/// Reply to the create-session call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub flow_name: String,
    pub status: String,
    pub websocket_url: String,
}

/// Engine landing info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    #[serde(default)]
    pub flows: Vec<String>,
    #[serde(default)]
    pub active_sessions: usize,
}
