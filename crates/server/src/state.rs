//! Session state for the engine

use crate::registry::FlowRegistry;
use chrono::Utc;
use flowdbg_common::{
    Context, Error, FlowDefinition, Result, ServerEvent, SessionSnapshot, SessionStatus,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Snapshot shared between a socket handler and its executor
pub type SharedSnapshot = Arc<Mutex<SessionSnapshot>>;

/// Control signal for a running executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Leave the pause and run until the next breakpoint
    Resume,
    /// Leave the pause and pause again before the next step
    Step,
    Stop,
}

/// One debug session
pub struct SessionEntry {
    pub flow: Arc<FlowDefinition>,
    pub snapshot: SharedSnapshot,
    control: Mutex<Option<mpsc::UnboundedSender<Signal>>>,
}

impl SessionEntry {
    fn new(id: String, flow: Arc<FlowDefinition>, initial_context: Context) -> Self {
        let snapshot = SessionSnapshot {
            id,
            flow_name: flow.name.clone(),
            status: Some(SessionStatus::Idle),
            current_step: None,
            context: Some(initial_context),
            history: Some(Vec::new()),
            breakpoints: Vec::new(),
            created_at: Some(Utc::now()),
        };
        Self {
            flow,
            snapshot: Arc::new(Mutex::new(snapshot)),
            control: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.lock().clone()
    }

    /// Queue a `state_update` carrying the current snapshot
    pub fn publish(&self, events: &mpsc::UnboundedSender<ServerEvent>) {
        let snapshot = self.snapshot.lock();
        let _ = events.send(ServerEvent::StateUpdate {
            session: Some(snapshot.clone()),
        });
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.lock().status.unwrap_or_default()
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.snapshot.lock().status = Some(status);
    }

    /// Attach a control channel for a new run. Fails while a run is active.
    pub fn begin_run(&self) -> Result<mpsc::UnboundedReceiver<Signal>> {
        let mut control = self.control.lock();
        if control.as_ref().map_or(false, |tx| !tx.is_closed()) {
            return Err(Error::InvalidStateTransition {
                from: self.status().to_string(),
                to: SessionStatus::Running.to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *control = Some(tx);
        Ok(rx)
    }

    /// Forward a signal to the active run, if any
    pub fn signal(&self, signal: Signal) {
        {
            let mut snapshot = self.snapshot.lock();
            match signal {
                Signal::Resume | Signal::Step if snapshot.status == Some(SessionStatus::Paused) => {
                    snapshot.status = Some(SessionStatus::Running);
                }
                Signal::Stop => snapshot.status = Some(SessionStatus::Stopped),
                _ => {}
            }
        }
        if let Some(tx) = self.control.lock().as_ref() {
            if tx.send(signal).is_err() {
                debug!("No active run for {:?}", signal);
            }
        }
    }

    /// Drop the control channel; an active run stops at its next check
    pub fn detach(&self) {
        self.control.lock().take();
    }

    pub fn add_breakpoint(&self, step_id: &str) {
        let mut snapshot = self.snapshot.lock();
        if !snapshot.breakpoints.iter().any(|b| b == step_id) {
            snapshot.breakpoints.push(step_id.to_string());
        }
    }

    pub fn remove_breakpoint(&self, step_id: &str) {
        self.snapshot.lock().breakpoints.retain(|b| b != step_id);
    }

    /// Resolve a dotted path inside the session context
    pub fn inspect(&self, path: &str) -> serde_json::Value {
        let snapshot = self.snapshot.lock();
        let context = serde_json::Value::Object(snapshot.context.clone().unwrap_or_default());
        if path.is_empty() {
            return context;
        }
        let mut value = &context;
        for key in path.split('.') {
            match value.get(key) {
                Some(v) => value = v,
                None => return serde_json::Value::Null,
            }
        }
        value.clone()
    }
}

/// All sessions plus the flows they may run
#[derive(Clone)]
pub struct SessionStore {
    flows: Arc<FlowRegistry>,
    sessions: Arc<RwLock<HashMap<String, Arc<SessionEntry>>>>,
}

impl SessionStore {
    pub fn new(flows: FlowRegistry) -> Self {
        Self {
            flows: Arc::new(flows),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    /// Create a new debug session
    pub fn create_session(&self, flow_name: &str, initial_context: Context) -> Result<String> {
        let flow = self
            .flows
            .get(flow_name)
            .ok_or_else(|| Error::not_found("flow", flow_name))?;

        let id = Uuid::new_v4().to_string();
        let entry = SessionEntry::new(id.clone(), flow, initial_context);
        self.sessions.write().insert(id.clone(), Arc::new(entry));

        info!("Created debug session {} for flow {}", id, flow_name);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
