//! Debugger front end
//!
//! Holds the selected flow, the user's breakpoint set and at most one open
//! session. Breakpoints edited while no stream is open only change the local
//! set; they are replayed when the next session opens.

use crate::client::EngineClient;
use crate::session::SessionHandle;
use flowdbg_common::{
    Alert, BreakpointSet, ClientCommand, Context, DiagramView, Error, FlowDetail, Result,
    SessionState, SessionStatus,
};
use tokio::sync::watch;
use tracing::{info, warn};

pub struct Debugger {
    client: EngineClient,
    flow: Option<FlowDetail>,
    breakpoints: BreakpointSet,
    session: Option<SessionHandle>,
    /// Mirror of a session whose stream never opened
    failed: Option<SessionState>,
    pending_alert: Option<Alert>,
}

impl Debugger {
    pub fn new(client: EngineClient) -> Self {
        Self {
            client,
            flow: None,
            breakpoints: BreakpointSet::new(),
            session: None,
            failed: None,
            pending_alert: None,
        }
    }

    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    /// Fetch a flow definition; any open session and all breakpoints are dropped
    pub async fn select_flow(&mut self, name: &str) -> Result<&FlowDetail> {
        let detail = self.client.flow_detail(name).await?;
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.breakpoints = BreakpointSet::new();
        self.clear_failure();
        Ok(self.flow.insert(detail))
    }

    pub fn flow(&self) -> Option<&FlowDetail> {
        self.flow.as_ref()
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut SessionHandle> {
        self.session.as_mut()
    }

    /// Mirror of the current session, or an idle one
    pub fn state(&self) -> SessionState {
        match (&self.session, &self.failed) {
            (Some(session), _) => session.state(),
            (None, Some(failed)) => failed.clone(),
            (None, None) => SessionState::default(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        match (&self.session, &self.failed) {
            (Some(session), _) => session.status(),
            (None, Some(failed)) => failed.status,
            (None, None) => SessionStatus::default(),
        }
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<SessionState>> {
        self.session.as_ref().map(SessionHandle::subscribe)
    }

    /// Flip a breakpoint; returns whether the step now has one
    pub fn toggle_breakpoint(&mut self, step_id: &str) -> Result<bool> {
        let flow = self
            .flow
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("no flow selected".to_string()))?;
        if flow.step(step_id).is_none() {
            return Err(Error::not_found("step", step_id));
        }

        let command = self.breakpoints.toggle(step_id);
        if let Some(session) = self.session.as_ref().filter(|s| s.is_open()) {
            session.send(command)?;
        }
        Ok(self.breakpoints.contains(step_id))
    }

    /// Create a session for the selected flow and start it
    pub async fn start(&mut self, initial_context: Context) -> Result<&mut SessionHandle> {
        let flow_name = match &self.flow {
            Some(flow) => flow.name.clone(),
            None => return Err(Error::InvalidConfig("no flow selected".to_string())),
        };
        let status = self.status();
        if !status.can_start() {
            return Err(Error::InvalidStateTransition {
                from: status.to_string(),
                to: SessionStatus::Running.to_string(),
            });
        }
        if let Some(previous) = self.session.take() {
            previous.close().await;
        }

        let created = self.client.create_session(&flow_name, initial_context).await?;
        let url = self.client.websocket_url(&created.session_id)?;
        info!("Session {} created for {}", created.session_id, flow_name);

        let mut opening = self.breakpoints.replay();
        opening.push(ClientCommand::Start);
        self.clear_failure();
        match SessionHandle::connect(url.as_str(), created.session_id.clone(), opening).await {
            Ok(handle) => Ok(self.session.insert(handle)),
            Err(e) => {
                warn!("Stream for session {} did not open: {}", created.session_id, e);
                let mut state = SessionState::for_session(created.session_id);
                self.pending_alert = state.transport_failed(e.to_string()).alert;
                self.failed = Some(state);
                Err(e)
            }
        }
    }

    fn clear_failure(&mut self) {
        self.failed = None;
        self.pending_alert = None;
    }

    fn active(&self) -> Result<&SessionHandle> {
        self.session.as_ref().ok_or(Error::NotConnected)
    }

    pub fn continue_run(&self) -> Result<()> {
        self.active()?.continue_run()
    }

    pub fn step(&self) -> Result<()> {
        self.active()?.step()
    }

    pub fn stop(&self) -> Result<()> {
        self.active()?.stop()
    }

    pub fn inspect(&self, path: &str) -> Result<()> {
        self.active()?.inspect(path)
    }

    /// Next alert of the open session; pends forever without one
    pub async fn next_alert(&mut self) -> Option<Alert> {
        if let Some(alert) = self.pending_alert.take() {
            return Some(alert);
        }
        match self.session.as_mut() {
            Some(session) => session.next_alert().await,
            None => std::future::pending().await,
        }
    }

    /// Close the stream and return the final mirror
    pub async fn close(&mut self) -> Option<SessionState> {
        match self.session.take() {
            Some(session) => Some(session.close().await),
            None => None,
        }
    }

    /// Diagram marks for the current state
    pub fn view(&self) -> Option<DiagramView> {
        let flow = self.flow.as_ref()?;
        Some(DiagramView::project(flow, &self.state(), &self.breakpoints))
    }

    pub fn render_text(&self) -> Option<String> {
        let flow = self.flow.as_ref()?;
        self.view().map(|view| view.to_text(flow))
    }

    pub fn render_mermaid(&self) -> Option<String> {
        let flow = self.flow.as_ref()?;
        self.view().map(|view| view.to_mermaid(&flow.diagram))
    }
}
