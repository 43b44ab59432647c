//! Session controller
//!
//! One actor task per open session owns the WebSocket and the local
//! [`SessionState`] mirror. The [`SessionHandle`] talks to it through an
//! mpsc channel; the actor publishes every visible change of the mirror on a
//! `watch` channel and forwards alerts on a second mpsc channel.

use flowdbg_common::{Alert, ClientCommand, Error, Result, ServerEvent, SessionState, SessionStatus};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

enum Outbound {
    Command(ClientCommand),
    Stop,
    Close,
}

/// Handle to a running session actor
pub struct SessionHandle {
    session_id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<SessionState>,
    alerts: mpsc::UnboundedReceiver<Alert>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Connect to a session stream and send `opening` once it is up
    pub async fn connect(
        url: &str,
        session_id: impl Into<String>,
        opening: Vec<ClientCommand>,
    ) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        info!("Connected to {}", url);
        Ok(Self::spawn(socket, session_id, opening))
    }

    /// Drive an already established stream
    pub fn spawn<S>(socket: S, session_id: impl Into<String>, opening: Vec<ClientCommand>) -> Self
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let session_id = session_id.into();
        let mut state = SessionState::for_session(session_id.clone());
        state.connected();

        let (publish, state_rx) = watch::channel(state.clone());
        let (alerts_tx, alerts) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let mirror = Mirror {
            state,
            publish,
            alerts: alerts_tx,
        };
        let task = tokio::spawn(run(socket, mirror, opening, outbound_rx));

        Self {
            session_id,
            outbound,
            state: state_rx,
            alerts,
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Latest published mirror
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    /// Receiver that wakes on every published change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn continue_run(&self) -> Result<()> {
        self.check(SessionStatus::can_continue, SessionStatus::Running)?;
        self.send(ClientCommand::Continue)
    }

    pub fn step(&self) -> Result<()> {
        self.check(SessionStatus::can_step, SessionStatus::Running)?;
        self.send(ClientCommand::Step)
    }

    /// Send `stop` and close the stream; the mirror ends `stopped`
    pub fn stop(&self) -> Result<()> {
        self.check(SessionStatus::can_stop, SessionStatus::Stopped)?;
        self.outbound
            .send(Outbound::Stop)
            .map_err(|_| Error::NotConnected)
    }

    pub fn add_breakpoint(&self, step_id: &str) -> Result<()> {
        self.send(ClientCommand::AddBreakpoint {
            step_id: step_id.to_string(),
        })
    }

    pub fn remove_breakpoint(&self, step_id: &str) -> Result<()> {
        self.send(ClientCommand::RemoveBreakpoint {
            step_id: step_id.to_string(),
        })
    }

    /// Ask the engine for a dotted context path; the answer arrives as an alert
    pub fn inspect(&self, path: &str) -> Result<()> {
        self.send(ClientCommand::Inspect {
            path: path.to_string(),
        })
    }

    /// Queue a command without status checks
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        debug!("Queue {} for {}", command.name(), self.session_id);
        self.outbound
            .send(Outbound::Command(command))
            .map_err(|_| Error::NotConnected)
    }

    fn check(&self, allowed: fn(SessionStatus) -> bool, to: SessionStatus) -> Result<()> {
        let status = self.status();
        if allowed(status) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: status.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Wait until the mirror satisfies `predicate`
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let state = self
            .state
            .wait_for(predicate)
            .await
            .map_err(|_| Error::NotConnected)?
            .clone();
        Ok(state)
    }

    pub async fn next_alert(&mut self) -> Option<Alert> {
        self.alerts.recv().await
    }

    pub fn try_alert(&mut self) -> Option<Alert> {
        self.alerts.try_recv().ok()
    }

    /// Wait for the actor to exit
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task for {} failed: {}", self.session_id, e);
            }
        }
    }

    /// Close the stream without stopping the run and return the final mirror
    pub async fn close(mut self) -> SessionState {
        let _ = self.outbound.send(Outbound::Close);
        self.finished().await;
        self.state()
    }
}

/// Actor-owned mirror plus its output channels
struct Mirror {
    state: SessionState,
    publish: watch::Sender<SessionState>,
    alerts: mpsc::UnboundedSender<Alert>,
}

impl Mirror {
    fn publish(&self) {
        self.publish.send_replace(self.state.clone());
    }

    fn alert(&self, alert: Alert) {
        let _ = self.alerts.send(alert);
    }

    fn on_text(&mut self, text: &str) {
        let Some(event) = ServerEvent::decode(text) else {
            return;
        };
        let before = self.state.status;
        let effect = self.state.apply(&event);
        if effect.redraw || self.state.status != before {
            self.publish();
        }
        if let Some(alert) = effect.alert {
            self.alert(alert);
        }
    }

    fn closed(&mut self) {
        self.state.closed();
        self.publish();
    }

    fn stopped(&mut self) {
        self.state.stopped();
        self.publish();
    }

    fn transport_failed(&mut self, message: String) {
        warn!("Session transport failed: {}", message);
        let effect = self.state.transport_failed(message);
        self.publish();
        if let Some(alert) = effect.alert {
            self.alert(alert);
        }
    }
}

async fn send_command<S>(socket: &mut S, command: &ClientCommand) -> std::result::Result<(), String>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = command.encode().map_err(|e| e.to_string())?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|e| e.to_string())
}

async fn run<S>(
    mut socket: S,
    mut mirror: Mirror,
    opening: Vec<ClientCommand>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    for command in &opening {
        if let Err(e) = send_command(&mut socket, command).await {
            mirror.transport_failed(e);
            return;
        }
    }

    loop {
        tokio::select! {
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => mirror.on_text(&text),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        debug!("Server closed stream: {} {}", frame.code, frame.reason);
                    }
                    mirror.closed();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    mirror.transport_failed(e.to_string());
                    break;
                }
                None => {
                    mirror.closed();
                    break;
                }
            },
            request = outbound.recv() => match request {
                Some(Outbound::Command(command)) => {
                    if let Err(e) = send_command(&mut socket, &command).await {
                        mirror.transport_failed(e);
                        break;
                    }
                }
                Some(Outbound::Stop) => {
                    if let Err(e) = send_command(&mut socket, &ClientCommand::Stop).await {
                        debug!("Stop not delivered: {}", e);
                    }
                    let _ = socket.close().await;
                    mirror.stopped();
                    break;
                }
                Some(Outbound::Close) | None => {
                    let _ = socket.close().await;
                    mirror.closed();
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdbg_common::{SessionSnapshot, StepEventData};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    type Peer = WebSocketStream<DuplexStream>;

    async fn pair(opening: Vec<ClientCommand>) -> (SessionHandle, Peer) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (SessionHandle::spawn(client, "s1", opening), server)
    }

    async fn recv_command(peer: &mut Peer) -> ClientCommand {
        loop {
            match peer.next().await {
                Some(Ok(Message::Text(text))) => return ClientCommand::decode(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("expected a command, got {:?}", other),
            }
        }
    }

    async fn send_event(peer: &mut Peer, event: ServerEvent) {
        peer.send(Message::Text(event.encode().unwrap())).await.unwrap();
    }

    fn paused_at(step: &str) -> ServerEvent {
        ServerEvent::StateUpdate {
            session: Some(SessionSnapshot {
                id: "s1".to_string(),
                status: Some(SessionStatus::Paused),
                current_step: Some(step.to_string()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_opening_commands_are_sent_in_order() {
        let opening = vec![
            ClientCommand::AddBreakpoint {
                step_id: "b".to_string(),
            },
            ClientCommand::Start,
        ];
        let (handle, mut peer) = pair(opening).await;
        assert_eq!(handle.status(), SessionStatus::Connected);
        assert_eq!(handle.id(), "s1");

        assert_eq!(
            recv_command(&mut peer).await,
            ClientCommand::AddBreakpoint {
                step_id: "b".to_string()
            }
        );
        assert_eq!(recv_command(&mut peer).await, ClientCommand::Start);
    }

    #[tokio::test]
    async fn test_commands_are_gated_by_status() {
        let (mut handle, mut peer) = pair(vec![ClientCommand::Start]).await;
        recv_command(&mut peer).await;

        assert!(matches!(
            handle.continue_run(),
            Err(Error::InvalidStateTransition { .. })
        ));

        send_event(&mut peer, ServerEvent::ExecutionStarted { session_id: "s1".to_string() }).await;
        handle.wait_for(|s| s.status == SessionStatus::Running).await.unwrap();
        assert!(handle.step().is_err());

        send_event(&mut peer, paused_at("b")).await;
        let state = handle.wait_for(|s| s.status == SessionStatus::Paused).await.unwrap();
        assert_eq!(state.current_step.as_deref(), Some("b"));

        handle.step().unwrap();
        assert_eq!(recv_command(&mut peer).await, ClientCommand::Step);
        handle.continue_run().unwrap();
        assert_eq!(recv_command(&mut peer).await, ClientCommand::Continue);
    }

    #[tokio::test]
    async fn test_step_events_update_mirror() {
        let (mut handle, mut peer) = pair(vec![]).await;
        let mut context = flowdbg_common::Context::new();
        context.insert("validated".to_string(), true.into());

        send_event(
            &mut peer,
            ServerEvent::StepStarted {
                data: Some(StepEventData {
                    step_id: "validate".to_string(),
                    step_name: "Validate".to_string(),
                    success: None,
                }),
                session: Some(SessionSnapshot {
                    context: Some(context),
                    ..Default::default()
                }),
            },
        )
        .await;

        let state = handle
            .wait_for(|s| s.current_step.as_deref() == Some("validate"))
            .await
            .unwrap();
        assert_eq!(state.context["validated"], true);
        assert_eq!(state.status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_ignored() {
        let (mut handle, mut peer) = pair(vec![]).await;
        peer.send(Message::Text("not json".to_string())).await.unwrap();
        peer.send(Message::Text(r#"{"type":"mystery","x":1}"#.to_string()))
            .await
            .unwrap();
        send_event(&mut peer, paused_at("a")).await;

        handle.wait_for(|s| s.status == SessionStatus::Paused).await.unwrap();
        assert!(handle.try_alert().is_none());
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn test_inspection_and_errors_raise_alerts() {
        let (mut handle, mut peer) = pair(vec![]).await;

        handle.inspect("user.email").unwrap();
        assert_eq!(
            recv_command(&mut peer).await,
            ClientCommand::Inspect {
                path: "user.email".to_string()
            }
        );
        send_event(
            &mut peer,
            ServerEvent::Inspection {
                path: "user.email".to_string(),
                value: "a@b.c".into(),
            },
        )
        .await;
        let alert = handle.next_alert().await.unwrap();
        assert_eq!(alert.to_string(), r#"user.email = "a@b.c""#);
        assert_eq!(handle.status(), SessionStatus::Connected);

        send_event(
            &mut peer,
            ServerEvent::ExecutionError {
                error: "boom".to_string(),
            },
        )
        .await;
        let alert = handle.next_alert().await.unwrap();
        assert_eq!(alert.to_string(), "Execution error: boom");
        assert_eq!(handle.status(), SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_server_close_disconnects() {
        let (mut handle, mut peer) = pair(vec![]).await;
        peer.close(None).await.unwrap();

        let state = handle
            .wait_for(|s| s.status == SessionStatus::Disconnected)
            .await
            .unwrap();
        assert_eq!(state.session_id.as_deref(), Some("s1"));
        handle.finished().await;
        assert!(matches!(handle.inspect("x"), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_after_completion_keeps_status() {
        let (mut handle, mut peer) = pair(vec![]).await;
        send_event(&mut peer, ServerEvent::ExecutionCompleted { session_id: "s1".to_string() }).await;
        handle.wait_for(|s| s.status == SessionStatus::Completed).await.unwrap();

        peer.close(None).await.unwrap();
        handle.finished().await;
        assert_eq!(handle.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_reset_is_a_transport_error() {
        let (mut handle, peer) = pair(vec![]).await;
        drop(peer);

        let alert = handle.next_alert().await.unwrap();
        assert!(matches!(alert, Alert::TransportError { .. }));
        assert_eq!(handle.status(), SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_stop_sends_stop_and_closes() {
        let (mut handle, mut peer) = pair(vec![]).await;
        assert!(handle.stop().is_err());

        send_event(&mut peer, paused_at("a")).await;
        handle.wait_for(|s| s.status == SessionStatus::Paused).await.unwrap();

        handle.stop().unwrap();
        assert_eq!(recv_command(&mut peer).await, ClientCommand::Stop);
        handle.finished().await;

        assert_eq!(handle.status(), SessionStatus::Stopped);
        assert!(!handle.is_open());
        assert!(matches!(handle.send(ClientCommand::Continue), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_returns_final_state() {
        let (handle, _peer) = pair(vec![]).await;
        let state = handle.close().await;
        assert_eq!(state.status, SessionStatus::Disconnected);
    }
}
