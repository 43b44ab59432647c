//! Step executor
//!
//! Walks a flow from its start step along the first successor of each step,
//! pausing before breakpointed steps until the socket handler signals.

use crate::state::{SharedSnapshot, Signal};
use chrono::Utc;
use flowdbg_common::{
    Error, FlowDefinition, FlowStep, Result, ServerEvent, SessionStatus, StepEventData,
    StepRecord,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// How a run ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Executes one run of a flow for a session
pub struct FlowExecutor {
    flow: Arc<FlowDefinition>,
    session: SharedSnapshot,
    control: mpsc::UnboundedReceiver<Signal>,
    events: mpsc::UnboundedSender<ServerEvent>,
    step_delay: Duration,
    step_mode: bool,
}

impl FlowExecutor {
    pub fn new(
        flow: Arc<FlowDefinition>,
        session: SharedSnapshot,
        control: mpsc::UnboundedReceiver<Signal>,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            flow,
            session,
            control,
            events,
            step_delay: Duration::ZERO,
            step_mode: false,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Run the flow to completion, stop or failure
    pub async fn execute(mut self) -> Result<RunOutcome> {
        self.set_status(SessionStatus::Running);
        let mut current = Some(self.flow.start_step.clone());

        while let Some(step_id) = current {
            if self.stop_requested() {
                return Ok(self.stopped());
            }

            let step = match self.flow.step(&step_id) {
                Some(step) => step.clone(),
                None => {
                    self.set_status(SessionStatus::Error);
                    return Err(Error::Execution(format!("Step {} not found", step_id)));
                }
            };

            if self.should_pause(&step.id) && !self.wait_for_resume(&step.id).await {
                return Ok(self.stopped());
            }

            self.session.lock().current_step = Some(step.id.clone());
            self.emit_step(&step, None, true);

            let started = Instant::now();
            if self.step_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.step_delay).await;
            }
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            if let Some(reason) = &step.fails_with {
                self.record(&step, false, duration_ms, Some(reason.clone()));
                self.emit_step(&step, Some(false), false);
                self.set_status(SessionStatus::Error);
                return Err(Error::Execution(reason.clone()));
            }

            self.record(&step, true, duration_ms, None);
            self.emit_step(&step, Some(true), false);

            current = step.next_steps.first().cloned();
        }

        self.set_status(SessionStatus::Completed);
        info!("Flow {} completed", self.flow.name);
        Ok(RunOutcome::Completed)
    }

    fn should_pause(&self, step_id: &str) -> bool {
        self.step_mode || self.session.lock().breakpoints.iter().any(|b| b == step_id)
    }

    /// Park until resumed. Returns false when stopped instead.
    async fn wait_for_resume(&mut self, step_id: &str) -> bool {
        debug!("Pausing before {}", step_id);
        {
            let mut snapshot = self.session.lock();
            snapshot.status = Some(SessionStatus::Paused);
            snapshot.current_step = Some(step_id.to_string());
            self.emit(ServerEvent::StateUpdate {
                session: Some(snapshot.clone()),
            });
        }

        loop {
            match self.control.recv().await {
                Some(Signal::Resume) => {
                    self.step_mode = false;
                    break;
                }
                Some(Signal::Step) => {
                    self.step_mode = true;
                    break;
                }
                Some(Signal::Stop) | None => return false,
            }
        }
        self.set_status(SessionStatus::Running);
        true
    }

    /// Drain pending signals; only a stop or a detached controller matters
    /// while running
    fn stop_requested(&mut self) -> bool {
        let mut stop = false;
        loop {
            match self.control.try_recv() {
                Ok(Signal::Stop) => stop = true,
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    stop = true;
                    break;
                }
            }
        }
        stop
    }

    fn stopped(&self) -> RunOutcome {
        info!("Flow {} stopped", self.flow.name);
        self.set_status(SessionStatus::Stopped);
        RunOutcome::Stopped
    }

    fn record(&self, step: &FlowStep, success: bool, duration_ms: f64, error: Option<String>) {
        let mut snapshot = self.session.lock();
        let inputs = snapshot.context.clone().unwrap_or_default();
        let outputs = if success { step.outputs.clone() } else { Default::default() };
        if success {
            let context = snapshot.context.get_or_insert_with(Default::default);
            for (k, v) in &outputs {
                context.insert(k.clone(), v.clone());
            }
        }
        snapshot.history.get_or_insert_with(Vec::new).push(StepRecord {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            success,
            timestamp: Some(Utc::now()),
            duration_ms,
            inputs,
            outputs,
            error,
        });
    }

    fn emit_step(&self, step: &FlowStep, success: Option<bool>, started: bool) {
        let data = Some(StepEventData {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            success,
        });
        // Send under the lock so snapshots leave in the order they were taken
        let snapshot = self.session.lock();
        let session = Some(snapshot.clone());
        let event = if started {
            ServerEvent::StepStarted { data, session }
        } else {
            ServerEvent::StepCompleted { data, session }
        };
        self.emit(event);
    }

    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            warn!("Event receiver for flow {} is gone", self.flow.name);
        }
    }

    fn set_status(&self, status: SessionStatus) {
        self.session.lock().status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdbg_common::{Context, SessionSnapshot, StepType};
    use parking_lot::Mutex;

    fn flow(fail_last: bool) -> Arc<FlowDefinition> {
        let mut last = FlowStep::new("c", "C", StepType::Action);
        if fail_last {
            last.fails_with = Some("boom".to_string());
        }
        let mut first = FlowStep::new("a", "A", StepType::Validation).then("b");
        first.outputs.insert("validated".to_string(), true.into());
        Arc::new(FlowDefinition {
            name: "t".to_string(),
            description: String::new(),
            start_step: "a".to_string(),
            steps: vec![first, FlowStep::new("b", "B", StepType::Action).then("c"), last],
        })
    }

    fn session(breakpoints: &[&str]) -> SharedSnapshot {
        Arc::new(Mutex::new(SessionSnapshot {
            id: "s".to_string(),
            context: Some(Context::new()),
            history: Some(Vec::new()),
            breakpoints: breakpoints.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }))
    }

    fn kinds(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.kind());
        }
        out
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let snap = session(&[]);
        let (_ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();

        let outcome = FlowExecutor::new(flow(false), snap.clone(), ctl_rx, ev_tx)
            .execute()
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        let s = snap.lock();
        assert_eq!(s.status, Some(SessionStatus::Completed));
        assert_eq!(s.history.as_ref().unwrap().len(), 3);
        assert_eq!(s.context.as_ref().unwrap()["validated"], true);
        drop(s);
        assert_eq!(
            kinds(&mut ev_rx),
            vec![
                "step_started", "step_completed",
                "step_started", "step_completed",
                "step_started", "step_completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_step() {
        let snap = session(&[]);
        let (_ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();

        let err = FlowExecutor::new(flow(true), snap.clone(), ctl_rx, ev_tx)
            .execute()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("boom"));
        let s = snap.lock();
        assert_eq!(s.status, Some(SessionStatus::Error));
        let last = s.history.as_ref().unwrap().last().unwrap().clone();
        assert!(!last.success);
        assert_eq!(last.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_missing_step() {
        let mut def = (*flow(false)).clone();
        def.steps[1].next_steps = vec!["ghost".to_string()];
        let (_ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();

        let err = FlowExecutor::new(Arc::new(def), session(&[]), ctl_rx, ev_tx)
            .execute()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Step ghost not found"));
    }

    #[tokio::test]
    async fn test_breakpoint_then_step_then_resume() {
        let snap = session(&["b"]);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(FlowExecutor::new(flow(false), snap.clone(), ctl_rx, ev_tx).execute());

        // a runs, then pause before b
        let mut seen = Vec::new();
        while let Some(event) = ev_rx.recv().await {
            let kind = event.kind();
            seen.push(kind);
            if kind == "state_update" {
                break;
            }
        }
        assert_eq!(seen, vec!["step_started", "step_completed", "state_update"]);
        assert_eq!(snap.lock().status, Some(SessionStatus::Paused));
        assert_eq!(snap.lock().current_step.as_deref(), Some("b"));

        // step: b runs, pause again before c
        ctl_tx.send(Signal::Step).unwrap();
        let mut seen = Vec::new();
        while let Some(event) = ev_rx.recv().await {
            let kind = event.kind();
            seen.push(kind);
            if kind == "state_update" {
                break;
            }
        }
        assert_eq!(seen, vec!["step_started", "step_completed", "state_update"]);
        assert_eq!(snap.lock().current_step.as_deref(), Some("c"));

        ctl_tx.send(Signal::Resume).unwrap();
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Completed);
        assert_eq!(snap.lock().history.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let snap = session(&["a"]);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(FlowExecutor::new(flow(false), snap.clone(), ctl_rx, ev_tx).execute());

        assert_eq!(ev_rx.recv().await.unwrap().kind(), "state_update");
        ctl_tx.send(Signal::Stop).unwrap();

        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Stopped);
        assert_eq!(snap.lock().status, Some(SessionStatus::Stopped));
        assert!(snap.lock().history.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detached_controller_stops_paused_run() {
        let snap = session(&["b"]);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();
        drop(ctl_tx);

        let outcome = FlowExecutor::new(flow(false), snap.clone(), ctl_rx, ev_tx)
            .execute()
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert!(snap.lock().history.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_cyclic_flow_without_delay() {
        let def = FlowDefinition {
            name: "loop".to_string(),
            description: String::new(),
            start_step: "a".to_string(),
            steps: vec![
                FlowStep::new("a", "A", StepType::Decision).then("b"),
                FlowStep::new("b", "B", StepType::Action).then("a"),
            ],
        };
        let snap = session(&[]);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(FlowExecutor::new(Arc::new(def), snap.clone(), ctl_rx, ev_tx).execute());

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctl_tx.send(Signal::Stop).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(3), run)
            .await
            .expect("cyclic run ignored stop")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(snap.lock().status, Some(SessionStatus::Stopped));
        assert!(!snap.lock().history.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_records_inputs() {
        let snap = session(&[]);
        snap.lock()
            .context
            .get_or_insert_with(Default::default)
            .insert("email".to_string(), "a@b.c".into());
        let (_ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();

        FlowExecutor::new(flow(false), snap.clone(), ctl_rx, ev_tx)
            .execute()
            .await
            .unwrap();

        let s = snap.lock();
        let history = s.history.as_ref().unwrap();
        assert_eq!(history[0].inputs["email"], "a@b.c");
        assert!(!history[0].inputs.contains_key("validated"));
        assert_eq!(history[1].inputs["validated"], true);
        assert!(history.iter().all(|r| r.timestamp.is_some()));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let snap = session(&[]);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();
        ctl_tx.send(Signal::Stop).unwrap();

        let outcome = FlowExecutor::new(flow(false), snap.clone(), ctl_rx, ev_tx)
            .execute()
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
    }
}
