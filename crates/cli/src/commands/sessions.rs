//! Session Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::client::EngineClient;
use crate::output::{print_item, print_list, OutputFormat, TableDisplay};
use flowdbg_common::{SessionSnapshot, StepRecord};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Get a session snapshot from the engine
    Get {
        /// Session ID
        id: String,

        /// Also print the step history
        #[arg(long)]
        history: bool,
    },
}

/// Session display wrapper
#[derive(Serialize)]
pub struct SessionDisplay {
    pub id: String,
    pub flow: String,
    pub status: String,
    pub current_step: String,
    pub steps_run: usize,
    pub breakpoints: Vec<String>,
    pub created_at: String,
}

impl From<&SessionSnapshot> for SessionDisplay {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            flow: snapshot.flow_name.clone(),
            status: snapshot
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            current_step: snapshot.current_step.clone().unwrap_or_default(),
            steps_run: snapshot.history.as_ref().map_or(0, Vec::len),
            breakpoints: snapshot.breakpoints.clone(),
            created_at: snapshot
                .created_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

impl TableDisplay for SessionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "FLOW", "STATUS", "CURRENT", "STEPS", "BREAKPOINTS", "CREATED"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.flow.clone(),
            self.status.clone(),
            self.current_step.clone(),
            self.steps_run.to_string(),
            self.breakpoints.join(", "),
            self.created_at.clone(),
        ]
    }
}

/// History record display wrapper
#[derive(Serialize)]
pub struct RecordDisplay {
    pub step_id: String,
    pub step_name: String,
    pub success: bool,
    pub duration_ms: f64,
    pub error: Option<String>,
}

impl From<&StepRecord> for RecordDisplay {
    fn from(record: &StepRecord) -> Self {
        Self {
            step_id: record.step_id.clone(),
            step_name: record.step_name.clone(),
            success: record.success,
            duration_ms: record.duration_ms,
            error: record.error.clone(),
        }
    }
}

impl TableDisplay for RecordDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["STEP", "NAME", "OK", "MS", "ERROR"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.step_id.clone(),
            self.step_name.clone(),
            if self.success { "yes" } else { "no" }.to_string(),
            format!("{:.1}", self.duration_ms),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

pub async fn execute(
    cmd: SessionCommands,
    client: EngineClient,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        SessionCommands::Get { id, history } => {
            let snapshot = client.get_session(&id).await?;
            print_item(&SessionDisplay::from(&snapshot), format);

            if history {
                let records: Vec<RecordDisplay> = snapshot
                    .history
                    .iter()
                    .flatten()
                    .map(RecordDisplay::from)
                    .collect();
                print_list(&records, format);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_snapshot_display() {
        let snapshot = SessionSnapshot {
            id: "s1".to_string(),
            ..Default::default()
        };
        let display = SessionDisplay::from(&snapshot);
        assert_eq!(display.status, "unknown");
        assert_eq!(display.steps_run, 0);
        assert_eq!(display.row().len(), SessionDisplay::headers().len());
    }
}
