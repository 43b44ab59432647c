//! Flow Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::client::EngineClient;
use crate::output::{print_item, print_list, OutputFormat, TableDisplay};
use flowdbg_common::{diagram::strip_fences, FlowStep, FlowSummary};

#[derive(Subcommand)]
pub enum FlowCommands {
    /// List flows known to the engine
    List,

    /// Show the steps of a flow
    Show {
        /// Flow name
        name: String,

        /// Print the Mermaid diagram instead of the step table
        #[arg(long)]
        mermaid: bool,
    },
}

/// Flow summary display wrapper
#[derive(Serialize)]
pub struct FlowDisplay {
    pub name: String,
    pub description: String,
    pub steps: usize,
    pub start_step: String,
}

impl From<FlowSummary> for FlowDisplay {
    fn from(flow: FlowSummary) -> Self {
        Self {
            name: flow.name,
            description: flow.description,
            steps: flow.steps,
            start_step: flow.start_step,
        }
    }
}

impl TableDisplay for FlowDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "STEPS", "START", "DESCRIPTION"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.steps.to_string(),
            self.start_step.clone(),
            self.description.clone(),
        ]
    }
}

/// Step display wrapper
#[derive(Serialize)]
pub struct StepDisplay {
    pub id: String,
    pub name: String,
    pub step_type: String,
    pub next: Vec<String>,
}

impl From<&FlowStep> for StepDisplay {
    fn from(step: &FlowStep) -> Self {
        let step_type = serde_json::to_value(step.step_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            id: step.id.clone(),
            name: step.name.clone(),
            step_type,
            next: step.next_steps.clone(),
        }
    }
}

impl TableDisplay for StepDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "NAME", "TYPE", "NEXT"]
    }

    fn row(&self) -> Vec<String> {
        let next = if self.next.is_empty() {
            "-".to_string()
        } else {
            self.next.join(", ")
        };
        vec![self.id.clone(), self.name.clone(), self.step_type.clone(), next]
    }
}

pub async fn execute(cmd: FlowCommands, client: EngineClient, format: OutputFormat) -> Result<()> {
    match cmd {
        FlowCommands::List => {
            let flows: Vec<FlowDisplay> = client
                .list_flows()
                .await?
                .into_iter()
                .map(FlowDisplay::from)
                .collect();
            print_list(&flows, format);
        }

        FlowCommands::Show { name, mermaid } => {
            let detail = client.flow_detail(&name).await?;
            if mermaid {
                println!("{}", strip_fences(&detail.diagram));
                return Ok(());
            }

            if let Some(summary) = client
                .list_flows()
                .await?
                .into_iter()
                .find(|f| f.name == detail.name)
            {
                print_item(&FlowDisplay::from(summary), format);
            }

            let steps: Vec<StepDisplay> = detail.steps.iter().map(StepDisplay::from).collect();
            print_list(&steps, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdbg_common::StepType;

    #[test]
    fn test_step_row() {
        let step = FlowStep::new("check", "Check", StepType::Validation).then("save");
        let display = StepDisplay::from(&step);
        assert_eq!(display.row(), vec!["check", "Check", "validation", "save"]);

        let leaf = StepDisplay::from(&FlowStep::new("save", "Save", StepType::Action));
        assert_eq!(leaf.row()[3], "-");
    }
}
