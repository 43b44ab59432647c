//! Flow registry

use flowdbg_common::{
    flowchart, Context, Error, FlowDefinition, FlowDetail, FlowStep, FlowSummary, Result,
    StepType,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Registered flows, keyed by name
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Arc<FlowDefinition>>,
}

#[derive(Deserialize)]
struct FlowFile {
    #[serde(default)]
    flows: Vec<FlowDefinition>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the demo flows
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for flow in demo_flows() {
            // Demo flows are well formed
            if let Err(e) = registry.register(flow) {
                tracing::error!("Invalid demo flow: {}", e);
            }
        }
        registry
    }

    /// Load flows from a TOML file with `[[flows]]` tables
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: FlowFile = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;

        let mut registry = Self::new();
        for flow in file.flows {
            registry.register(flow)?;
        }
        info!("Loaded {} flows from {}", registry.flows.len(), path.display());
        Ok(registry)
    }

    /// Register a flow for debugging
    pub fn register(&mut self, flow: FlowDefinition) -> Result<()> {
        if flow.name.trim().is_empty() {
            return Err(Error::InvalidConfig("flow name must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &flow.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "flow {} has duplicate step id {}",
                    flow.name, step.id
                )));
            }
        }
        debug!("Registered flow {} ({} steps)", flow.name, flow.steps.len());
        self.flows.insert(flow.name.clone(), Arc::new(flow));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.flows.keys().cloned().collect()
    }

    /// Summaries sorted by flow name
    pub fn list_flows(&self) -> Vec<FlowSummary> {
        self.flows.values().map(|f| f.summary()).collect()
    }

    pub fn flow_detail(&self, name: &str) -> Result<FlowDetail> {
        let flow = self.get(name).ok_or_else(|| Error::not_found("flow", name))?;
        Ok(FlowDetail {
            name: flow.name.clone(),
            description: flow.description.clone(),
            steps: flow.steps.clone(),
            diagram: flowchart(&flow),
        })
    }
}

fn outputs(pairs: &[(&str, serde_json::Value)]) -> Context {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn demo_flows() -> Vec<FlowDefinition> {
    let mut validate = FlowStep::new("validate_input", "Validate input", StepType::Validation)
        .then("check_duplicate");
    validate.outputs = outputs(&[("validated", true.into())]);

    let mut duplicate = FlowStep::new("check_duplicate", "Check duplicate email", StepType::Validation)
        .then("create_user");
    duplicate.outputs = outputs(&[("email_available", true.into())]);

    let mut create = FlowStep::new("create_user", "Create user", StepType::Action)
        .then("send_welcome");
    create.outputs = outputs(&[("user_id", 1001.into()), ("action_completed", true.into())]);

    let mut welcome = FlowStep::new("send_welcome", "Send welcome email", StepType::Action);
    welcome.outputs = outputs(&[("email_sent", true.into())]);

    let registration = FlowDefinition {
        name: "user_registration".to_string(),
        description: "Register a new user account".to_string(),
        start_step: "validate_input".to_string(),
        steps: vec![validate, duplicate, create, welcome],
    };

    let mut lookup = FlowStep::new("lookup_user", "Look up user", StepType::Action)
        .then("issue_token");
    lookup.outputs = outputs(&[("user_found", true.into())]);

    let mut token = FlowStep::new("issue_token", "Issue reset token", StepType::Action)
        .then("deliver_token");
    token.outputs = outputs(&[("token_issued", true.into())]);

    let mut deliver = FlowStep::new("deliver_token", "Deliver token", StepType::Other);
    deliver.fails_with = Some("mail relay unavailable".to_string());

    let reset = FlowDefinition {
        name: "password_reset".to_string(),
        description: "Send a password reset token; delivery always fails".to_string(),
        start_step: "lookup_user".to_string(),
        steps: vec![lookup, token, deliver],
    };

    vec![registration, reset]
}
