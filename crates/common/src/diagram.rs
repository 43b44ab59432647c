//! Flow diagrams
//!
//! Generation of the Mermaid flowchart for a flow definition, and the
//! projection of a session mirror onto that flowchart. Projection is a pure
//! function of (flow, session state, breakpoints): rendering the same inputs
//! twice yields the same [`DiagramView`].

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::breakpoints::BreakpointSet;
use crate::state::SessionState;
use crate::types::{FlowDefinition, FlowDetail, StepType};

const START_NODE: &str = "Start";
const END_NODE: &str = "End";

/// Mermaid `flowchart TD` source for a flow
pub fn flowchart(flow: &FlowDefinition) -> String {
    let mut lines = vec!["flowchart TD".to_string()];
    lines.push(format!("    {}([Start])", START_NODE));

    for step in &flow.steps {
        let shape = match step.step_type {
            StepType::Action => format!("{}[\"{}\"]", step.id, step.name),
            StepType::Validation => format!("{}{{{}}}", step.id, step.name),
            _ => format!("{}(\"{}\")", step.id, step.name),
        };
        lines.push(format!("    {}", shape));
    }

    lines.push(format!("    {}([End])", END_NODE));
    lines.push(format!("    {} --> {}", START_NODE, flow.start_step));

    for step in &flow.steps {
        if step.next_steps.is_empty() {
            lines.push(format!("    {} --> {}", step.id, END_NODE));
        } else {
            for next in &step.next_steps {
                lines.push(format!("    {} --> {}", step.id, next));
            }
        }
    }

    lines.join("\n")
}

/// Drop the Markdown code fence some engines wrap diagrams in
pub fn strip_fences(code: &str) -> &str {
    let code = code.trim();
    let code = code
        .strip_prefix("```mermaid")
        .map(|rest| rest.strip_prefix('\n').unwrap_or(rest))
        .unwrap_or(code);
    let code = code
        .strip_suffix("```")
        .map(|rest| rest.strip_suffix('\n').unwrap_or(rest))
        .unwrap_or(code);
    code.trim()
}

/// Highlight state of one step node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeMarks {
    pub executed: bool,
    pub failed: bool,
    pub current: bool,
    pub breakpoint: bool,
}

/// Annotations for every step node of a flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagramView {
    pub nodes: BTreeMap<String, NodeMarks>,
}

impl DiagramView {
    /// Project session state onto a flow
    pub fn project(flow: &FlowDetail, state: &SessionState, breakpoints: &BreakpointSet) -> Self {
        let mut nodes = BTreeMap::new();

        for step in &flow.steps {
            let mut marks = NodeMarks::default();

            for record in &state.history {
                let same_step = if record.step_id.is_empty() {
                    record.step_name == step.name
                } else {
                    record.step_id == step.id
                };
                if same_step {
                    marks.executed = true;
                    if !record.success {
                        marks.failed = true;
                    }
                }
            }

            marks.current = state.current_step.as_deref() == Some(step.id.as_str());
            marks.breakpoint = breakpoints.contains(&step.id);

            nodes.insert(step.id.clone(), marks);
        }

        Self { nodes }
    }

    fn select(&self, pick: impl Fn(&NodeMarks) -> bool) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter(|(_, marks)| pick(marks))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn executed(&self) -> BTreeSet<String> {
        self.select(|m| m.executed)
    }

    pub fn failed(&self) -> BTreeSet<String> {
        self.select(|m| m.failed)
    }

    pub fn current(&self) -> BTreeSet<String> {
        self.select(|m| m.current)
    }

    pub fn breakpoints(&self) -> BTreeSet<String> {
        self.select(|m| m.breakpoint)
    }

    /// Flow diagram source with highlight classes applied
    pub fn to_mermaid(&self, diagram: &str) -> String {
        let mut out = strip_fences(diagram).to_string();
        out.push_str("\n    classDef executed fill:#d4edda,stroke:#28a745");
        out.push_str("\n    classDef error fill:#f8d7da,stroke:#dc3545");
        out.push_str("\n    classDef current fill:#fff3cd,stroke:#ffc107,stroke-width:3px");
        out.push_str("\n    classDef breakpoint stroke:#dc3545,stroke-dasharray:4");

        for (class, ids) in [
            ("executed", self.executed()),
            ("error", self.failed()),
            ("current", self.current()),
            ("breakpoint", self.breakpoints()),
        ] {
            if !ids.is_empty() {
                let joined: Vec<&str> = ids.iter().map(String::as_str).collect();
                let _ = write!(out, "\n    class {} {}", joined.join(","), class);
            }
        }

        out
    }

    /// One line per step, in flow order, for terminal display
    pub fn to_text(&self, flow: &FlowDetail) -> String {
        let mut out = String::new();
        for step in &flow.steps {
            let marks = self.nodes.get(&step.id).copied().unwrap_or_default();
            let pointer = if marks.current { "▶" } else { " " };
            let bp = if marks.breakpoint { "●" } else { " " };
            let outcome = match (marks.executed, marks.failed) {
                (true, true) => "✗",
                (true, false) => "✓",
                _ => "·",
            };
            let _ = writeln!(out, "{} {} {} {} ({})", pointer, bp, outcome, step.name, step.id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Context, FlowStep, StepRecord};
    use chrono::{TimeZone, Utc};

    fn flow() -> FlowDefinition {
        FlowDefinition {
            name: "register".to_string(),
            description: String::new(),
            start_step: "validate".to_string(),
            steps: vec![
                FlowStep::new("validate", "Validate input", StepType::Validation).then("create"),
                FlowStep::new("create", "Create user", StepType::Action).then("notify"),
                FlowStep::new("notify", "Send welcome", StepType::Other),
            ],
        }
    }

    fn detail() -> FlowDetail {
        let def = flow();
        FlowDetail {
            diagram: flowchart(&def),
            name: def.name,
            description: def.description,
            steps: def.steps,
        }
    }

    fn record(id: &str, name: &str, success: bool) -> StepRecord {
        StepRecord {
            step_id: id.to_string(),
            step_name: name.to_string(),
            success,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            duration_ms: 0.0,
            inputs: Context::new(),
            outputs: Context::new(),
            error: None,
        }
    }

    fn ids(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flowchart_shapes_and_edges() {
        let chart = flowchart(&flow());
        assert!(chart.starts_with("flowchart TD"));
        assert!(chart.contains("validate{Validate input}"));
        assert!(chart.contains("create[\"Create user\"]"));
        assert!(chart.contains("notify(\"Send welcome\")"));
        assert!(chart.contains("Start --> validate"));
        assert!(chart.contains("create --> notify"));
        assert!(chart.contains("notify --> End"));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```mermaid\nflowchart TD\n```"), "flowchart TD");
        assert_eq!(strip_fences("  flowchart TD  "), "flowchart TD");
    }

    #[test]
    fn test_projection_marks() {
        let mut state = SessionState::for_session("s");
        state.history = vec![record("validate", "Validate input", true), record("create", "Create user", false)];
        state.current_step = Some("create".to_string());
        let mut bps = BreakpointSet::new();
        bps.toggle("notify");

        let view = DiagramView::project(&detail(), &state, &bps);
        assert_eq!(view.executed(), ids(&["create", "validate"]));
        assert_eq!(view.failed(), ids(&["create"]));
        assert_eq!(view.current(), ids(&["create"]));
        assert_eq!(view.breakpoints(), ids(&["notify"]));
    }

    #[test]
    fn test_record_without_id_matches_by_name() {
        let mut state = SessionState::for_session("s");
        state.history = vec![record("", "Send welcome", true)];
        let view = DiagramView::project(&detail(), &state, &BreakpointSet::new());
        assert_eq!(view.executed(), ids(&["notify"]));
    }

    #[test]
    fn test_rerender_is_idempotent() {
        let mut state = SessionState::for_session("s");
        state.history = vec![record("validate", "Validate input", true)];
        state.current_step = Some("create".to_string());
        let bps: BreakpointSet = ["create".to_string()].into_iter().collect();
        let flow = detail();

        let first = DiagramView::project(&flow, &state, &bps);
        let second = DiagramView::project(&flow, &state.clone(), &bps);
        assert_eq!(first, second);
        assert_eq!(first.to_mermaid(&flow.diagram), second.to_mermaid(&flow.diagram));
        assert_eq!(first.to_text(&flow), second.to_text(&flow));
    }

    #[test]
    fn test_mermaid_classes() {
        let mut state = SessionState::for_session("s");
        state.current_step = Some("validate".to_string());
        let flow = detail();
        let view = DiagramView::project(&flow, &state, &BreakpointSet::new());
        let annotated = view.to_mermaid(&format!("```mermaid\n{}\n```", flow.diagram));
        assert!(!annotated.contains("```"));
        assert!(annotated.contains("class validate current"));
        assert!(!annotated.contains("class  executed"));
    }

    #[test]
    fn test_text_rendering() {
        let mut state = SessionState::for_session("s");
        state.history = vec![record("validate", "Validate input", true)];
        state.current_step = Some("create".to_string());
        let flow = detail();
        let text = DiagramView::project(&flow, &state, &BreakpointSet::new()).to_text(&flow);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("✓ Validate input"));
        assert!(lines[1].starts_with("▶"));
    }
}
