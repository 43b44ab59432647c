//! Breakpoint set

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::protocol::ClientCommand;

/// Step ids flagged for pause-on-reach
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointSet {
    steps: BTreeSet<String>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.contains(step_id)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(String::as_str)
    }

    /// Flip a step's breakpoint and return the command that mirrors the
    /// change on the engine
    pub fn toggle(&mut self, step_id: &str) -> ClientCommand {
        if self.steps.remove(step_id) {
            ClientCommand::RemoveBreakpoint {
                step_id: step_id.to_string(),
            }
        } else {
            self.steps.insert(step_id.to_string());
            ClientCommand::AddBreakpoint {
                step_id: step_id.to_string(),
            }
        }
    }

    /// Commands that replay the whole set onto a fresh session
    pub fn replay(&self) -> Vec<ClientCommand> {
        self.steps
            .iter()
            .map(|id| ClientCommand::AddBreakpoint { step_id: id.clone() })
            .collect()
    }
}

impl FromIterator<String> for BreakpointSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_toggle_returns_to_empty() {
        let mut set = BreakpointSet::new();
        let add = set.toggle("validate");
        assert_eq!(add, ClientCommand::AddBreakpoint { step_id: "validate".into() });
        assert!(set.contains("validate"));

        let remove = set.toggle("validate");
        assert_eq!(remove, ClientCommand::RemoveBreakpoint { step_id: "validate".into() });
        assert!(set.is_empty());
    }

    #[test]
    fn test_toggle_is_per_step() {
        let mut set = BreakpointSet::new();
        set.toggle("a");
        set.toggle("b");
        set.toggle("a");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_replay_is_ordered() {
        let set: BreakpointSet = ["z".to_string(), "a".to_string()].into_iter().collect();
        let ids: Vec<String> = set
            .replay()
            .into_iter()
            .map(|c| match c {
                ClientCommand::AddBreakpoint { step_id } => step_id,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec!["a", "z"]);
    }
}
