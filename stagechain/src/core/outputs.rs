//! Captured stage outputs.

use super::VarValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outputs captured from one applied stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOutputs {
    values: BTreeMap<String, VarValue>,
}

impl StageOutputs {
    /// Creates an empty output set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an output value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Adds an output value, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Gets an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.values.get(name)
    }

    /// Returns true if the output exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns output names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, VarValue)> for StageOutputs {
    fn from_iter<T: IntoIterator<Item = (String, VarValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// A reference to a named output of a named stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// The producing stage.
    pub stage: String,
    /// The output name.
    pub output: String,
}

impl OutputRef {
    /// Creates a new output reference.
    #[must_use]
    pub fn new(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.output)
    }
}

/// Outputs of every applied stage of a scenario, in apply order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutputs {
    order: Vec<String>,
    by_stage: BTreeMap<String, StageOutputs>,
}

impl ScenarioOutputs {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outputs of a newly applied stage.
    pub fn record(&mut self, stage: impl Into<String>, outputs: StageOutputs) {
        let stage = stage.into();
        if !self.by_stage.contains_key(&stage) {
            self.order.push(stage.clone());
        }
        self.by_stage.insert(stage, outputs);
    }

    /// Returns the outputs of a stage.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageOutputs> {
        self.by_stage.get(stage)
    }

    /// Resolves an output reference.
    #[must_use]
    pub fn resolve(&self, reference: &OutputRef) -> Option<&VarValue> {
        self.stage(&reference.stage)
            .and_then(|outputs| outputs.get(&reference.output))
    }

    /// Returns the applied stage names in order.
    #[must_use]
    pub fn applied_stages(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_outputs() {
        let outputs = StageOutputs::new()
            .with("local_cidr", "198.51.100.4/32")
            .with("bastion_ssh_public_key", "ssh-ed25519 AAAA");

        assert_eq!(outputs.len(), 2);
        assert!(outputs.contains("local_cidr"));
        assert_eq!(
            outputs.names().collect::<Vec<_>>(),
            vec!["bastion_ssh_public_key", "local_cidr"]
        );
    }

    #[test]
    fn test_scenario_outputs_resolve_in_apply_order() {
        let mut outputs = ScenarioOutputs::new();
        outputs.record("prerequisites", StageOutputs::new().with("local_cidr", "x"));
        outputs.record("cluster", StageOutputs::new().with("bastion_public_ip", "203.0.113.9"));

        let ip = outputs.resolve(&OutputRef::new("cluster", "bastion_public_ip"));
        assert_eq!(ip.and_then(VarValue::as_str), Some("203.0.113.9"));
        assert!(outputs.resolve(&OutputRef::new("cluster", "missing")).is_none());

        assert_eq!(outputs.applied_stages(), &["prerequisites", "cluster"]);
    }

    #[test]
    fn test_output_ref_display() {
        assert_eq!(
            OutputRef::new("configuration", "kubeconfig").to_string(),
            "configuration.kubeconfig"
        );
    }
}
