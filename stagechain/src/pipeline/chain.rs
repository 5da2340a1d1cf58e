//! Validated, statically ordered stage chain.

use super::builder::contract_error;
use crate::core::{OutputRef, ScenarioOutputs, VarValue};
use crate::errors::{PipelineValidationError, ScenarioError};
use crate::stages::StageSpec;
use std::collections::BTreeMap;

/// An ordered chain of stages for one scenario.
///
/// Built only through [`super::ChainBuilder`], so every dependency and
/// binding refers to an earlier stage and a declared output.
#[derive(Debug, Clone, PartialEq)]
pub struct StageChain {
    name: String,
    stages: Vec<StageSpec>,
}

impl StageChain {
    pub(super) fn new(name: String, stages: Vec<StageSpec>) -> Self {
        Self { name, stages }
    }

    /// Returns the scenario name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in apply order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns the stage names in apply order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Checks that a reference names a declared output of a stage in the chain.
    ///
    /// # Errors
    ///
    /// Returns a `CHAIN-UNDECLARED-OUTPUT` error otherwise.
    pub fn check_reference(&self, reference: &OutputRef) -> Result<(), PipelineValidationError> {
        let declared = self
            .stage(&reference.stage)
            .is_some_and(|s| s.declares_output(&reference.output));
        if declared {
            Ok(())
        } else {
            Err(contract_error(
                "CHAIN-UNDECLARED-OUTPUT",
                format!("Reference to undeclared output '{reference}'"),
                vec![reference.stage.clone()],
            ))
        }
    }

    /// Merges a stage's literals with outputs captured from upstream stages.
    ///
    /// # Errors
    ///
    /// Returns `OutputMissing` if a bound upstream output was not captured.
    pub fn resolve_inputs(
        spec: &StageSpec,
        captured: &ScenarioOutputs,
    ) -> Result<BTreeMap<String, VarValue>, ScenarioError> {
        let mut inputs = spec.inputs.clone();
        for binding in &spec.bindings {
            let value = captured.resolve(&binding.source).ok_or_else(|| {
                ScenarioError::output_missing(&binding.source.stage, &binding.source.output)
            })?;
            inputs.insert(binding.input.clone(), binding.shape_value(value.clone()));
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutputs;
    use crate::pipeline::ChainBuilder;
    use crate::stages::InputBinding;
    use pretty_assertions::assert_eq;

    fn chain() -> StageChain {
        ChainBuilder::new("complete")
            .stage(
                StageSpec::new("prerequisites", "/t/p")
                    .with_outputs(["local_cidr", "bastion_ssh_public_key"]),
            )
            .unwrap()
            .stage(
                StageSpec::new("cluster", "/t/c")
                    .with_input("region", "europe-west1")
                    .with_binding(InputBinding::list_of(
                        "kubernetes_api_authorized_networks",
                        OutputRef::new("prerequisites", "local_cidr"),
                    ))
                    .with_binding(InputBinding::new(
                        "bastion_ssh_public_key",
                        OutputRef::new("prerequisites", "bastion_ssh_public_key"),
                    )),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_inputs_merges_literals_and_bindings() {
        let chain = chain();
        let mut captured = ScenarioOutputs::new();
        captured.record(
            "prerequisites",
            StageOutputs::new()
                .with("local_cidr", "198.51.100.4/32")
                .with("bastion_ssh_public_key", "ssh-ed25519 AAAA"),
        );

        let cluster = chain.stage("cluster").unwrap();
        let inputs = StageChain::resolve_inputs(cluster, &captured).unwrap();

        assert_eq!(inputs.get("region"), Some(&VarValue::from("europe-west1")));
        assert_eq!(
            inputs.get("kubernetes_api_authorized_networks"),
            Some(&VarValue::from(vec!["198.51.100.4/32".to_string()]))
        );
        assert_eq!(
            inputs.get("bastion_ssh_public_key"),
            Some(&VarValue::from("ssh-ed25519 AAAA"))
        );
    }

    #[test]
    fn test_resolve_inputs_missing_upstream_output() {
        let chain = chain();
        let mut captured = ScenarioOutputs::new();
        captured.record("prerequisites", StageOutputs::new().with("local_cidr", "x"));

        let cluster = chain.stage("cluster").unwrap();
        let err = StageChain::resolve_inputs(cluster, &captured).unwrap_err();
        assert_eq!(
            err,
            ScenarioError::output_missing("prerequisites", "bastion_ssh_public_key")
        );
    }

    #[test]
    fn test_check_reference() {
        let chain = chain();
        assert!(chain.check_reference(&OutputRef::new("prerequisites", "local_cidr")).is_ok());

        let err = chain
            .check_reference(&OutputRef::new("cluster", "kubeconfig"))
            .unwrap_err();
        assert_eq!(err.code(), Some("CHAIN-UNDECLARED-OUTPUT"));
    }

    #[test]
    fn test_chain_accessors() {
        let chain = chain();
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());
        assert!(chain.stage("missing").is_none());
    }
}
