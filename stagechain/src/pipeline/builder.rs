//! Scenario chain builder with validation.

use super::StageChain;
use crate::errors::{ContractErrorInfo, ContractSuggestions, PipelineValidationError};
use crate::stages::StageSpec;

/// Builder for creating validated stage chains.
///
/// Stages are applied in declaration order, so every dependency must name a
/// stage declared earlier. This keeps the chain acyclic by construction.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    /// The scenario name.
    name: String,
    /// The stage declarations, in order.
    stages: Vec<StageSpec>,
}

impl ChainBuilder {
    /// Creates a new chain builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage to the chain.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (duplicate, missing dependency,
    /// undeclared upstream output, conflicting inputs).
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.find(&spec.name).is_some() {
            return Err(contract_error(
                "CHAIN-DUPLICATE",
                format!("Stage '{}' is declared twice", spec.name),
                vec![spec.name.clone()],
            ));
        }

        for dep in spec.dependencies() {
            if self.find(dep).is_none() {
                return Err(contract_error(
                    "CHAIN-MISSING-DEP",
                    format!("Stage '{}' depends on unknown stage '{}'", spec.name, dep),
                    vec![spec.name.clone(), dep.to_string()],
                ));
            }
        }

        for binding in &spec.bindings {
            let declared = self
                .find(&binding.source.stage)
                .is_some_and(|upstream| upstream.declares_output(&binding.source.output));
            if !declared {
                return Err(contract_error_with(
                    "CHAIN-UNDECLARED-OUTPUT",
                    format!(
                        "Stage '{}' binds input '{}' to undeclared output '{}'",
                        spec.name, binding.input, binding.source
                    ),
                    vec![spec.name.clone(), binding.source.stage.clone()],
                    [("input", binding.input.clone()), ("output", binding.source.to_string())],
                ));
            }
        }

        self.stages.push(spec);
        Ok(())
    }

    /// Builds the chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<StageChain, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(contract_error(
                "CHAIN-EMPTY",
                format!("Scenario '{}' has no stages", self.name),
                Vec::new(),
            ));
        }

        Ok(StageChain::new(self.name, self.stages))
    }

    /// Returns the scenario name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn find(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }
}

pub(crate) fn contract_error(
    code: &str,
    message: String,
    stages: Vec<String>,
) -> PipelineValidationError {
    contract_error_with(code, message, stages, [])
}

pub(crate) fn contract_error_with<const N: usize>(
    code: &str,
    message: String,
    stages: Vec<String>,
    context: [(&str, String); N],
) -> PipelineValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone());
    if let Some(hint) = ContractSuggestions::get(code) {
        info = info.with_fix_hint(hint);
    }
    for (key, value) in context {
        info = info.with_context_entry(key, value);
    }
    PipelineValidationError::new(message)
        .with_stages(stages)
        .with_error_info(info)
}
