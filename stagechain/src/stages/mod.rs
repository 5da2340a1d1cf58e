//! Stage declarations and runtime records.
//!
//! A stage is one independently applicable infrastructure configuration.
//! Its inputs are either scenario literals or typed bindings to outputs of
//! stages declared earlier in the same chain.

use crate::core::{LifecycleState, OutputRef, StageOutputs, VarValue};
use crate::errors::{InvalidTransition, PipelineValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// How a bound upstream output is shaped before it is passed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingShape {
    /// Pass the value unchanged.
    #[default]
    AsIs,
    /// Wrap the value into a one-element list (e.g. a CIDR into an allow-list).
    ListOf,
}

/// Wires an upstream output into a downstream input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// The downstream input variable.
    pub input: String,
    /// The upstream output.
    pub source: OutputRef,
    /// Shape conversion.
    pub shape: BindingShape,
}

impl InputBinding {
    /// Creates a binding that passes the value unchanged.
    #[must_use]
    pub fn new(input: impl Into<String>, source: OutputRef) -> Self {
        Self {
            input: input.into(),
            source,
            shape: BindingShape::AsIs,
        }
    }

    /// Creates a binding that wraps the value into a list.
    #[must_use]
    pub fn list_of(input: impl Into<String>, source: OutputRef) -> Self {
        Self {
            input: input.into(),
            source,
            shape: BindingShape::ListOf,
        }
    }

    /// Applies the shape conversion.
    #[must_use]
    pub fn shape_value(&self, value: VarValue) -> VarValue {
        match self.shape {
            BindingShape::AsIs => value,
            BindingShape::ListOf => value.into_list(),
        }
    }
}

/// Declaration of a single stage in a scenario chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Template configuration location. Never written to.
    pub source_path: PathBuf,
    /// Literal input variables.
    pub inputs: BTreeMap<String, VarValue>,
    /// Inputs fed from upstream outputs.
    pub bindings: Vec<InputBinding>,
    /// Upstream stages this stage must follow even without a binding.
    pub after: BTreeSet<String>,
    /// Outputs the stage must produce.
    pub outputs: Vec<String>,
}

impl StageSpec {
    /// Creates a new stage declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            inputs: BTreeMap::new(),
            bindings: Vec::new(),
            after: BTreeSet::new(),
            outputs: Vec::new(),
        }
    }

    /// Adds a literal input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Adds a literal input only when `value` is present.
    #[must_use]
    pub fn with_optional_input(
        self,
        name: impl Into<String>,
        value: Option<impl Into<VarValue>>,
    ) -> Self {
        match value {
            Some(value) => self.with_input(name, value),
            None => self,
        }
    }

    /// Adds a binding.
    #[must_use]
    pub fn with_binding(mut self, binding: InputBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Adds an ordering-only dependency.
    #[must_use]
    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.after.insert(stage.into());
        self
    }

    /// Declares outputs the stage must produce.
    #[must_use]
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    /// Returns every upstream stage, from bindings and explicit ordering.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.after
            .iter()
            .map(String::as_str)
            .chain(self.bindings.iter().map(|b| b.source.stage.as_str()))
            .collect()
    }

    /// Returns true if the stage declares the output.
    #[must_use]
    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    /// Validates the stage declaration on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage depends on itself or an input is both
    /// a literal and a binding.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.dependencies().contains(self.name.as_str()) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }

        let mut bound = BTreeSet::new();
        for binding in &self.bindings {
            if self.inputs.contains_key(&binding.input) || !bound.insert(binding.input.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' supplies input '{}' more than once",
                    self.name, binding.input
                ))
                .with_stages(vec![self.name.clone()])
                .with_error_info(
                    crate::errors::ContractErrorInfo::new(
                        "CHAIN-INPUT-CONFLICT",
                        format!("Input '{}' is supplied twice", binding.input),
                    )
                    .with_fix_hint(
                        crate::errors::ContractSuggestions::get("CHAIN-INPUT-CONFLICT")
                            .unwrap_or_default(),
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// Runtime state of one stage in one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Isolated working copy, once materialized.
    pub working_copy: Option<PathBuf>,
    /// Resolved inputs, once assembled.
    pub inputs: BTreeMap<String, VarValue>,
    /// Captured outputs, once applied.
    pub outputs: StageOutputs,
    /// Lifecycle state.
    pub state: LifecycleState,
}

impl StageRecord {
    /// Creates a record in the uninitialized state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            working_copy: None,
            inputs: BTreeMap::new(),
            outputs: StageOutputs::new(),
            state: LifecycleState::Uninitialized,
        }
    }

    /// Returns the working copy, if materialized.
    #[must_use]
    pub fn working_copy(&self) -> Option<&Path> {
        self.working_copy.as_deref()
    }

    /// Moves the record to `next`.
    ///
    /// # Errors
    ///
    /// Returns an error for transitions the lifecycle does not permit.
    pub fn transition(&mut self, next: LifecycleState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                stage: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
