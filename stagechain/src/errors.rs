//! Error types for the stagechain orchestrator.
//!
//! The taxonomy follows the lifecycle of a scenario: static chain validation
//! happens before any I/O, stage failures stop forward progress, teardown and
//! validation failures are collected and reported without masking the
//! primary failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::LifecycleState;

/// The main error type for stagechain operations.
#[derive(Debug, Error)]
pub enum StagechainError {
    /// A scenario chain failed static validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A generated resource name violates the naming rules.
    #[error("{0}")]
    Naming(#[from] NamingError),

    /// A scenario stopped before completing its chain.
    #[error("{0}")]
    Scenario(#[from] ScenarioError),

    /// An external tool failed.
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    /// A stage lifecycle transition was rejected.
    #[error("{0}")]
    Transition(#[from] InvalidTransition),

    /// The requested scenario or stage is unknown.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CHAIN-MISSING-DEP").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a scenario chain fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a derived resource name breaks cloud naming limits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    /// The name is longer than the provider allows.
    #[error("Resource name '{name}' is {len} characters, limit is {max}")]
    TooLong {
        /// The offending name.
        name: String,
        /// Its length.
        len: usize,
        /// The configured limit.
        max: usize,
    },

    /// The suffix contains characters cloud names do not accept.
    #[error("Suffix '{suffix}' must be non-empty lowercase alphanumeric")]
    InvalidSuffix {
        /// The offending suffix.
        suffix: String,
    },
}

/// Error that stops a scenario's forward progress.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioError {
    /// A stage could not be materialized or applied.
    #[error("Stage '{stage}' failed to apply: {reason}")]
    ApplyFailure {
        /// The failing stage.
        stage: String,
        /// What went wrong.
        reason: String,
    },

    /// A stage applied but did not produce a declared output.
    #[error("Stage '{stage}' did not produce declared output '{output}'")]
    OutputMissing {
        /// The stage that should have produced the output.
        stage: String,
        /// The missing output name.
        output: String,
    },

    /// Forward progress stopped on request.
    #[error("Scenario cancelled before stage '{stage}': {reason}")]
    Cancelled {
        /// The stage that was not started.
        stage: String,
        /// The cancellation reason.
        reason: String,
    },

    /// The scenario body panicked or its task died.
    #[error("Scenario aborted: {reason}")]
    Aborted {
        /// Panic or join error text.
        reason: String,
    },

    /// The scenario could not be assembled, so nothing was applied.
    #[error("Scenario rejected: {reason}")]
    Rejected {
        /// The naming or chain validation error.
        reason: String,
    },
}

impl ScenarioError {
    /// Creates an apply failure.
    #[must_use]
    pub fn apply_failure(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ApplyFailure {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates an output missing error.
    #[must_use]
    pub fn output_missing(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Self::OutputMissing {
            stage: stage.into(),
            output: output.into(),
        }
    }

    /// Returns true for errors in the apply-failure class.
    ///
    /// A missing output is a broken dependency contract and counts as one.
    #[must_use]
    pub fn is_apply_failure(&self) -> bool {
        matches!(self, Self::ApplyFailure { .. } | Self::OutputMissing { .. })
    }

    /// Returns the stage this error refers to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::ApplyFailure { stage, .. }
            | Self::OutputMissing { stage, .. }
            | Self::Cancelled { stage, .. } => Some(stage),
            Self::Aborted { .. } | Self::Rejected { .. } => None,
        }
    }
}

/// A destroy call that failed during teardown.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Teardown of stage '{stage}' failed: {reason}")]
pub struct TeardownFailure {
    /// The stage whose destroy failed.
    pub stage: String,
    /// What went wrong.
    pub reason: String,
}

/// A post-provision check that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Check '{check}' failed: {reason}")]
pub struct ValidationFailure {
    /// The check name.
    pub check: String,
    /// What went wrong.
    pub reason: String,
}

/// A rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' cannot move from {from} to {to}")]
pub struct InvalidTransition {
    /// The stage name.
    pub stage: String,
    /// Current state.
    pub from: LifecycleState,
    /// Requested state.
    pub to: LifecycleState,
}

/// Errors raised by external tools (terraform, ssh, kubectl, filesystem).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The program could not be started.
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully.
    #[error(
        "{program} {command} exited with {}: {stderr}",
        code.map_or_else(|| "signal".to_string(), |c| c.to_string())
    )]
    CommandFailed {
        /// Program name.
        program: String,
        /// Sub-command, e.g. "apply".
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured stderr (and stdout tail).
        stderr: String,
    },

    /// The program's output could not be understood.
    #[error("Unexpected output from {program}: {reason}")]
    InvalidOutput {
        /// Program name.
        program: String,
        /// What was wrong.
        reason: String,
    },

    /// A template directory could not be copied.
    #[error("Failed to copy {source_path} into {target}: {reason}")]
    Copy {
        /// Template location.
        source_path: PathBuf,
        /// Working copy location.
        target: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Retries were exhausted.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The last error message.
        last_error: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    /// Creates a command failure.
    #[must_use]
    pub fn command_failed(
        program: impl Into<String>,
        command: impl Into<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            program: program.into(),
            command: command.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Creates an invalid output error.
    #[must_use]
    pub fn invalid_output(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Returns the text retry classifiers should match against.
    #[must_use]
    pub fn diagnostic_text(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Provides default suggestions for chain contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CHAIN-EMPTY" => Some("Add at least one stage to the scenario before building."),
            "CHAIN-DUPLICATE" => Some("Stage names must be unique within a scenario."),
            "CHAIN-MISSING-DEP" => Some(
                "Declare upstream stages before the stages that consume them. \
                 Check for typos in stage names.",
            ),
            "CHAIN-UNDECLARED-OUTPUT" => Some(
                "Add the output to the upstream stage's declared outputs, \
                 or bind to an output it already declares.",
            ),
            "CHAIN-INPUT-CONFLICT" => {
                Some("An input is either a literal or a binding, never both.")
            }
            _ => None,
        }
    }
}
