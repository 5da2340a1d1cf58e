//! Post-provision validation.
//!
//! A [`ValidationBattery`] is the list of checks a scenario runs once its
//! final stage is applied. Checks never stop each other: every check runs
//! and produces a [`CheckResult`]. The kubeconfig is a precondition for
//! service-class checks only, so a missing kubeconfig skips those and
//! leaves the SSH check alone.

use crate::collaborators::{AccessProbe, ServiceClassProbe, ServiceClassSpec};
use crate::core::{OutputRef, ScenarioOutputs};
use crate::errors::{CollaboratorError, PipelineValidationError, ValidationFailure};
use crate::events::{kinds, EventSink};
use crate::observability::SpanTimer;
use crate::pipeline::StageChain;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the kubeconfig precondition when it is reported as a check.
pub const KUBECONFIG_CHECK: &str = "kubeconfig";

/// One post-provision check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSpec {
    /// Log into the bastion host over SSH.
    BastionSsh {
        /// Output holding the host address.
        host: OutputRef,
        /// Login user.
        user: String,
        /// Output holding the private key.
        private_key: OutputRef,
    },
    /// Schedule a workload on a service class.
    ServiceClass(ServiceClassSpec),
}

impl CheckSpec {
    /// Returns the check name used in results and events.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::BastionSsh { .. } => "bastion-ssh".to_string(),
            Self::ServiceClass(spec) => spec.check_name(),
        }
    }

    /// Returns true if the check needs the kubeconfig.
    #[must_use]
    pub fn needs_kubeconfig(&self) -> bool {
        matches!(self, Self::ServiceClass(_))
    }

    fn references(&self) -> Vec<&OutputRef> {
        match self {
            Self::BastionSsh { host, private_key, .. } => vec![host, private_key],
            Self::ServiceClass(_) => Vec::new(),
        }
    }
}

/// The checks a scenario runs after its final stage applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationBattery {
    /// Output holding the kubeconfig for service-class checks.
    pub kubeconfig: Option<OutputRef>,
    /// Checks in execution order.
    pub checks: Vec<CheckSpec>,
}

impl ValidationBattery {
    /// Creates an empty battery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the kubeconfig source.
    #[must_use]
    pub fn with_kubeconfig(mut self, source: OutputRef) -> Self {
        self.kubeconfig = Some(source);
        self
    }

    /// Appends a check.
    #[must_use]
    pub fn with_check(mut self, check: CheckSpec) -> Self {
        self.checks.push(check);
        self
    }

    /// Returns the number of checks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns true if there are no checks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Checks every output reference against the chain's declared outputs.
    ///
    /// # Errors
    ///
    /// Returns a `CHAIN-UNDECLARED-OUTPUT` error for the first bad reference.
    pub fn validate_against(&self, chain: &StageChain) -> Result<(), PipelineValidationError> {
        self.kubeconfig
            .iter()
            .chain(self.checks.iter().flat_map(CheckSpec::references))
            .try_for_each(|reference| chain.check_reference(reference))
    }
}

/// How a check ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The check succeeded.
    Passed,
    /// The check ran and failed.
    Failed {
        /// What went wrong.
        reason: String,
    },
    /// The check could not run because a precondition failed.
    Skipped {
        /// Why it did not run.
        reason: String,
    },
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub name: String,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: CheckOutcome,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

impl CheckResult {
    /// Creates a result.
    #[must_use]
    pub fn new(name: impl Into<String>, outcome: CheckOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            duration_ms: 0.0,
        }
    }

    /// Returns true if the check passed.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.outcome == CheckOutcome::Passed
    }

    /// Returns true if the check failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Failed { .. })
    }

    /// Returns the failure, if the check failed.
    #[must_use]
    pub fn failure(&self) -> Option<ValidationFailure> {
        match &self.outcome {
            CheckOutcome::Failed { reason } => Some(ValidationFailure {
                check: self.name.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Runs a battery against captured outputs.
#[derive(Clone)]
pub struct ValidationDispatcher {
    access: Arc<dyn AccessProbe>,
    services: Arc<dyn ServiceClassProbe>,
    events: Arc<dyn EventSink>,
}

impl ValidationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        access: Arc<dyn AccessProbe>,
        services: Arc<dyn ServiceClassProbe>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            access,
            services,
            events,
        }
    }

    /// Runs every check and returns one result per check, plus a failed
    /// `kubeconfig` result when that precondition fails.
    pub async fn run(
        &self,
        scenario: &str,
        battery: &ValidationBattery,
        outputs: &ScenarioOutputs,
    ) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(battery.checks.len() + 1);

        let kubeconfig = if battery.checks.iter().any(CheckSpec::needs_kubeconfig) {
            match materialize_kubeconfig(battery.kubeconfig.as_ref(), outputs).await {
                Ok(file) => Some(Ok(file)),
                Err(reason) => {
                    let outcome = CheckOutcome::Failed {
                        reason: reason.clone(),
                    };
                    let result = CheckResult::new(KUBECONFIG_CHECK, outcome);
                    self.record(scenario, &result).await;
                    results.push(result);
                    Some(Err(reason))
                }
            }
        } else {
            None
        };

        for check in &battery.checks {
            let timer = SpanTimer::start(check.name());
            let outcome = match check {
                CheckSpec::BastionSsh { host, user, private_key } => {
                    self.check_ssh(host, user, private_key, outputs).await
                }
                CheckSpec::ServiceClass(spec) => match &kubeconfig {
                    Some(Ok(file)) => {
                        outcome_of(self.services.check_service_class(file.path(), spec).await)
                    }
                    Some(Err(reason)) => CheckOutcome::Skipped {
                        reason: format!("kubeconfig unavailable: {reason}"),
                    },
                    None => CheckOutcome::Skipped {
                        reason: "kubeconfig unavailable".to_string(),
                    },
                },
            };

            let mut result = CheckResult::new(timer.name(), outcome);
            result.duration_ms = timer.finish();
            self.record(scenario, &result).await;
            results.push(result);
        }

        results
    }

    async fn check_ssh(
        &self,
        host: &OutputRef,
        user: &str,
        private_key: &OutputRef,
        outputs: &ScenarioOutputs,
    ) -> CheckOutcome {
        let host_value = match string_output(outputs, host) {
            Ok(value) => value,
            Err(reason) => return CheckOutcome::Failed { reason },
        };
        let key_value = match string_output(outputs, private_key) {
            Ok(value) => value,
            Err(reason) => return CheckOutcome::Failed { reason },
        };
        outcome_of(self.access.ssh_connect(host_value, user, key_value).await)
    }

    async fn record(&self, scenario: &str, result: &CheckResult) {
        let (kind, reason) = match &result.outcome {
            CheckOutcome::Passed => {
                info!(
                    scenario,
                    check = %result.name,
                    duration_ms = result.duration_ms,
                    "check passed"
                );
                (kinds::CHECK_PASSED, None)
            }
            CheckOutcome::Failed { reason } => {
                warn!(scenario, check = %result.name, %reason, "check failed");
                (kinds::CHECK_FAILED, Some(reason))
            }
            CheckOutcome::Skipped { reason } => {
                warn!(scenario, check = %result.name, %reason, "check skipped");
                (kinds::CHECK_SKIPPED, Some(reason))
            }
        };
        self.events
            .emit(
                kind,
                Some(json!({"scenario": scenario, "check": result.name, "reason": reason})),
            )
            .await;
    }
}

impl std::fmt::Debug for ValidationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationDispatcher").finish_non_exhaustive()
    }
}

fn outcome_of(result: Result<(), CollaboratorError>) -> CheckOutcome {
    match result {
        Ok(()) => CheckOutcome::Passed,
        Err(e) => CheckOutcome::Failed { reason: e.to_string() },
    }
}

fn string_output<'a>(
    outputs: &'a ScenarioOutputs,
    reference: &OutputRef,
) -> Result<&'a str, String> {
    match outputs.resolve(reference) {
        Some(value) => value
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("output '{reference}' is not a non-empty string")),
        None => Err(format!("output '{reference}' was not produced")),
    }
}

async fn materialize_kubeconfig(
    source: Option<&OutputRef>,
    outputs: &ScenarioOutputs,
) -> Result<tempfile::NamedTempFile, String> {
    let source = source.ok_or_else(|| "no kubeconfig output configured".to_string())?;
    let content = string_output(outputs, source)?.to_string();

    tokio::task::spawn_blocking(move || write_kubeconfig(&content))
        .await
        .map_err(|e| format!("kubeconfig writer task failed: {e}"))?
}

fn write_kubeconfig(content: &str) -> Result<tempfile::NamedTempFile, String> {
    let mut file = tempfile::Builder::new()
        .prefix("stagechain-kubeconfig-")
        .tempfile()
        .map_err(|e| format!("failed to create kubeconfig file: {e}"))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| format!("failed to write kubeconfig file: {e}"))?;
    Ok(file)
}
