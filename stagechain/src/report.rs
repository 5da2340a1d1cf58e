//! Scenario run reports.

use crate::core::{LifecycleState, ScenarioOutputs};
use crate::errors::{ScenarioError, TeardownFailure, ValidationFailure};
use crate::stages::StageRecord;
use crate::validation::{CheckOutcome, CheckResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

/// Final state of one stage. Output values are omitted, only names are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Stage name.
    pub name: String,
    /// Final lifecycle state.
    pub state: LifecycleState,
    /// Working copy, if one was materialized.
    pub working_copy: Option<PathBuf>,
    /// Names of captured outputs.
    pub outputs: Vec<String>,
}

impl From<&StageRecord> for StageSummary {
    fn from(record: &StageRecord) -> Self {
        Self {
            name: record.name.clone(),
            state: record.state,
            working_copy: record.working_copy.clone(),
            outputs: record.outputs.names().map(str::to_string).collect(),
        }
    }
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Scenario name.
    pub scenario: String,
    /// Resource suffix.
    pub suffix: String,
    /// Derived cluster name.
    pub cluster_name: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When teardown finished.
    pub finished_at: DateTime<Utc>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
    /// Whether teardown was skipped.
    pub keep_resources: bool,
    /// Stages in chain order.
    pub stages: Vec<StageSummary>,
    /// Validation results, empty if the chain did not complete.
    pub checks: Vec<CheckResult>,
    /// The error that stopped forward progress.
    pub failure: Option<ScenarioError>,
    /// Destroy calls that failed. Resources may have leaked.
    pub teardown_failures: Vec<TeardownFailure>,
    /// Captured outputs. Never serialized.
    #[serde(skip)]
    pub outputs: ScenarioOutputs,
}

impl ScenarioReport {
    /// Creates an empty report for a run starting now.
    #[must_use]
    pub fn started(scenario: &str, suffix: &str, cluster_name: &str, keep_resources: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            scenario: scenario.to_string(),
            suffix: suffix.to_string(),
            cluster_name: cluster_name.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0.0,
            keep_resources,
            stages: Vec::new(),
            checks: Vec::new(),
            failure: None,
            teardown_failures: Vec::new(),
            outputs: ScenarioOutputs::new(),
        }
    }

    /// Creates a failed report for a scenario that never started.
    #[must_use]
    pub fn rejected(
        scenario: &str,
        suffix: &str,
        cluster_name: &str,
        reason: impl Into<String>,
    ) -> Self {
        let mut report = Self::started(scenario, suffix, cluster_name, false);
        report.failure = Some(ScenarioError::Rejected { reason: reason.into() });
        report
    }

    /// Returns true if the chain completed and every check passed.
    ///
    /// Teardown failures are warnings and do not affect success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.checks.iter().any(CheckResult::is_failed)
    }

    /// Returns the failed checks.
    #[must_use]
    pub fn validation_failures(&self) -> Vec<ValidationFailure> {
        self.checks.iter().filter_map(CheckResult::failure).collect()
    }

    /// Returns true if a destroy call failed.
    #[must_use]
    pub fn has_leaks(&self) -> bool {
        !self.teardown_failures.is_empty()
    }

    /// Returns the stages that may still have live cloud resources.
    #[must_use]
    pub fn stages_holding_resources(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.state.holds_resources())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Returns the state of a stage.
    #[must_use]
    pub fn stage_state(&self, name: &str) -> Option<LifecycleState> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.state)
    }

    /// Renders a short human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let verdict = if self.is_success() { "PASS" } else { "FAIL" };
        let passed = self.checks.iter().filter(|c| c.is_passed()).count();
        let mut out = format!(
            "{verdict} {} ({}) in {:.1}s: {}/{} checks passed",
            self.scenario,
            self.cluster_name,
            self.duration_ms / 1000.0,
            passed,
            self.checks.len()
        );

        if let Some(failure) = &self.failure {
            let _ = write!(out, "\n  error: {failure}");
        }
        for check in &self.checks {
            match &check.outcome {
                CheckOutcome::Passed => {}
                CheckOutcome::Failed { reason } => {
                    let _ = write!(out, "\n  check {} failed: {reason}", check.name);
                }
                CheckOutcome::Skipped { reason } => {
                    let _ = write!(out, "\n  check {} skipped: {reason}", check.name);
                }
            }
        }
        for leak in &self.teardown_failures {
            let _ = write!(out, "\n  warning: {leak}");
        }
        if self.keep_resources {
            let _ = write!(out, "\n  resources kept, suffix {}", self.suffix);
        }
        let live = self.stages_holding_resources();
        if !live.is_empty() {
            let _ = write!(out, "\n  still provisioned: {}", live.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_no_failure_and_no_failed_check() {
        let mut report =
            ScenarioReport::started("complete", "ab12cd34", "terratest-complete-ab12cd34", false);
        report.checks.push(CheckResult::new("bastion-ssh", CheckOutcome::Passed));
        assert!(report.is_success());

        report.teardown_failures.push(TeardownFailure {
            stage: "cluster".to_string(),
            reason: "timeout".to_string(),
        });
        assert!(report.is_success());
        assert!(report.has_leaks());

        report.checks.push(CheckResult::new(
            "service-class-prod1k-ha-x1",
            CheckOutcome::Failed { reason: "rollout".to_string() },
        ));
        assert!(!report.is_success());
        assert_eq!(report.validation_failures().len(), 1);
    }

    #[test]
    fn test_summary_lists_problems() {
        let mut report =
            ScenarioReport::started("complete", "ab12cd34", "terratest-complete-ab12cd34", true);
        report.failure = Some(ScenarioError::apply_failure("prerequisites", "quota"));
        report.teardown_failures.push(TeardownFailure {
            stage: "prerequisites".to_string(),
            reason: "locked".to_string(),
        });

        let summary = report.summary();
        assert!(summary.starts_with("FAIL complete (terratest-complete-ab12cd34)"));
        assert!(summary.contains("error: Stage 'prerequisites' failed to apply: quota"));
        assert!(summary.contains("warning: Teardown of stage 'prerequisites' failed: locked"));
        assert!(summary.contains("resources kept, suffix ab12cd34"));
    }

    #[test]
    fn test_summary_names_stages_left_provisioned() {
        let mut report =
            ScenarioReport::started("complete", "ab12cd34", "terratest-complete-ab12cd34", false);
        let states = [
            ("prerequisites", LifecycleState::Applied),
            ("cluster", LifecycleState::Failed),
            ("configuration", LifecycleState::Uninitialized),
        ];
        for (name, state) in states {
            let mut record = StageRecord::new(name);
            record.state = state;
            report.stages.push(StageSummary::from(&record));
        }

        assert_eq!(report.stages_holding_resources(), vec!["prerequisites", "cluster"]);
        assert!(report.summary().contains("still provisioned: prerequisites, cluster"));

        report.stages.iter_mut().for_each(|s| s.state = LifecycleState::Destroyed);
        assert!(report.stages_holding_resources().is_empty());
        assert!(!report.summary().contains("still provisioned"));
    }

    #[test]
    fn test_report_json_omits_outputs() {
        let mut report = ScenarioReport::started("complete", "s", "c", false);
        report.outputs.record(
            "prerequisites",
            crate::core::StageOutputs::new().with("bastion_ssh_private_key", "SECRET"),
        );

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("SECRET"));
        assert!(json.contains("\"run_id\""));
    }
}
