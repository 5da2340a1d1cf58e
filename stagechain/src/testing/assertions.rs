//! Test assertions for scenario reports.

use super::RecordingProvisioner;
use crate::report::ScenarioReport;

/// Asserts that the scenario succeeded.
pub fn assert_scenario_succeeded(report: &ScenarioReport) {
    assert!(
        report.is_success(),
        "Expected scenario '{}' to succeed, got failure {:?} and failed checks {:?}",
        report.scenario,
        report.failure,
        report.validation_failures()
    );
}

/// Asserts that forward progress stopped at `stage`.
pub fn assert_scenario_failed_at(report: &ScenarioReport, stage: &str) {
    let failed_at = report.failure.as_ref().and_then(|f| f.stage());
    assert_eq!(
        failed_at,
        Some(stage),
        "Expected scenario '{}' to fail at '{}', got {:?}",
        report.scenario,
        stage,
        report.failure
    );
}

/// Asserts the exact sequence of destroyed stages.
pub fn assert_destroy_order(provisioner: &RecordingProvisioner, expected: &[&str]) {
    let destroyed = provisioner.destroyed_stages();
    assert_eq!(
        destroyed, expected,
        "Expected destroy order {expected:?}, got {destroyed:?}"
    );
}

/// Asserts that nothing was destroyed.
pub fn assert_no_destroys(provisioner: &RecordingProvisioner) {
    let destroyed = provisioner.destroyed_stages();
    assert!(destroyed.is_empty(), "Expected no destroys, got {destroyed:?}");
}
