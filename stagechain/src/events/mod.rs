//! Event sinks for scenario lifecycle events.
//!
//! The runner emits one event per lifecycle step (`scenario.started`,
//! `stage.applied`, `stage.destroyed`, `check.failed`, ...). Payloads carry
//! stage and output names, never output values.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// Event type names emitted by the runner.
pub mod kinds {
    /// A scenario started.
    pub const SCENARIO_STARTED: &str = "scenario.started";
    /// A scenario finished, with or without failure.
    pub const SCENARIO_COMPLETED: &str = "scenario.completed";
    /// A stage working copy was materialized.
    pub const STAGE_MATERIALIZED: &str = "stage.materialized";
    /// A stage was applied and its outputs captured.
    pub const STAGE_APPLIED: &str = "stage.applied";
    /// A stage failed to apply.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was destroyed.
    pub const STAGE_DESTROYED: &str = "stage.destroyed";
    /// A stage teardown failed.
    pub const STAGE_TEARDOWN_FAILED: &str = "stage.teardown_failed";
    /// A validation check passed.
    pub const CHECK_PASSED: &str = "check.passed";
    /// A validation check failed.
    pub const CHECK_FAILED: &str = "check.failed";
    /// A validation check was skipped.
    pub const CHECK_SKIPPED: &str = "check.skipped";
}
