//! Testing utilities for stagechain scenarios.
//!
//! This module provides:
//! - Recording, in-memory collaborators
//! - Fixtures for catalog scenarios
//! - Assertions over reports and recorded calls

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_destroy_order, assert_no_destroys, assert_scenario_failed_at, assert_scenario_succeeded,
};
pub use fixtures::{catalog_outputs, test_context, test_scenario};
pub use mocks::{
    stage_of, InMemoryWorkspace, ProvisionerCall, RecordingProvisioner, StubAccessProbe,
    StubServiceClassProbe,
};
