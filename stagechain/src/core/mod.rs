//! Core types for stagechain scenarios.
//!
//! This module contains the fundamental value types:
//! - `LifecycleState`: where a stage is in its apply/destroy lifecycle
//! - `VarValue`: a Terraform-compatible variable or output value
//! - `StageOutputs` / `ScenarioOutputs`: captured outputs

mod lifecycle;
mod outputs;
mod value;

pub use lifecycle::LifecycleState;
pub use outputs::{OutputRef, ScenarioOutputs, StageOutputs};
pub use value::VarValue;
