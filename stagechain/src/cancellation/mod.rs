//! Structured interruption and teardown utilities.
//!
//! This module provides:
//! - CancellationToken for stopping forward progress between stages
//! - TeardownRegistry for LIFO teardown execution
//! - with_teardown for running a body inside a guaranteed teardown scope

mod teardown;
mod token;

pub(crate) use teardown::panic_message;
pub use teardown::{with_teardown, TeardownOutcome, TeardownRegistry};
pub use token::CancellationToken;
