//! Scenario chains: static validation, input wiring, retries and the runner.

mod builder;
mod chain;
mod retry;
mod runner;


pub use builder::ChainBuilder;
pub use chain::StageChain;
pub use retry::{with_retry_if, RetryConfig, RetryableErrors, DEFAULT_RETRYABLE_TERRAFORM_ERRORS};
pub use runner::ScenarioRunner;
