//! # Stagechain
//!
//! Multi-stage Terraform provisioning and teardown for end-to-end tests of a
//! managed Kubernetes cluster module.
//!
//! A scenario chains Terraform stages (prerequisites, an optional network,
//! the cluster and its configuration), wires each stage's outputs into the
//! inputs of later stages, validates the result and tears everything down
//! in reverse order:
//!
//! - **Typed wiring**: stage bindings are checked before any stage runs
//! - **Guaranteed teardown**: each stage registers its destroy before applying
//! - **Independent checks**: every validation check reports on its own
//! - **Parallel scenarios**: scenarios share nothing but read-only templates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagechain::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let ctx = AssemblyContext::new(TemplatePaths::under(Path::new("/repo")));
//! let scenario = assemble(ScenarioKind::Complete, "ab12cd34", &ctx)?;
//!
//! let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::debug());
//! let validator = ValidationDispatcher::new(
//!     Arc::new(SshProbe::new()),
//!     Arc::new(KubectlServiceClassProbe::new()),
//!     events.clone(),
//! );
//! let runner = ScenarioRunner::new(
//!     Arc::new(TerraformProvisioner::new()),
//!     Arc::new(DirWorkspace::new("/tmp/stagechain")),
//!     validator,
//! )
//! .with_events(events);
//! let report = runner.run(&scenario).await;
//! println!("{}", report.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod naming;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod scenarios;
pub mod stages;
pub mod testing;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{
        with_teardown, CancellationToken, TeardownOutcome, TeardownRegistry,
    };
    pub use crate::collaborators::{
        AccessProbe, DirWorkspace, KubectlServiceClassProbe, Provisioner, ServiceClassProbe,
        ServiceClassSpec, SshProbe, TerraformProvisioner, Workspace,
    };
    pub use crate::config::RunConfig;
    pub use crate::core::{LifecycleState, OutputRef, ScenarioOutputs, StageOutputs, VarValue};
    pub use crate::errors::{
        CollaboratorError, ContractErrorInfo, NamingError, PipelineValidationError, ScenarioError,
        StagechainError, TeardownFailure, ValidationFailure,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::naming::{generate_tags, unique_id, NamePolicy};
    pub use crate::observability::{init_tracing, LogFormat, SpanTimer};
    pub use crate::pipeline::{
        ChainBuilder, RetryConfig, RetryableErrors, ScenarioRunner, StageChain,
    };
    pub use crate::report::{ScenarioReport, StageSummary};
    pub use crate::scenarios::{
        assemble, assemble_or_reject, AssemblyContext, Scenario, ScenarioKind, TemplatePaths,
    };
    pub use crate::stages::{InputBinding, StageRecord, StageSpec};
    pub use crate::validation::{
        CheckOutcome, CheckResult, CheckSpec, ValidationBattery, ValidationDispatcher,
    };
}
