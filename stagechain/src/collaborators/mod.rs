//! Narrow interfaces to the external tools a scenario drives.
//!
//! The runner only ever talks to Terraform, SSH and Kubernetes through these
//! traits. Production implementations shell out to the respective CLIs;
//! `crate::testing` provides in-memory doubles.

mod command;
mod kubectl;
mod ssh;
mod terraform;
mod workspace;

pub use command::ToolCommand;
pub use kubectl::{KubectlServiceClassProbe, ServiceClassManifest};
pub use ssh::SshProbe;
pub use terraform::{parse_output_json, TerraformProvisioner, VAR_FILE_NAME};
pub use workspace::{is_template_file, DirWorkspace};

use crate::core::{StageOutputs, VarValue};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Produces isolated, writable copies of template configurations.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Copies `source` into the working copy identified by `key`.
    ///
    /// Materializing an existing key refreshes template files but keeps
    /// state already in the working copy.
    async fn materialize(&self, source: &Path, key: &str) -> Result<PathBuf, CollaboratorError>;

    /// Returns the working copy for `key` if it exists.
    async fn locate(&self, key: &str) -> Option<PathBuf>;
}

/// Applies, destroys and queries infrastructure configurations.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Applies the configuration in `dir` and returns every output.
    ///
    /// Implementations retry transient provider errors.
    async fn apply(
        &self,
        dir: &Path,
        inputs: &BTreeMap<String, VarValue>,
    ) -> Result<StageOutputs, CollaboratorError>;

    /// Destroys everything the configuration in `dir` manages.
    async fn destroy(&self, dir: &Path) -> Result<(), CollaboratorError>;

    /// Reads one output of an applied configuration.
    async fn output(&self, dir: &Path, name: &str) -> Result<Option<VarValue>, CollaboratorError>;
}

/// Checks that a host accepts an SSH login.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessProbe: Send + Sync {
    /// Connects to `host` as `user` with a PEM/OpenSSH private key.
    async fn ssh_connect(
        &self,
        host: &str,
        user: &str,
        private_key: &str,
    ) -> Result<(), CollaboratorError>;
}

/// A workload shape that a service class must be able to schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClassSpec {
    /// Node pool tier, e.g. `prod1k`.
    pub tier: String,
    /// Storage class for persistent volumes.
    pub storage_class: String,
    /// Number of independent deployments to schedule.
    pub replica_count: u32,
    /// Primary, backup and monitor instead of a standalone instance.
    pub high_availability: bool,
}

impl ServiceClassSpec {
    /// Creates a standalone workload spec.
    #[must_use]
    pub fn standalone(
        tier: impl Into<String>,
        storage_class: impl Into<String>,
        replica_count: u32,
    ) -> Self {
        Self {
            tier: tier.into(),
            storage_class: storage_class.into(),
            replica_count,
            high_availability: false,
        }
    }

    /// Creates a high-availability workload spec.
    #[must_use]
    pub fn high_availability(
        tier: impl Into<String>,
        storage_class: impl Into<String>,
        replica_count: u32,
    ) -> Self {
        Self {
            high_availability: true,
            ..Self::standalone(tier, storage_class, replica_count)
        }
    }

    /// Returns a stable check name, e.g. `service-class-prod1k-ha-x1`.
    #[must_use]
    pub fn check_name(&self) -> String {
        let mode = if self.high_availability { "ha" } else { "sa" };
        format!("service-class-{}-{}-x{}", self.tier, mode, self.replica_count)
    }
}

/// Deploys a workload onto a service class and waits for it to become ready.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceClassProbe: Send + Sync {
    /// Schedules the workload described by `spec` using `kubeconfig`.
    async fn check_service_class(
        &self,
        kubeconfig: &Path,
        spec: &ServiceClassSpec,
    ) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_class_check_name() {
        assert_eq!(
            ServiceClassSpec::high_availability("prod1k", "ssd", 1).check_name(),
            "service-class-prod1k-ha-x1"
        );
        assert_eq!(
            ServiceClassSpec::standalone("prod100k", "ssd", 1).check_name(),
            "service-class-prod100k-sa-x1"
        );
    }
}
