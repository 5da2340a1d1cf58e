//! Run configuration, resolved once from flags and the environment.

use crate::collaborators::{DirWorkspace, KubectlServiceClassProbe, SshProbe, TerraformProvisioner};
use crate::errors::StagechainError;
use crate::scenarios::{AssemblyContext, ScenarioKind, TemplatePaths, DEFAULT_KUBERNETES_VERSION};
use clap::Args;
use std::path::PathBuf;

/// Returns true for `yes`, `true` or `1`, ignoring case.
#[must_use]
pub fn parse_keep_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct RunConfig {
    /// Keep provisioned resources after the run (yes, true or 1)
    #[arg(long, global = true, env = "KEEP_CLUSTER")]
    pub keep_cluster: Option<String>,

    /// Reuse this cluster suffix instead of generating one
    #[arg(long = "cluster-suffix", global = true, env = "CLUSTER_SUFFIX")]
    pub suffix: Option<String>,

    /// GCP project passed to Terraform
    #[arg(long, global = true, env = "TF_VAR_project")]
    pub project: Option<String>,

    /// Directory holding per-scenario working copies
    #[arg(long, global = true, env = "STAGECHAIN_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Repository root containing the Terraform templates
    #[arg(long, global = true, env = "STAGECHAIN_TEMPLATES", default_value = ".")]
    pub templates: PathBuf,

    /// Kubernetes version of the cluster under test
    #[arg(
        long,
        global = true,
        env = "STAGECHAIN_KUBERNETES_VERSION",
        default_value = DEFAULT_KUBERNETES_VERSION
    )]
    pub kubernetes_version: String,

    /// Terraform executable
    #[arg(long, global = true, env = "STAGECHAIN_TERRAFORM", default_value = "terraform")]
    pub terraform_bin: String,

    /// ssh executable
    #[arg(long, global = true, env = "STAGECHAIN_SSH", default_value = "ssh")]
    pub ssh_bin: String,

    /// kubectl executable
    #[arg(long, global = true, env = "STAGECHAIN_KUBECTL", default_value = "kubectl")]
    pub kubectl_bin: String,
}

impl RunConfig {
    /// Whether every scenario keeps its resources.
    #[must_use]
    pub fn keep_resources(&self) -> bool {
        self.keep_cluster.as_deref().is_some_and(parse_keep_flag)
    }

    /// Returns the working copy root, `$TMPDIR/stagechain` by default.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("stagechain"))
    }

    /// Returns the template root as an absolute path.
    pub fn templates_root(&self) -> Result<PathBuf, StagechainError> {
        if self.templates.is_absolute() {
            return Ok(self.templates.clone());
        }
        Ok(std::env::current_dir()?.join(&self.templates))
    }

    /// Returns the suffix for `kind`: the override if set, otherwise a fresh one.
    #[must_use]
    pub fn suffix_for(&self, kind: ScenarioKind) -> String {
        kind.resolve_suffix(self.suffix.as_deref())
    }

    /// Builds the assembly context for every scenario of this run.
    pub fn assembly_context(&self) -> Result<AssemblyContext, StagechainError> {
        let templates = TemplatePaths::under(&self.templates_root()?);
        Ok(AssemblyContext::new(templates)
            .with_kubernetes_version(self.kubernetes_version.as_str())
            .with_keep_resources(self.keep_resources()))
    }

    /// Builds the Terraform provisioner.
    #[must_use]
    pub fn provisioner(&self) -> TerraformProvisioner {
        let provisioner = TerraformProvisioner::new().with_binary(self.terraform_bin.as_str());
        match &self.project {
            Some(project) => provisioner.with_env("TF_VAR_project", project.as_str()),
            None => provisioner,
        }
    }

    /// Builds the SSH probe.
    #[must_use]
    pub fn ssh_probe(&self) -> SshProbe {
        SshProbe::new().with_binary(self.ssh_bin.as_str())
    }

    /// Builds the service-class probe.
    #[must_use]
    pub fn service_probe(&self) -> KubectlServiceClassProbe {
        KubectlServiceClassProbe::new().with_binary(self.kubectl_bin.as_str())
    }

    /// Builds the working copy workspace.
    #[must_use]
    pub fn workspace(&self) -> DirWorkspace {
        DirWorkspace::new(self.work_dir())
    }
}
