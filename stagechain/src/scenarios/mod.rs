//! The scenario catalog and deterministic scenario assembly.
//!
//! Every scenario chains `prerequisites`, optionally `network`, then
//! `cluster` and `configuration`. Assembly is pure: the same kind, suffix
//! and context always produce the same [`Scenario`].

use crate::collaborators::ServiceClassSpec;
use crate::core::{OutputRef, VarValue};
use crate::errors::StagechainError;
use crate::naming::{generate_tags, NamePolicy};
use crate::pipeline::{ChainBuilder, StageChain};
use crate::report::ScenarioReport;
use crate::stages::{InputBinding, StageSpec};
use crate::validation::{CheckSpec, ValidationBattery};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Stage names used by the catalog.
pub mod stage_names {
    /// Shared prerequisites: SSH key pair and the caller's public CIDR.
    pub const PREREQUISITES: &str = "prerequisites";
    /// Externally managed VPC for the external-network scenario.
    pub const NETWORK: &str = "network";
    /// The GKE cluster under test.
    pub const CLUSTER: &str = "cluster";
    /// Post-deploy configuration that produces the kubeconfig.
    pub const CONFIGURATION: &str = "configuration";
}

use stage_names::{CLUSTER, CONFIGURATION, NETWORK, PREREQUISITES};

/// Default Kubernetes version of the cluster under test.
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.29";

const MASTER_IPV4_CIDR_BLOCK: &str = "10.100.0.0/28";
const STORAGE_CLASS: &str = "ssd";
const BASTION_USER: &str = "ubuntu";

/// The scenarios in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Cluster with bastion host and default networking.
    Complete,
    /// Cluster with a dedicated messaging pod range and no bastion.
    MessagingCidr,
    /// Cluster inside a separately provisioned network.
    ExternalNetwork,
}

impl ScenarioKind {
    /// Every scenario in catalog order.
    pub const ALL: [Self; 3] = [Self::Complete, Self::MessagingCidr, Self::ExternalNetwork];

    /// Returns the scenario name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::MessagingCidr => "messaging-cidr",
            Self::ExternalNetwork => "external-network",
        }
    }

    /// Returns the cluster naming policy.
    ///
    /// Suffix lengths put the generated names at 27, 30 and 30 characters.
    #[must_use]
    pub const fn name_policy(self) -> NamePolicy {
        match self {
            Self::Complete => NamePolicy::new("terratest-complete-", 8),
            Self::MessagingCidr => NamePolicy::new("terratest-cidr-", 15),
            Self::ExternalNetwork => NamePolicy::new("terratest-network-", 12),
        }
    }

    /// Returns the GCP region.
    #[must_use]
    pub const fn region(self) -> &'static str {
        match self {
            Self::Complete => "europe-west1",
            Self::MessagingCidr => "europe-west3",
            Self::ExternalNetwork => "us-east1",
        }
    }

    /// Returns the override if given, otherwise a freshly generated suffix.
    #[must_use]
    pub fn resolve_suffix(self, requested: Option<&str>) -> String {
        match requested {
            Some(suffix) if !suffix.is_empty() => suffix.to_string(),
            _ => self.name_policy().generate_suffix(),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = StagechainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| StagechainError::NotFound(format!("scenario '{s}'")))
    }
}

/// Locations of the template configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePaths {
    /// Prerequisites configuration.
    pub prerequisites: PathBuf,
    /// External network configuration.
    pub network: PathBuf,
    /// The cluster module under test.
    pub cluster: PathBuf,
    /// Post-deploy configuration.
    pub configuration: PathBuf,
    /// Storage class manifest handed to the configuration stage.
    pub storage_class: PathBuf,
}

impl TemplatePaths {
    /// Returns the standard layout below a repository root.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            prerequisites: root.join("testing/prerequisites"),
            network: root.join("testing/gke/network"),
            cluster: root.join("gke/terraform"),
            configuration: root.join("testing/gke/configuration"),
            storage_class: root.join("gke/kubernetes/storage-class.yaml"),
        }
    }
}

/// Everything assembly needs besides the kind and suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyContext {
    /// Template locations.
    pub templates: TemplatePaths,
    /// Kubernetes version of the cluster.
    pub kubernetes_version: String,
    /// Skip teardown and leave resources running.
    pub keep_resources: bool,
}

impl AssemblyContext {
    /// Creates a context with the default Kubernetes version.
    #[must_use]
    pub fn new(templates: TemplatePaths) -> Self {
        Self {
            templates,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            keep_resources: false,
        }
    }

    /// Sets the keep-resources flag.
    #[must_use]
    pub fn with_keep_resources(mut self, keep: bool) -> Self {
        self.keep_resources = keep;
        self
    }

    /// Sets the Kubernetes version.
    #[must_use]
    pub fn with_kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = version.into();
        self
    }
}

/// A fully assembled, validated scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Catalog entry.
    pub kind: ScenarioKind,
    /// Scenario name.
    pub name: String,
    /// Suffix shared by every resource of this run.
    pub suffix: String,
    /// Derived cluster name.
    pub cluster_name: String,
    /// GCP region.
    pub region: String,
    /// Stages in apply order.
    pub chain: StageChain,
    /// Post-provision checks.
    pub battery: ValidationBattery,
    /// Skip teardown entirely.
    pub keep_resources: bool,
}

impl Scenario {
    /// Returns the working copy key of a stage.
    #[must_use]
    pub fn working_copy_key(&self, stage: &str) -> String {
        format!("{}-{stage}-{}", self.name, self.suffix)
    }
}

fn output(stage: &str, name: &str) -> OutputRef {
    OutputRef::new(stage, name)
}

fn service_class_checks() -> Vec<CheckSpec> {
    vec![
        ServiceClassSpec::high_availability("prod1k", STORAGE_CLASS, 1),
        ServiceClassSpec::standalone("prod1k", STORAGE_CLASS, 2),
        ServiceClassSpec::high_availability("prod10k", STORAGE_CLASS, 1),
        ServiceClassSpec::standalone("prod10k", STORAGE_CLASS, 2),
        ServiceClassSpec::standalone("prod100k", STORAGE_CLASS, 1),
    ]
    .into_iter()
    .map(CheckSpec::ServiceClass)
    .collect()
}

fn cluster_stage(kind: ScenarioKind, cluster_name: &str, ctx: &AssemblyContext) -> StageSpec {
    let common = StageSpec::new(CLUSTER, &ctx.templates.cluster)
        .with_input("cluster_name", cluster_name)
        .with_input("region", kind.region())
        .with_input("kubernetes_version", ctx.kubernetes_version.as_str())
        .with_input("master_ipv4_cidr_block", MASTER_IPV4_CIDR_BLOCK)
        .with_input("kubernetes_api_public_access", true)
        .with_binding(InputBinding::list_of(
            "kubernetes_api_authorized_networks",
            output(PREREQUISITES, "local_cidr"),
        ));

    match kind {
        ScenarioKind::Complete => common
            .with_input("network_cidr_range", "10.10.0.0/24")
            .with_input("secondary_cidr_range_pods", "10.11.0.0/16")
            .with_input("secondary_cidr_range_services", "10.12.0.0/16")
            .with_input("common_labels", VarValue::from(generate_tags(cluster_name)))
            .with_binding(InputBinding::list_of(
                "bastion_ssh_authorized_networks",
                output(PREREQUISITES, "local_cidr"),
            ))
            .with_binding(InputBinding::new(
                "bastion_ssh_public_key",
                output(PREREQUISITES, "bastion_ssh_public_key"),
            ))
            .with_outputs(["bastion_public_ip"]),
        ScenarioKind::MessagingCidr => common
            .with_input("network_cidr_range", "10.10.1.0/24")
            .with_input("secondary_cidr_range_pods", "172.25.0.0/16")
            .with_input("secondary_cidr_range_services", "172.26.0.0/16")
            .with_optional_input("secondary_cidr_range_messaging_pods", Some("10.10.2.0/24"))
            .with_input("max_pods_per_node_system", 110_i64)
            .with_input("create_bastion", false),
        ScenarioKind::ExternalNetwork => common
            .with_input("create_network", false)
            .with_input("secondary_range_name_services", "services")
            .with_input("secondary_range_name_pods", "pods")
            .with_input("create_bastion", false)
            .with_binding(InputBinding::new("network_name", output(NETWORK, "network_name")))
            .with_binding(InputBinding::new("subnetwork_name", output(NETWORK, "subnetwork_name"))),
    }
}

/// Assembles the scenario `kind` for `suffix`.
///
/// # Errors
///
/// Returns a naming error if the suffix is invalid or the cluster name is
/// too long, and a validation error if the chain or battery is inconsistent.
pub fn assemble(
    kind: ScenarioKind,
    suffix: &str,
    ctx: &AssemblyContext,
) -> Result<Scenario, StagechainError> {
    let cluster_name = kind.name_policy().cluster_name(suffix)?;
    let region = kind.region();

    let prerequisite_outputs: &[&str] = match kind {
        ScenarioKind::Complete => &[
            "local_cidr",
            "bastion_ssh_public_key",
            "bastion_ssh_private_key",
        ],
        ScenarioKind::MessagingCidr | ScenarioKind::ExternalNetwork => &["local_cidr"],
    };

    let mut builder = ChainBuilder::new(kind.name()).stage(
        StageSpec::new(PREREQUISITES, &ctx.templates.prerequisites)
            .with_outputs(prerequisite_outputs.iter().copied()),
    )?;

    if kind == ScenarioKind::ExternalNetwork {
        builder = builder.stage(
            StageSpec::new(NETWORK, &ctx.templates.network)
                .with_input("cluster_name", cluster_name.as_str())
                .with_input("region", region)
                .with_outputs(["network_name", "subnetwork_name"]),
        )?;
    }

    let chain = builder
        .stage(cluster_stage(kind, &cluster_name, ctx))?
        .stage(
            StageSpec::new(CONFIGURATION, &ctx.templates.configuration)
                .with_input("cluster_name", cluster_name.as_str())
                .with_input("region", region)
                .with_input(
                    "storage_class_path",
                    ctx.templates.storage_class.to_string_lossy().into_owned(),
                )
                .after(CLUSTER)
                .with_outputs(["kubeconfig"]),
        )?
        .build()?;

    let mut battery = ValidationBattery::new().with_kubeconfig(output(CONFIGURATION, "kubeconfig"));
    if kind == ScenarioKind::Complete {
        battery = battery.with_check(CheckSpec::BastionSsh {
            host: output(CLUSTER, "bastion_public_ip"),
            user: BASTION_USER.to_string(),
            private_key: output(PREREQUISITES, "bastion_ssh_private_key"),
        });
    }
    for check in service_class_checks() {
        battery = battery.with_check(check);
    }
    battery.validate_against(&chain)?;

    Ok(Scenario {
        kind,
        name: kind.name().to_string(),
        suffix: suffix.to_string(),
        cluster_name,
        region: region.to_string(),
        chain,
        battery,
        keep_resources: ctx.keep_resources,
    })
}

/// Assembles `kind`, or returns a failed report if assembly is rejected.
///
/// Lets one bad scenario fail on its own while its siblings still run.
pub fn assemble_or_reject(
    kind: ScenarioKind,
    suffix: &str,
    ctx: &AssemblyContext,
) -> Result<Scenario, ScenarioReport> {
    assemble(kind, suffix, ctx).map_err(|e| {
        let cluster_name = format!("{}{suffix}", kind.name_policy().prefix);
        warn!(scenario = %kind, suffix, error = %e, "scenario rejected");
        ScenarioReport::rejected(kind.name(), suffix, &cluster_name, e.to_string())
    })
}
