//! In-memory collaborators that record every call.

use crate::collaborators::{
    AccessProbe, Provisioner, ServiceClassProbe, ServiceClassSpec, Workspace,
};
use crate::core::{StageOutputs, VarValue};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Extracts the stage name from a `<scenario>-<stage>-<suffix>` working copy.
#[must_use]
pub fn stage_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .and_then(|key| key.rsplit('-').nth(1).map(str::to_string))
        .unwrap_or_default()
}

/// One recorded provisioner call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionerCall {
    /// `apply` with the resolved inputs.
    Apply {
        /// Stage name.
        stage: String,
        /// Inputs passed.
        inputs: BTreeMap<String, VarValue>,
    },
    /// `destroy`.
    Destroy {
        /// Stage name.
        stage: String,
    },
    /// `output`.
    Output {
        /// Stage name.
        stage: String,
        /// Output name.
        name: String,
    },
}

/// A provisioner that returns configured outputs per stage.
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    outputs: Mutex<HashMap<String, StageOutputs>>,
    apply_failures: Mutex<HashMap<String, String>>,
    destroy_failures: Mutex<HashMap<String, String>>,
    apply_panics: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ProvisionerCall>>,
}

impl RecordingProvisioner {
    /// Creates a provisioner whose stages produce no outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outputs `stage` produces on apply.
    #[must_use]
    pub fn with_outputs(self, stage: impl Into<String>, outputs: StageOutputs) -> Self {
        self.outputs.lock().insert(stage.into(), outputs);
        self
    }

    /// Makes apply of `stage` fail.
    #[must_use]
    pub fn fail_apply(self, stage: impl Into<String>, reason: impl Into<String>) -> Self {
        self.apply_failures.lock().insert(stage.into(), reason.into());
        self
    }

    /// Makes destroy of `stage` fail.
    #[must_use]
    pub fn fail_destroy(self, stage: impl Into<String>, reason: impl Into<String>) -> Self {
        self.destroy_failures.lock().insert(stage.into(), reason.into());
        self
    }

    /// Makes apply of `stage` panic.
    #[must_use]
    pub fn panic_on_apply(self, stage: impl Into<String>) -> Self {
        self.apply_panics.lock().insert(stage.into());
        self
    }

    /// Returns every call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProvisionerCall> {
        self.calls.lock().clone()
    }

    /// Returns the stages passed to `apply`, in order.
    #[must_use]
    pub fn applied_stages(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ProvisionerCall::Apply { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the stages passed to `destroy`, in order.
    #[must_use]
    pub fn destroyed_stages(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ProvisionerCall::Destroy { stage } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the inputs of the last apply of `stage`.
    #[must_use]
    pub fn inputs_for(&self, stage: &str) -> Option<BTreeMap<String, VarValue>> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            ProvisionerCall::Apply { stage: s, inputs } if s == stage => Some(inputs.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn apply(
        &self,
        dir: &Path,
        inputs: &BTreeMap<String, VarValue>,
    ) -> Result<StageOutputs, CollaboratorError> {
        let stage = stage_of(dir);
        self.calls.lock().push(ProvisionerCall::Apply {
            stage: stage.clone(),
            inputs: inputs.clone(),
        });

        if self.apply_panics.lock().contains(&stage) {
            panic!("provisioner panicked applying {stage}");
        }
        if let Some(reason) = self.apply_failures.lock().get(&stage) {
            let reason = reason.clone();
            return Err(CollaboratorError::command_failed("terraform", "apply", Some(1), reason));
        }
        Ok(self.outputs.lock().get(&stage).cloned().unwrap_or_default())
    }

    async fn destroy(&self, dir: &Path) -> Result<(), CollaboratorError> {
        let stage = stage_of(dir);
        self.calls.lock().push(ProvisionerCall::Destroy { stage: stage.clone() });

        match self.destroy_failures.lock().get(&stage) {
            Some(reason) => Err(CollaboratorError::command_failed(
                "terraform",
                "destroy",
                Some(1),
                reason.clone(),
            )),
            None => Ok(()),
        }
    }

    async fn output(&self, dir: &Path, name: &str) -> Result<Option<VarValue>, CollaboratorError> {
        let stage = stage_of(dir);
        self.calls.lock().push(ProvisionerCall::Output {
            stage: stage.clone(),
            name: name.to_string(),
        });
        Ok(self.outputs.lock().get(&stage).and_then(|o| o.get(name).cloned()))
    }
}

/// A workspace that hands out paths without touching the filesystem.
#[derive(Debug)]
pub struct InMemoryWorkspace {
    root: PathBuf,
    copies: Mutex<BTreeMap<String, PathBuf>>,
    failing_stages: Mutex<HashSet<String>>,
}

impl Default for InMemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/stagechain-test"),
            copies: Mutex::new(BTreeMap::new()),
            failing_stages: Mutex::new(HashSet::new()),
        }
    }

    /// Pretends a working copy for `key` already exists.
    #[must_use]
    pub fn with_existing(self, key: impl Into<String>) -> Self {
        let key = key.into();
        let dir = self.root.join(&key);
        self.copies.lock().insert(key, dir);
        self
    }

    /// Makes materialization of `stage` fail.
    #[must_use]
    pub fn fail_stage(self, stage: impl Into<String>) -> Self {
        self.failing_stages.lock().insert(stage.into());
        self
    }

    /// Returns every materialized key.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.copies.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn materialize(&self, source: &Path, key: &str) -> Result<PathBuf, CollaboratorError> {
        let dir = self.root.join(key);
        if self.failing_stages.lock().contains(&stage_of(&dir)) {
            return Err(CollaboratorError::Copy {
                source_path: source.to_path_buf(),
                target: dir,
                reason: "template directory does not exist".to_string(),
            });
        }
        self.copies.lock().insert(key.to_string(), dir.clone());
        Ok(dir)
    }

    async fn locate(&self, key: &str) -> Option<PathBuf> {
        self.copies.lock().get(key).cloned()
    }
}

/// An access probe with a fixed answer.
#[derive(Debug, Default)]
pub struct StubAccessProbe {
    failure: Option<String>,
    attempts: Mutex<Vec<(String, String)>>,
}

impl StubAccessProbe {
    /// A probe that always connects.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// A probe that never connects.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Returns the `(host, user)` pairs probed.
    #[must_use]
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl AccessProbe for StubAccessProbe {
    async fn ssh_connect(
        &self,
        host: &str,
        user: &str,
        _private_key: &str,
    ) -> Result<(), CollaboratorError> {
        self.attempts.lock().push((host.to_string(), user.to_string()));
        match &self.failure {
            Some(reason) => Err(CollaboratorError::RetriesExhausted {
                attempts: 30,
                last_error: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// A service-class probe that fails for configured tiers.
#[derive(Debug, Default)]
pub struct StubServiceClassProbe {
    failing_tiers: HashSet<String>,
    checked: Mutex<Vec<ServiceClassSpec>>,
}

impl StubServiceClassProbe {
    /// A probe where every tier schedules.
    #[must_use]
    pub fn passing() -> Self {
        Self::default()
    }

    /// Makes every check on `tier` fail.
    #[must_use]
    pub fn failing_tier(mut self, tier: impl Into<String>) -> Self {
        self.failing_tiers.insert(tier.into());
        self
    }

    /// Returns every spec checked, in order.
    #[must_use]
    pub fn checked(&self) -> Vec<ServiceClassSpec> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl ServiceClassProbe for StubServiceClassProbe {
    async fn check_service_class(
        &self,
        _kubeconfig: &Path,
        spec: &ServiceClassSpec,
    ) -> Result<(), CollaboratorError> {
        self.checked.lock().push(spec.clone());
        if self.failing_tiers.contains(&spec.tier) {
            return Err(CollaboratorError::command_failed(
                "kubectl",
                "rollout",
                Some(1),
                format!("statefulset on {} did not become ready", spec.tier),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_of_key() {
        assert_eq!(stage_of(Path::new("/w/external-network-cluster-abc123")), "cluster");
        assert_eq!(stage_of(Path::new("/w/complete-prerequisites-ab12cd34")), "prerequisites");
        assert_eq!(stage_of(Path::new("/")), "");
    }

    #[tokio::test]
    async fn test_recording_provisioner() {
        let provisioner = RecordingProvisioner::new()
            .with_outputs("cluster", StageOutputs::new().with("bastion_public_ip", "203.0.113.9"))
            .fail_destroy("cluster", "locked");
        let dir = Path::new("/w/complete-cluster-abc");

        let outputs = provisioner.apply(dir, &BTreeMap::new()).await.unwrap();
        assert!(outputs.contains("bastion_public_ip"));
        assert!(provisioner.destroy(dir).await.is_err());
        assert_eq!(
            provisioner.output(dir, "bastion_public_ip").await.unwrap(),
            Some(VarValue::from("203.0.113.9"))
        );
        assert_eq!(provisioner.applied_stages(), vec!["cluster"]);
        assert_eq!(provisioner.destroyed_stages(), vec!["cluster"]);
    }

    #[tokio::test]
    async fn test_in_memory_workspace() {
        let workspace = InMemoryWorkspace::new().fail_stage("network");

        let dir = workspace.materialize(Path::new("/t"), "complete-cluster-abc").await.unwrap();
        assert_eq!(workspace.locate("complete-cluster-abc").await, Some(dir));
        assert!(workspace
            .materialize(Path::new("/t"), "external-network-network-abc")
            .await
            .is_err());
        assert_eq!(workspace.keys(), vec!["complete-cluster-abc"]);
    }
}
