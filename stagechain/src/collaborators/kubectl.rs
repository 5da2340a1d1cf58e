//! Service-class probe backed by `kubectl`.

use super::{ServiceClassProbe, ServiceClassSpec, ToolCommand};
use crate::errors::CollaboratorError;
use crate::naming::unique_id;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const WORKLOAD_IMAGE: &str = "busybox:1.36";

/// StatefulSets that exercise one service class, as a Kubernetes `List`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceClassManifest {
    /// Namespace the workloads are created in.
    pub namespace: String,
    /// StatefulSet names, in manifest order.
    pub statefulsets: Vec<String>,
    /// The `List` document passed to `kubectl apply`.
    pub document: Value,
}

impl ServiceClassManifest {
    /// Builds the workloads for `spec`.
    ///
    /// A standalone deployment is one StatefulSet on the tier pool. A
    /// high-availability deployment is a primary and a backup on the tier
    /// pool plus a monitor on the monitoring pool.
    #[must_use]
    pub fn build(spec: &ServiceClassSpec, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let mut statefulsets = Vec::new();
        let mut items = Vec::new();

        for index in 0..spec.replica_count {
            let base = format!("{}-{index}", spec.tier);
            let members: Vec<(String, (&str, &str))> = if spec.high_availability {
                vec![
                    (format!("{base}-primary"), ("serviceClass", spec.tier.as_str())),
                    (format!("{base}-backup"), ("serviceClass", spec.tier.as_str())),
                    (format!("{base}-monitor"), ("nodeType", "monitoring")),
                ]
            } else {
                vec![(base, ("serviceClass", spec.tier.as_str()))]
            };

            for (name, selector) in members {
                items.push(statefulset(&name, &namespace, selector, &spec.storage_class));
                statefulsets.push(name);
            }
        }

        Self {
            namespace,
            statefulsets,
            document: json!({"apiVersion": "v1", "kind": "List", "items": items}),
        }
    }
}

fn statefulset(
    name: &str,
    namespace: &str,
    (key, value): (&str, &str),
    storage_class: &str,
) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {"app.kubernetes.io/managed-by": "stagechain"}
        },
        "spec": {
            "replicas": 1,
            "serviceName": name,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {
                    "nodeSelector": {key: value},
                    "tolerations": [{"key": key, "operator": "Exists", "effect": "NoSchedule"}],
                    "containers": [{
                        "name": "workload",
                        "image": WORKLOAD_IMAGE,
                        "command": ["sh", "-c", "sleep 3600"],
                        "volumeMounts": [{"name": "data", "mountPath": "/data"}]
                    }]
                }
            },
            "volumeClaimTemplates": [{
                "metadata": {"name": "data"},
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "storageClassName": storage_class,
                    "resources": {"requests": {"storage": "1Gi"}}
                }
            }]
        }
    })
}

/// Deploys service-class workloads into a throwaway namespace.
#[derive(Debug, Clone)]
pub struct KubectlServiceClassProbe {
    binary: String,
    rollout_timeout: Duration,
}

impl Default for KubectlServiceClassProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl KubectlServiceClassProbe {
    /// Creates a probe using `kubectl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "kubectl".to_string(),
            rollout_timeout: Duration::from_secs(600),
        }
    }

    /// Uses a different kubectl binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets how long each StatefulSet may take to become ready.
    #[must_use]
    pub fn with_rollout_timeout(mut self, timeout: Duration) -> Self {
        self.rollout_timeout = timeout;
        self
    }

    fn kubectl(&self, kubeconfig: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary)
            .arg("--kubeconfig")
            .arg(kubeconfig.to_string_lossy())
    }

    async fn deploy_and_wait(
        &self,
        kubeconfig: &Path,
        manifest: &ServiceClassManifest,
    ) -> Result<(), CollaboratorError> {
        let document = serde_json::to_vec(&manifest.document)
            .map_err(|e| CollaboratorError::invalid_output("kubectl", e.to_string()))?;
        self.kubectl(kubeconfig)
            .args(["apply", "-n", manifest.namespace.as_str(), "-f", "-"])
            .stdin(document)
            .run()
            .await?;

        let timeout = format!("--timeout={}s", self.rollout_timeout.as_secs());
        for name in &manifest.statefulsets {
            self.kubectl(kubeconfig)
                .args(["rollout", "status", "-n", manifest.namespace.as_str()])
                .arg(format!("statefulset/{name}"))
                .arg(&timeout)
                .timeout(self.rollout_timeout + Duration::from_secs(30))
                .run()
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceClassProbe for KubectlServiceClassProbe {
    async fn check_service_class(
        &self,
        kubeconfig: &Path,
        spec: &ServiceClassSpec,
    ) -> Result<(), CollaboratorError> {
        let namespace = format!("stagechain-{}-{}", spec.tier, unique_id(6));
        let manifest = ServiceClassManifest::build(spec, &namespace);

        info!(
            tier = %spec.tier,
            namespace = %namespace,
            statefulsets = manifest.statefulsets.len(),
            "deploying service class workload"
        );

        self.kubectl(kubeconfig)
            .args(["create", "namespace", namespace.as_str()])
            .run()
            .await?;

        let result = self.deploy_and_wait(kubeconfig, &manifest).await;

        let cleanup = self
            .kubectl(kubeconfig)
            .args(["delete", "namespace", namespace.as_str(), "--wait=false", "--ignore-not-found"])
            .run()
            .await;
        if let Err(e) = cleanup {
            warn!(namespace = %namespace, error = %e, "failed to delete check namespace");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standalone_manifest() {
        let spec = ServiceClassSpec::standalone("prod10k", "ssd", 2);
        let manifest = ServiceClassManifest::build(&spec, "ns");

        assert_eq!(manifest.statefulsets, vec!["prod10k-0", "prod10k-1"]);
        let items = manifest.document["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0]["spec"]["template"]["spec"]["nodeSelector"],
            json!({"serviceClass": "prod10k"})
        );
        assert_eq!(
            items[1]["spec"]["volumeClaimTemplates"][0]["spec"]["storageClassName"],
            "ssd"
        );
        assert_eq!(items[0]["metadata"]["namespace"], "ns");
    }

    #[test]
    fn test_high_availability_manifest() {
        let spec = ServiceClassSpec::high_availability("prod1k", "ssd", 1);
        let manifest = ServiceClassManifest::build(&spec, "ns");

        assert_eq!(
            manifest.statefulsets,
            vec!["prod1k-0-primary", "prod1k-0-backup", "prod1k-0-monitor"]
        );
        let items = manifest.document["items"].as_array().unwrap();
        assert_eq!(
            items[2]["spec"]["template"]["spec"]["nodeSelector"],
            json!({"nodeType": "monitoring"})
        );
        assert_eq!(
            items[1]["spec"]["template"]["spec"]["nodeSelector"],
            json!({"serviceClass": "prod1k"})
        );
    }

    #[cfg(unix)]
    fn fake_kubectl(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-kubectl");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_namespace_deleted_after_failed_rollout() {
        let bin = tempfile::TempDir::new().unwrap();
        let log = bin.path().join("calls.log");
        let binary = fake_kubectl(
            bin.path(),
            &format!(
                "echo \"$3 $4\" >> {}\nif [ \"$3\" = \"rollout\" ]; then exit 1; fi\ncat > /dev/null",
                log.display()
            ),
        );

        let probe = KubectlServiceClassProbe::new().with_binary(binary);
        let err = probe
            .check_service_class(
                Path::new("/tmp/kubeconfig"),
                &ServiceClassSpec::standalone("prod1k", "ssd", 1),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::CommandFailed { .. }));
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            calls.lines().collect::<Vec<_>>(),
            vec!["create namespace", "apply -n", "rollout status", "delete namespace"]
        );
    }
}
