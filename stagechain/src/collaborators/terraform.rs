//! Terraform CLI provisioner.

use super::{Provisioner, ToolCommand};
use crate::core::{StageOutputs, VarValue};
use crate::errors::CollaboratorError;
use crate::pipeline::{with_retry_if, RetryConfig, RetryableErrors};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Name of the var-file written into each working copy.
pub const VAR_FILE_NAME: &str = "stagechain.tfvars.json";

const PROGRAM: &str = "terraform";

/// Drives `terraform` in a working copy.
///
/// Inputs go through a JSON var-file instead of `-var` flags so lists and
/// maps keep their types. Every command is retried on the transient error
/// classes in [`RetryableErrors`].
#[derive(Debug, Clone)]
pub struct TerraformProvisioner {
    binary: String,
    retry: RetryConfig,
    retryable: RetryableErrors,
    envs: Vec<(String, String)>,
}

impl Default for TerraformProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl TerraformProvisioner {
    /// Creates a provisioner using `terraform` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PROGRAM.to_string(),
            retry: RetryConfig::terraform(),
            retryable: RetryableErrors::terraform_defaults(),
            envs: vec![("TF_IN_AUTOMATION".to_string(), "1".to_string())],
        }
    }

    /// Uses a different terraform binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Passes an environment variable to every terraform invocation.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self, dir: &Path, args: &[&str]) -> ToolCommand {
        self.envs.iter().fold(
            ToolCommand::new(&self.binary).current_dir(dir).args(args.iter().copied()),
            |cmd, (key, value)| cmd.env(key, value),
        )
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, CollaboratorError> {
        let command = self.command(dir, args);
        let cmd = &command;
        let key = format!("terraform {}", command.subcommand());

        with_retry_if(
            &self.retry,
            &key,
            |e: &CollaboratorError| self.retryable.is_retryable(&e.diagnostic_text()),
            move || cmd.run(),
        )
        .await
        .map_err(|(error, attempts)| {
            if attempts > 1 {
                CollaboratorError::RetriesExhausted {
                    attempts,
                    last_error: error.to_string(),
                }
            } else {
                error
            }
        })
    }

    async fn write_var_file(
        dir: &Path,
        inputs: &BTreeMap<String, VarValue>,
    ) -> Result<(), CollaboratorError> {
        let json = serde_json::to_vec_pretty(inputs)
            .map_err(|e| CollaboratorError::invalid_output(PROGRAM, e.to_string()))?;
        tokio::fs::write(dir.join(VAR_FILE_NAME), json).await?;
        Ok(())
    }
}

/// Parses `terraform output -json` into stage outputs.
///
/// Outputs whose value is `null` are treated as not produced.
///
/// # Errors
///
/// Returns `InvalidOutput` if the text is not a JSON object of output blocks.
pub fn parse_output_json(text: &str) -> Result<StageOutputs, CollaboratorError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(StageOutputs::new());
    }

    let blocks: BTreeMap<String, serde_json::Value> = serde_json::from_str(trimmed)
        .map_err(|e| CollaboratorError::invalid_output(PROGRAM, format!("output -json: {e}")))?;

    Ok(blocks
        .into_iter()
        .filter_map(|(name, mut block)| {
            let value = block.get_mut("value").map(serde_json::Value::take)?;
            VarValue::from_json(value).map(|v| (name, v))
        })
        .collect())
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn apply(
        &self,
        dir: &Path,
        inputs: &BTreeMap<String, VarValue>,
    ) -> Result<StageOutputs, CollaboratorError> {
        Self::write_var_file(dir, inputs).await?;
        let var_file = format!("-var-file={VAR_FILE_NAME}");

        info!(dir = %dir.display(), inputs = inputs.len(), "terraform init and apply");
        self.run(dir, &["init", "-upgrade", "-input=false", "-no-color"]).await?;
        self.run(
            dir,
            &["apply", "-auto-approve", "-input=false", "-no-color", &var_file],
        )
        .await?;

        let outputs = parse_output_json(&self.run(dir, &["output", "-json", "-no-color"]).await?)?;
        debug!(
            dir = %dir.display(),
            outputs = ?outputs.names().collect::<Vec<_>>(),
            "captured outputs"
        );
        Ok(outputs)
    }

    async fn destroy(&self, dir: &Path) -> Result<(), CollaboratorError> {
        info!(dir = %dir.display(), "terraform destroy");
        self.run(dir, &["init", "-input=false", "-no-color"]).await?;

        let mut args = vec!["destroy", "-auto-approve", "-input=false", "-no-color"];
        let var_file = format!("-var-file={VAR_FILE_NAME}");
        if tokio::fs::try_exists(dir.join(VAR_FILE_NAME)).await? {
            args.push(&var_file);
        }
        self.run(dir, &args).await?;
        Ok(())
    }

    async fn output(&self, dir: &Path, name: &str) -> Result<Option<VarValue>, CollaboratorError> {
        match self.run(dir, &["output", "-json", "-no-color", name]).await {
            Ok(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    CollaboratorError::invalid_output(PROGRAM, format!("output {name}: {e}"))
                })?;
                Ok(VarValue::from_json(value))
            }
            Err(CollaboratorError::CommandFailed { stderr, .. })
                if stderr.contains("not found") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_output_json() {
        let text = r#"{
            "bastion_public_ip": {"sensitive": false, "type": "string", "value": "203.0.113.9"},
            "bastion_ssh_private_key": {"sensitive": true, "type": "string", "value": "-----BEGIN"},
            "node_pools": {"sensitive": false, "type": ["list", "string"], "value": ["prod1k", "prod10k"]},
            "unset": {"sensitive": false, "type": "string", "value": null}
        }"#;

        let outputs = parse_output_json(text).unwrap();

        assert_eq!(
            outputs.names().collect::<Vec<_>>(),
            vec!["bastion_public_ip", "bastion_ssh_private_key", "node_pools"]
        );
        assert_eq!(
            outputs.get("node_pools"),
            Some(&VarValue::from(vec!["prod1k".to_string(), "prod10k".to_string()]))
        );
    }

    #[test]
    fn test_parse_output_json_empty_and_invalid() {
        assert!(parse_output_json("").unwrap().is_empty());
        assert!(parse_output_json("{}").unwrap().is_empty());
        assert!(matches!(
            parse_output_json("Warning: no outputs"),
            Err(CollaboratorError::InvalidOutput { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_var_file_keeps_types() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut inputs = BTreeMap::new();
        inputs.insert("create_bastion".to_string(), VarValue::from(false));
        inputs.insert("max_pods_per_node_system".to_string(), VarValue::from(110_i64));
        inputs.insert(
            "kubernetes_api_authorized_networks".to_string(),
            VarValue::from(vec!["198.51.100.4/32".to_string()]),
        );

        TerraformProvisioner::write_var_file(dir.path(), &inputs).await.unwrap();

        let raw = std::fs::read(dir.path().join(VAR_FILE_NAME)).unwrap();
        let written: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            written,
            serde_json::json!({
                "create_bastion": false,
                "kubernetes_api_authorized_networks": ["198.51.100.4/32"],
                "max_pods_per_node_system": 110
            })
        );
    }

    #[cfg(unix)]
    fn fake_terraform(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-terraform");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_runs_init_apply_output() {
        let bin = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let binary = fake_terraform(
            bin.path(),
            r#"echo "$1" >> calls.log
if [ "$1" = "output" ]; then
  echo '{"local_cidr": {"sensitive": false, "type": "string", "value": "198.51.100.4/32"}}'
fi"#,
        );

        let provisioner = TerraformProvisioner::new()
            .with_binary(binary)
            .with_retry(RetryConfig::none());
        let outputs = provisioner.apply(work.path(), &BTreeMap::new()).await.unwrap();

        assert_eq!(outputs.get("local_cidr"), Some(&VarValue::from("198.51.100.4/32")));
        let calls = std::fs::read_to_string(work.path().join("calls.log")).unwrap();
        assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["init", "apply", "output"]);
        assert!(work.path().join(VAR_FILE_NAME).is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let bin = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let binary = fake_terraform(
            bin.path(),
            r#"if [ "$1" = "init" ] && [ ! -f attempted ]; then
  touch attempted
  echo "Error: read: connection reset by peer" >&2
  exit 1
fi
echo "$1" >> calls.log"#,
        );

        let provisioner = TerraformProvisioner::new()
            .with_binary(binary)
            .with_retry(RetryConfig::terraform().with_delay_ms(1));
        provisioner.destroy(work.path()).await.unwrap();

        let calls = std::fs::read_to_string(work.path().join("calls.log")).unwrap();
        assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["init", "destroy"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let bin = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let binary = fake_terraform(
            bin.path(),
            r#"echo "$1" >> calls.log
echo "Error: Invalid value for variable" >&2
exit 1"#,
        );

        let provisioner = TerraformProvisioner::new()
            .with_binary(binary)
            .with_retry(RetryConfig::terraform().with_delay_ms(1));
        let err = provisioner.apply(work.path(), &BTreeMap::new()).await.unwrap_err();

        assert!(matches!(err, CollaboratorError::CommandFailed { .. }));
        let calls = std::fs::read_to_string(work.path().join("calls.log")).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_not_found_is_none() {
        let bin = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let binary = fake_terraform(
            bin.path(),
            r#"echo "Error: Output \"$4\" not found" >&2
exit 1"#,
        );

        let provisioner = TerraformProvisioner::new()
            .with_binary(binary)
            .with_retry(RetryConfig::none());
        assert_eq!(provisioner.output(work.path(), "kubeconfig").await.unwrap(), None);
    }
}
