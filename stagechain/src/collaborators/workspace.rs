//! Directory-backed working copies.

use super::Workspace;
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Materializes working copies as directories under a root.
#[derive(Debug, Clone)]
pub struct DirWorkspace {
    root: PathBuf,
}

impl DirWorkspace {
    /// Creates a workspace rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

/// Returns true if a template entry belongs in a working copy.
///
/// Hidden entries (including `.terraform/`) and state files are left behind.
#[must_use]
pub fn is_template_file(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !name.starts_with('.') && !name.contains(".tfstate")
}

fn copy_tree(source: &Path, target: &Path) -> Result<usize, CollaboratorError> {
    let copy_error = |reason: String| CollaboratorError::Copy {
        source_path: source.to_path_buf(),
        target: target.to_path_buf(),
        reason,
    };

    if !source.is_dir() {
        return Err(copy_error("template directory does not exist".to_string()));
    }
    fs::create_dir_all(target).map_err(|e| copy_error(e.to_string()))?;

    let mut copied = 0;
    for entry in WalkDir::new(source).into_iter().filter_entry(is_template_file) {
        let entry = entry.map_err(|e| copy_error(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| copy_error(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination).map_err(|e| copy_error(e.to_string()))?;
        } else {
            fs::copy(entry.path(), &destination).map_err(|e| copy_error(e.to_string()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl Workspace for DirWorkspace {
    async fn materialize(&self, source: &Path, key: &str) -> Result<PathBuf, CollaboratorError> {
        let target = self.target_for(key);
        let (from, to) = (source.to_path_buf(), target.clone());

        let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| CollaboratorError::Copy {
                source_path: source.to_path_buf(),
                target: target.clone(),
                reason: e.to_string(),
            })??;

        debug!(key, files = copied, target = %target.display(), "materialized working copy");
        Ok(target)
    }

    async fn locate(&self, key: &str) -> Option<PathBuf> {
        let target = self.target_for(key);
        target.is_dir().then_some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn template() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.tf"), "resource \"null_resource\" \"x\" {}").unwrap();
        fs::create_dir_all(dir.path().join("modules/net")).unwrap();
        fs::write(dir.path().join("modules/net/main.tf"), "").unwrap();
        fs::create_dir_all(dir.path().join(".terraform/providers")).unwrap();
        fs::write(dir.path().join(".terraform/providers/blob"), "x").unwrap();
        fs::write(dir.path().join("terraform.tfstate"), "{}").unwrap();
        fs::write(dir.path().join("terraform.tfstate.backup"), "{}").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_materialize_copies_template_files_only() {
        let source = template();
        let root = TempDir::new().unwrap();
        let workspace = DirWorkspace::new(root.path());

        let copy = workspace
            .materialize(source.path(), "complete-cluster-abc")
            .await
            .unwrap();

        assert_eq!(copy, root.path().join("complete-cluster-abc"));
        assert!(copy.join("main.tf").is_file());
        assert!(copy.join("modules/net/main.tf").is_file());
        assert!(!copy.join(".terraform").exists());
        assert!(!copy.join("terraform.tfstate").exists());
        assert!(!copy.join("terraform.tfstate.backup").exists());
        assert!(source.path().join("terraform.tfstate").exists());
    }

    #[tokio::test]
    async fn test_materialize_preserves_existing_state() {
        let source = template();
        let root = TempDir::new().unwrap();
        let workspace = DirWorkspace::new(root.path());

        let copy = workspace.materialize(source.path(), "k").await.unwrap();
        fs::write(copy.join("terraform.tfstate"), "{\"serial\": 9}").unwrap();
        fs::write(source.path().join("main.tf"), "# updated").unwrap();

        let again = workspace.materialize(source.path(), "k").await.unwrap();

        assert_eq!(fs::read_to_string(again.join("terraform.tfstate")).unwrap(), "{\"serial\": 9}");
        assert_eq!(fs::read_to_string(again.join("main.tf")).unwrap(), "# updated");
    }

    #[tokio::test]
    async fn test_distinct_keys_are_isolated() {
        let source = template();
        let root = TempDir::new().unwrap();
        let workspace = DirWorkspace::new(root.path());

        let a = workspace.materialize(source.path(), "a").await.unwrap();
        let b = workspace.materialize(source.path(), "b").await.unwrap();
        fs::write(a.join("terraform.tfstate"), "a").unwrap();

        assert_ne!(a, b);
        assert!(!b.join("terraform.tfstate").exists());
    }

    #[tokio::test]
    async fn test_missing_template() {
        let root = TempDir::new().unwrap();
        let workspace = DirWorkspace::new(root.path());

        let err = workspace
            .materialize(&root.path().join("nope"), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Copy { .. }));
    }

    #[tokio::test]
    async fn test_locate() {
        let source = template();
        let root = TempDir::new().unwrap();
        let workspace = DirWorkspace::new(root.path());

        assert!(workspace.locate("k").await.is_none());
        workspace.materialize(source.path(), "k").await.unwrap();
        assert_eq!(workspace.locate("k").await, Some(root.path().join("k")));
    }
}
