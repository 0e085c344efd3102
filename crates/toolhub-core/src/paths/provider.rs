//! Filesystem-backed [`SettingsPathProvider`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::RwLock;

use super::{PathError, ensure_directory};
use crate::ports::SettingsPathProvider;

/// Path provider over a fixed settings directory and a swappable workspace root.
#[derive(Debug)]
pub struct FsPathProvider {
    settings_dir: PathBuf,
    workspace_root: RwLock<Option<PathBuf>>,
}

impl FsPathProvider {
    pub fn new(settings_dir: impl Into<PathBuf>, workspace_root: Option<PathBuf>) -> Self {
        Self {
            settings_dir: settings_dir.into(),
            workspace_root: RwLock::new(workspace_root),
        }
    }

    /// Replace the workspace root (opened, switched or closed).
    pub fn set_workspace_root(&self, root: Option<PathBuf>) {
        let mut guard = self
            .workspace_root
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = root;
    }
}

#[async_trait]
impl SettingsPathProvider for FsPathProvider {
    async fn ensure_settings_directory(&self) -> Result<PathBuf, PathError> {
        ensure_directory(&self.settings_dir).await?;
        Ok(self.settings_dir.clone())
    }

    fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_root
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
