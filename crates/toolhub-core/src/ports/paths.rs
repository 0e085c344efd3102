//! Settings path provider port.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::paths::PathError;

/// Resolves where each scope's settings live.
///
/// The hub asks again on every read, so implementations may change their
/// answer over time (a workspace being opened or closed).
#[async_trait]
pub trait SettingsPathProvider: Send + Sync {
    /// Return the user-level settings directory, creating it if needed.
    async fn ensure_settings_directory(&self) -> Result<PathBuf, PathError>;

    /// Root of the currently open workspace, if any.
    fn workspace_root(&self) -> Option<PathBuf>;
}
