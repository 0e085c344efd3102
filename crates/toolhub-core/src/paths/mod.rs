//! Settings file locations.
//!
//! The global scope lives in a user-level settings directory; the project
//! scope lives in a marker directory under the workspace root.

mod ensure;
mod error;
mod provider;

pub use ensure::ensure_directory;
pub use error::PathError;
pub use provider::FsPathProvider;

use std::path::{Path, PathBuf};

/// File name of the global settings file inside the settings directory.
pub const GLOBAL_SETTINGS_FILE: &str = "mcp_settings.json";

/// Marker directory under the workspace root.
pub const PROJECT_CONFIG_DIR: &str = ".toolhub";

/// File name of the project config inside [`PROJECT_CONFIG_DIR`].
pub const PROJECT_CONFIG_FILE: &str = "mcp.json";

const APP_DIR_NAME: &str = "toolhub";

pub fn global_settings_path(settings_dir: &Path) -> PathBuf {
    settings_dir.join(GLOBAL_SETTINGS_FILE)
}

pub fn project_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root
        .join(PROJECT_CONFIG_DIR)
        .join(PROJECT_CONFIG_FILE)
}

/// Default user-level settings directory (`<config dir>/toolhub/settings`).
pub fn default_settings_dir() -> Result<PathBuf, PathError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join("settings"))
        .ok_or(PathError::NoConfigDir)
}
