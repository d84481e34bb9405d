//! Path utilities for seneca
//!
//! Handles XDG Base Directory compliance for config and state, and the
//! well-known per-user registry directory in which orchestrator instances
//! publish their descriptor records.

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};

/// Application identifier for XDG directories
const APP_NAME: &str = "seneca";

/// Directory name the orchestrator uses under the user's home
const ORCHESTRATOR_DIR: &str = ".marcus";

/// Registry subdirectory holding one descriptor per running instance
const SERVICES_DIR: &str = "services";

/// Get project directories
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the instance registry directory
///
/// Location: `~/.marcus/services` (`%APPDATA%\.marcus\services` on Windows),
/// or `<tmp>/.marcus/services` when no writable home directory exists.
pub fn registry_dir() -> PathBuf {
    registry_base()
        .filter(|base| is_writable_dir(base))
        .unwrap_or_else(std::env::temp_dir)
        .join(ORCHESTRATOR_DIR)
        .join(SERVICES_DIR)
}

#[cfg(windows)]
fn registry_base() -> Option<PathBuf> {
    std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .or_else(|| BaseDirs::new().map(|b| b.home_dir().to_path_buf()))
}

#[cfg(not(windows))]
fn registry_base() -> Option<PathBuf> {
    BaseDirs::new().map(|b| b.home_dir().to_path_buf())
}

/// Check that a directory exists and is not read-only
fn is_writable_dir(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/seneca` or `~/.config/seneca`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(fallback_config_dir)
}

/// Get the main configuration file path
///
/// Location: `$XDG_CONFIG_HOME/seneca/config.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/seneca` or `~/.local/state/seneca`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/seneca/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Get the default directory of orchestrator conversation logs used for backfill
///
/// Location: `$XDG_STATE_HOME/seneca/conversations`
pub fn conversation_log_dir() -> PathBuf {
    state_dir().join("conversations")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

// Fallback implementations when ProjectDirs is unavailable

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}
