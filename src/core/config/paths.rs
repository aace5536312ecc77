use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "ragchat";

/// Filesystem layout: where config is read from and where logs and the
/// local session database live.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub secrets_path: PathBuf,
}

impl AppPaths {
    /// Resolves directories from `RAGCHAT_ROOT` / `RAGCHAT_DATA_DIR`, falling
    /// back to the working directory and the platform data directory.
    pub fn new() -> Self {
        let lookup = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        let project_root = resolve_project_root(lookup);
        let user_data_dir = resolve_data_dir(&project_root, lookup);
        Self::from_dirs(project_root, user_data_dir)
    }

    /// Builds the layout under explicit directories, creating them if needed.
    pub fn from_dirs(project_root: PathBuf, user_data_dir: PathBuf) -> Self {
        let log_dir = user_data_dir.join("logs");
        if let Err(err) = fs::create_dir_all(&log_dir) {
            tracing::warn!("Could not create {}: {}", log_dir.display(), err);
        }

        AppPaths {
            db_path: user_data_dir.join("ragchat_memory.db"),
            secrets_path: user_data_dir.join("secrets.yaml"),
            log_dir,
            project_root,
            user_data_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_project_root<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = lookup("RAGCHAT_ROOT") {
        return PathBuf::from(root);
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

/// Debug builds keep their data next to the project so a checkout is
/// self-contained.
fn resolve_data_dir<F>(project_root: &Path, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("RAGCHAT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if cfg!(debug_assertions) {
        return project_root.join(".ragchat");
    }

    let home = lookup("HOME")
        .or_else(|| lookup("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    if cfg!(target_os = "windows") {
        let base = lookup("LOCALAPPDATA").map(PathBuf::from).unwrap_or(home);
        return base.join("RagChat");
    }
    if cfg!(target_os = "macos") {
        return home.join("Library/Application Support/RagChat");
    }

    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(".local/share"))
        .join(APP_DIR_NAME)
}
