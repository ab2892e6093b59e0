use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    /// Where per-user workout logs live.
    pub fn data_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("sets")
                .join("user_data")
        } else {
            ProjectDirs::from("", "", "sets")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("user_data"))
                .unwrap_or_else(|| PathBuf::from("user_data"))
        }
    }
}
