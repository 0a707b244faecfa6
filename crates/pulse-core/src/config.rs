use std::path::PathBuf;

/// Static configuration surfaced in system views. Read-only after startup.
#[derive(Clone, Debug)]
pub struct StaticConfig {
    pub default_model: String,
    pub max_sessions: usize,
    pub storage_path: PathBuf,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-5-20250929".to_string(),
            max_sessions: 16,
            storage_path: home_dir().join(".pulse"),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
