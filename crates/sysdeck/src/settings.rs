use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysdeck_exec::TimeoutPolicy;
use sysdeck_platform::AppPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_mutate_timeout")]
    pub mutate_timeout_secs: u64,

    #[serde(default = "default_termination_grace")]
    pub termination_grace_secs: u64,

    #[serde(default = "default_kernel_keep_count")]
    pub kernel_keep_count: usize,

    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_read_timeout() -> u64 {
    30
}

fn default_mutate_timeout() -> u64 {
    600
}

fn default_termination_grace() -> u64 {
    5
}

fn default_kernel_keep_count() -> usize {
    2
}

fn default_log_lines() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            read_timeout_secs: default_read_timeout(),
            mutate_timeout_secs: default_mutate_timeout(),
            termination_grace_secs: default_termination_grace(),
            kernel_keep_count: default_kernel_keep_count(),
            log_lines: default_log_lines(),
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        let Ok(paths) = AppPaths::new() else {
            return Self::default();
        };
        Self::load_from(&paths.settings_file())
    }

    /// Missing or malformed files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            read: Duration::from_secs(self.read_timeout_secs),
            mutate: Duration::from_secs(self.mutate_timeout_secs),
            grace: Duration::from_secs(self.termination_grace_secs),
        }
    }
}
