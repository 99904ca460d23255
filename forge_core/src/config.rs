use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Worker configuration, loaded once at startup from a YAML file.
/// Every field has a default so a partial (or empty) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub judge_token: String,
    /// Delay between empty task polls, in milliseconds.
    #[serde(default = "default_delay")]
    pub delay: u64,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(default = "default_testdata_dir")]
    pub testdata_dir: PathBuf,
    /// Global floor for the output size limit, in bytes. A language's
    /// own minimum can only raise it.
    #[serde(default = "default_output_limit")]
    pub output_limit: u64,
    /// Wall-clock budget for one toolchain invocation, in milliseconds.
    #[serde(default = "default_compile_time_limit")]
    pub compile_time_limit: u64,
    /// Limits for a compiled special-judge run.
    #[serde(default = "default_spj_time_limit")]
    pub spj_time_limit: u64,
    #[serde(default = "default_spj_memory_limit")]
    pub spj_memory_limit: u64,
    /// Operation budget for the legacy in-process checker.
    #[serde(default = "default_spj_operation_limit")]
    pub spj_operation_limit: u64,
    #[serde(default = "default_spj_message_limit")]
    pub spj_message_limit: usize,
    /// Unprivileged identity everything untrusted drops to.
    #[serde(default = "default_run_uid")]
    pub run_uid: u32,
    #[serde(default = "default_run_gid")]
    pub run_gid: u32,
    /// Override for the cell binary; defaults to `forge_cell` next to
    /// the worker executable.
    #[serde(default)]
    pub cell_path: Option<PathBuf>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:5283".into()
}

fn default_delay() -> u64 {
    200
}

fn default_tmp_dir() -> PathBuf {
    "/tmp".into()
}

fn default_testdata_dir() -> PathBuf {
    "testdata".into()
}

fn default_output_limit() -> u64 {
    10 * 1024 * 1024
}

fn default_compile_time_limit() -> u64 {
    5000
}

fn default_spj_time_limit() -> u64 {
    10_000
}

// KB
fn default_spj_memory_limit() -> u64 {
    256 * 1024
}

fn default_spj_operation_limit() -> u64 {
    10_000_000
}

fn default_spj_message_limit() -> usize {
    1024
}

// nobody/nogroup
fn default_run_uid() -> u32 {
    65534
}

fn default_run_gid() -> u32 {
    65534
}

impl Default for JudgeConfig {
    fn default() -> Self {
        // the empty document takes every field default
        serde_yaml::from_str("{}").unwrap()
    }
}

impl JudgeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = JudgeConfig::default();
        assert_eq!(config.compile_time_limit, 5000);
        assert_eq!(config.run_uid, 65534);
        assert_eq!(config.tmp_dir, PathBuf::from("/tmp"));
        assert!(config.cell_path.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: JudgeConfig =
            serde_yaml::from_str("server_url: http://judge.example\ndelay: 500\n").unwrap();
        assert_eq!(config.server_url, "http://judge.example");
        assert_eq!(config.delay, 500);
        assert_eq!(config.spj_message_limit, 1024);
    }
}
