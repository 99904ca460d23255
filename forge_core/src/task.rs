use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::JudgeStatus;

/// One judging job as pulled from the task queue. Immutable input to
/// a single judging run.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub judge_id: u64,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub testdata: String,
    /// ms
    pub time_limit: u64,
    /// KB
    pub memory_limit: u64,
    #[serde(default)]
    pub file_io: bool,
    #[serde(default)]
    pub file_io_input_name: Option<String>,
    #[serde(default)]
    pub file_io_output_name: Option<String>,
}

impl Task {
    pub fn input_name(&self) -> &str {
        self.file_io_input_name.as_deref().unwrap_or("data.in")
    }

    pub fn output_name(&self) -> &str {
        self.file_io_output_name.as_deref().unwrap_or("data.out")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub status: JudgeStatus,
    /// ms
    pub time_used: u64,
    /// KB
    pub memory_used: u64,
    pub input: String,
    pub user_out: String,
    pub answer: String,
    /// Raw case score in [0, 100], before subtask weighting.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spj_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskResult {
    pub case_num: usize,
    pub status: JudgeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub cases: Vec<CaseResult>,
    pub pending: bool,
}

/// The progressive result record. Filled in order, published after
/// every state transition, finalized with `pending = false`.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeResult {
    pub status: JudgeStatus,
    pub score: u64,
    pub total_time: u64,
    pub max_memory: u64,
    pub case_num: usize,
    pub compiler_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<SubtaskResult>>,
    pub pending: bool,
}

impl JudgeResult {
    pub fn new() -> Self {
        Self {
            status: JudgeStatus::Waiting,
            score: 0,
            total_time: 0,
            max_memory: 0,
            case_num: 0,
            compiler_output: String::new(),
            subtasks: None,
            pending: true,
        }
    }
}

impl Default for JudgeResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Echo limit for the per-case input/output excerpts.
pub const ECHO_LIMIT: usize = 120;

/// Reads at most `max_len` characters of a file for diagnostics,
/// appending `...` when the content was cut.
pub fn shorter_read(path: &Path, max_len: usize) -> Result<String> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; max_len + 1];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);
    let s = String::from_utf8_lossy(&buf);
    Ok(shorter(&s, max_len))
}

/// Truncates a string to `max_len` characters, appending `...` when cut.
pub fn shorter(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let mut t: String = s.chars().take(max_len).collect();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn shorter_keeps_short_strings() {
        assert_eq!(shorter("1 2 3", 120), "1 2 3");
    }

    #[test]
    fn shorter_truncates() {
        let long = "x".repeat(200);
        let t = shorter(&long, 120);
        assert_eq!(t.len(), 123);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn shorter_read_truncates_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "{}", "y".repeat(500))?;
        let echo = shorter_read(file.path(), ECHO_LIMIT)?;
        assert_eq!(echo.len(), ECHO_LIMIT + 3);
        assert!(echo.ends_with("..."));
        Ok(())
    }

    #[test]
    fn task_defaults() {
        let task: Task = serde_json::from_str(
            r#"{"judge_id": 7, "language": "cpp", "code": "", "testdata": "p1",
                "time_limit": 1000, "memory_limit": 262144}"#,
        )
        .unwrap();
        assert!(!task.file_io);
        assert_eq!(task.input_name(), "data.in");
        assert_eq!(task.output_name(), "data.out");
    }

    #[test]
    fn result_wire_shape() {
        let mut result = JudgeResult::new();
        result.status = JudgeStatus::Accepted;
        result.score = 100;
        result.pending = false;
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["status"], "Accepted");
        assert_eq!(v["score"], 100);
        assert_eq!(v["pending"], false);
        // absent subtasks are omitted, not null
        assert!(v.get("subtasks").is_none());
    }
}
