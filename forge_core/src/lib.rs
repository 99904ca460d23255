pub mod checker;
pub mod compare;
pub mod compile;
pub mod config;
pub mod error;
pub mod judge;
pub mod lang;
pub mod probe;
pub mod sandbox;
pub mod task;
pub mod testdata;

use std::fmt;

use serde::{Serialize, Serializer};

/// The status vocabulary a contestant can ultimately see, plus the
/// transient states published while a task is in flight. Serialized
/// as the wire strings the judge frontend expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JudgeStatus {
    Waiting,
    Compiling,
    /// `subtask` is only carried when the task has more than one subtask.
    Running {
        subtask: Option<usize>,
        case: usize,
    },
    CompileError,
    Accepted,
    WrongAnswer,
    PartiallyCorrect,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
    FileError,
    JudgementFailed,
    NoTestdata,
    SystemError,
}

impl fmt::Display for JudgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JudgeStatus::Waiting => write!(f, "Waiting"),
            JudgeStatus::Compiling => write!(f, "Compiling"),
            JudgeStatus::Running {
                subtask: Some(s),
                case,
            } => write!(f, "Running on #{}.{}", s, case),
            JudgeStatus::Running {
                subtask: None,
                case,
            } => write!(f, "Running on #{}", case),
            JudgeStatus::CompileError => write!(f, "Compile Error"),
            JudgeStatus::Accepted => write!(f, "Accepted"),
            JudgeStatus::WrongAnswer => write!(f, "Wrong Answer"),
            JudgeStatus::PartiallyCorrect => write!(f, "Partially Correct"),
            JudgeStatus::TimeLimitExceeded => write!(f, "Time Limit Exceeded"),
            JudgeStatus::MemoryLimitExceeded => write!(f, "Memory Limit Exceeded"),
            JudgeStatus::OutputLimitExceeded => write!(f, "Output Limit Exceeded"),
            JudgeStatus::RuntimeError => write!(f, "Runtime Error"),
            JudgeStatus::FileError => write!(f, "File Error"),
            JudgeStatus::JudgementFailed => write!(f, "Judgement Failed"),
            JudgeStatus::NoTestdata => write!(f, "No Testdata"),
            JudgeStatus::SystemError => write!(f, "System Error"),
        }
    }
}

impl Serialize for JudgeStatus {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
