use std::fs;
use std::path::Path;

use log::debug;
use rhai::{Engine, Scope};

use crate::compile::{self, CompileResult};
use crate::config::JudgeConfig;
use crate::error::Result;
use crate::lang::{self, ResourceFloors};
use crate::sandbox::{RunOptions, RunStatus, Sandbox};
use crate::task::shorter;

/// Outcome of one custom-checker invocation. A broken checker yields
/// `success = false`; it never aborts the judging run.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub success: bool,
    pub score: f64,
    pub message: String,
}

impl ScoreResult {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            score: 0.0,
            message,
        }
    }
}

/// The checker selected for one task, probed once and reused for
/// every case.
#[derive(Debug, Clone)]
pub enum Checker {
    /// A native checker program, compiled once per task.
    Compiled {
        compiled: CompileResult,
        floors: ResourceFloors,
    },
    /// The legacy in-process protocol: an interpreted script run on a
    /// restricted engine instead of the OS-level sandbox.
    Legacy { script: String },
    /// A checker package that could not be prepared. Replayed as a
    /// failure on every case; a broken checker never aborts the task.
    Broken { message: String },
}

pub const LEGACY_CHECKER_NAME: &str = "spj.rhai";

/// Probes a test-data directory for a checker. `spj_<lang>.<ext>`
/// selects the compiled protocol (and compiles it right away, so the
/// cost is paid once); the legacy script name selects the in-process
/// protocol. `None` means exact-diff judging.
pub fn discover(
    config: &JudgeConfig,
    scratch: &Path,
    testdata_dir: &Path,
) -> Result<Option<Checker>> {
    for id in lang::LANGUAGE_IDS {
        let language = lang::find(id)?;
        let source_path = testdata_dir.join(language.filename(&format!("spj_{}", id)));
        if !source_path.is_file() {
            continue;
        }
        debug!("compiling special judge {:?}", source_path);
        let source = fs::read_to_string(&source_path)?;
        let compiled = compile::compile(config, scratch, &source, language.as_ref())?;
        return Ok(Some(Checker::Compiled {
            compiled,
            floors: language.floors(),
        }));
    }

    let legacy_path = testdata_dir.join(LEGACY_CHECKER_NAME);
    if legacy_path.is_file() {
        let script = fs::read_to_string(&legacy_path)?;
        return Ok(Some(Checker::Legacy { script }));
    }

    Ok(None)
}

/// `discover` with its faults contained: an unreadable or
/// uncompilable checker package becomes a checker that fails every
/// case with the diagnostic, keeping the task itself alive.
pub fn discover_contained(
    config: &JudgeConfig,
    scratch: &Path,
    testdata_dir: &Path,
) -> Option<Checker> {
    match discover(config, scratch, testdata_dir) {
        Ok(found) => found,
        Err(e) => Some(Checker::Broken {
            message: format!("Special Judge unavailable: {}", e),
        }),
    }
}

/// Runs the task's checker against one case. Every fault inside the
/// checker is folded into the returned `ScoreResult`.
pub fn run(
    config: &JudgeConfig,
    sandbox: &mut Sandbox,
    checker: &Checker,
    input: &Path,
    user_out: &Path,
    answer: &Path,
    code: &str,
) -> ScoreResult {
    let result = match checker {
        Checker::Compiled { compiled, floors } => {
            run_compiled(config, sandbox, compiled, *floors, input, user_out, answer, code)
        }
        Checker::Legacy { script } => run_legacy(config, script, input, user_out, answer, code),
        Checker::Broken { message } => Ok(ScoreResult::failure(message.clone())),
    };
    match result {
        Ok(mut score) => {
            score.message = shorter(&score.message, config.spj_message_limit);
            score
        }
        Err(e) => ScoreResult::failure(format!("Special Judge Unknown Error: {}", e)),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_compiled(
    config: &JudgeConfig,
    sandbox: &mut Sandbox,
    compiled: &CompileResult,
    floors: ResourceFloors,
    input: &Path,
    user_out: &Path,
    answer: &Path,
    code: &str,
) -> Result<ScoreResult> {
    if !compiled.success {
        return Ok(ScoreResult::failure(format!(
            "Special Judge failed to compile:\n\n{}",
            compiled.output
        )));
    }

    let program = compiled
        .exec_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spj".into());

    sandbox.reset()?;
    sandbox.put(&compiled.exec_file, 0o755, &program)?;
    for extra in &compiled.extra_files {
        sandbox.put_extra(extra)?;
    }
    sandbox.put(input, 0o444, "input")?;
    sandbox.put(user_out, 0o444, "user_out")?;
    sandbox.put(answer, 0o444, "answer")?;
    sandbox.put_data(code.as_bytes(), 0o444, "code")?;

    let outcome = sandbox.run(&RunOptions {
        program: &program,
        time_limit: config.spj_time_limit,
        memory_limit: config.spj_memory_limit,
        memory_reserve: floors.min_memory_reserve + 32 * 1024,
        large_stack: floors.large_stack,
        output_limit: config.output_limit.max(floors.min_output_limit),
        process_limit: floors.min_process_limit,
        stdin: None,
        stdout: Some("spj_out"),
        stderr: Some("spj_err"),
    })?;

    if outcome.time_usage > config.spj_time_limit {
        return Ok(ScoreResult::failure(
            "Special Judge time limit exceeded".to_string(),
        ));
    }
    if outcome.status != RunStatus::ExitedNormally {
        return Ok(ScoreResult::failure(format!(
            "Special Judge exited abnormally: {}",
            crate::JudgeStatus::from(outcome.status)
        )));
    }

    let stdout = match sandbox.open_output("spj_out") {
        Some(path) => fs::read_to_string(path)?,
        None => String::new(),
    };
    let message = match sandbox.open_output("spj_err") {
        Some(path) => fs::read_to_string(path)?.trim().to_string(),
        None => String::new(),
    };

    match parse_score(&stdout) {
        Some(score) => Ok(ScoreResult {
            success: true,
            score,
            message,
        }),
        None => Ok(ScoreResult::failure(format!(
            "Special Judge returned an illegal score: {:?}",
            shorter(stdout.trim(), 64)
        ))),
    }
}

/// The checker's whole stdout, trimmed, must parse as a finite score
/// in [0, 100].
pub fn parse_score(stdout: &str) -> Option<f64> {
    let score: f64 = stdout.trim().parse().ok()?;
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Some(score)
    } else {
        None
    }
}

fn run_legacy(
    config: &JudgeConfig,
    script: &str,
    input: &Path,
    user_out: &Path,
    answer: &Path,
    code: &str,
) -> Result<ScoreResult> {
    let input = fs::read_to_string(input)?;
    let user_out = fs::read_to_string(user_out)?;
    let answer = fs::read_to_string(answer)?;

    Ok(eval_legacy(
        config,
        script,
        input,
        user_out,
        answer,
        code.to_string(),
    ))
}

/// Evaluates the legacy checker on a restricted engine: the wall
/// clock and memory ceiling of the old in-process sandbox become an
/// operation budget and size caps here.
fn eval_legacy(
    config: &JudgeConfig,
    script: &str,
    input: String,
    user_out: String,
    answer: String,
    code: String,
) -> ScoreResult {
    let mut engine = Engine::new();
    engine.set_max_operations(config.spj_operation_limit);
    engine.set_max_string_size(config.spj_memory_limit as usize * 1024);
    engine.set_max_array_size(1 << 20);
    engine.set_max_map_size(1 << 20);

    let mut scope = Scope::new();
    scope.push("input", input);
    scope.push("user_out", user_out);
    scope.push("answer", answer);
    scope.push("code", code);

    let map = match engine.eval_with_scope::<rhai::Map>(&mut scope, script) {
        Ok(map) => map,
        Err(e) => {
            return ScoreResult::failure(format!("Special Judge exited with error:\n\n{}", e))
        }
    };

    let score = match map.get("score") {
        Some(d) => {
            if let Ok(i) = d.clone().as_int() {
                i as f64
            } else if let Ok(f) = d.clone().as_float() {
                f
            } else {
                return ScoreResult::failure(
                    "Special Judge returned result contains an illegal score".to_string(),
                );
            }
        }
        None => {
            return ScoreResult::failure(
                "Special Judge returned result contains no score".to_string(),
            )
        }
    };
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return ScoreResult::failure(
            "Special Judge returned result contains an illegal score".to_string(),
        );
    }

    let message = map
        .get("message")
        .map(|d| d.to_string())
        .unwrap_or_default();

    ScoreResult {
        success: true,
        score,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_parsing() {
        assert_eq!(parse_score("100\n"), Some(100.0));
        assert_eq!(parse_score("  49.5  "), Some(49.5));
        assert_eq!(parse_score("0"), Some(0.0));
        assert_eq!(parse_score("101"), None);
        assert_eq!(parse_score("-1"), None);
        assert_eq!(parse_score("NaN"), None);
        assert_eq!(parse_score("inf"), None);
        assert_eq!(parse_score("same"), None);
        assert_eq!(parse_score(""), None);
    }

    fn eval(config: &JudgeConfig, script: &str) -> ScoreResult {
        eval_legacy(
            config,
            script,
            "1 2\n".into(),
            "3\n".into(),
            "3\n".into(),
            "int main() {}".into(),
        )
    }

    #[test]
    fn legacy_full_score() {
        let config = JudgeConfig::default();
        let result = eval(
            &config,
            r#"
                let s = 0;
                if user_out == answer {
                    s = 100;
                }
                #{score: s, message: "ok"}
            "#,
        );
        assert!(result.success);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.message, "ok");
    }

    #[test]
    fn legacy_partial_score_without_message() {
        let config = JudgeConfig::default();
        let result = eval(&config, "#{score: 30.5}");
        assert!(result.success);
        assert_eq!(result.score, 30.5);
        assert_eq!(result.message, "");
    }

    #[test]
    fn legacy_sees_the_case_data() {
        let config = JudgeConfig::default();
        let result = eval(
            &config,
            "let s = 0; if input == \"1 2\\n\" { s = 100; } #{score: s}",
        );
        assert!(result.success);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn legacy_non_map_result_fails() {
        let config = JudgeConfig::default();
        let result = eval(&config, "42");
        assert!(!result.success);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn legacy_illegal_score_fails() {
        let config = JudgeConfig::default();
        assert!(!eval(&config, "#{score: 1000}").success);
        assert!(!eval(&config, "#{score: \"high\"}").success);
        assert!(!eval(&config, "#{message: \"no score\"}").success);
    }

    #[test]
    fn legacy_runaway_script_fails() {
        let mut config = JudgeConfig::default();
        config.spj_operation_limit = 10_000;
        let result = eval(&config, "let x = 0; while true { x += 1; } #{score: x}");
        assert!(!result.success);
    }

    #[test]
    fn legacy_script_error_fails() {
        let config = JudgeConfig::default();
        let result = eval(&config, "this is not rhai");
        assert!(!result.success);
        assert!(result.message.contains("Special Judge"));
    }

    #[test]
    fn unreadable_package_becomes_failing_checker() -> Result<()> {
        let testdata = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        // not UTF-8, so the source read faults before any compile
        fs::write(testdata.path().join("spj_c.c"), [0xff_u8, 0xfe, 0xff])?;

        let config = JudgeConfig::default();
        assert!(discover(&config, scratch.path(), testdata.path()).is_err());

        match discover_contained(&config, scratch.path(), testdata.path()) {
            Some(Checker::Broken { message }) => {
                assert!(message.starts_with("Special Judge unavailable"));
            }
            other => panic!("expected a broken checker, got {:?}", other),
        }
        Ok(())
    }
}
