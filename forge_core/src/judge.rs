use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use log::{debug, info};
use tempfile::TempDir;

use crate::checker::{self, Checker};
use crate::compare::normalized_eq;
use crate::compile::{self, CompileResult};
use crate::config::JudgeConfig;
use crate::error::Result;
use crate::lang::{self, Language};
use crate::sandbox::{RunOptions, RunStatus, Sandbox};
use crate::task::{shorter_read, CaseResult, JudgeResult, SubtaskResult, Task, ECHO_LIMIT};
use crate::testdata::{self, Subtask, SubtaskType, Testcase};
use crate::JudgeStatus;

/// Per-task state threaded through the pipeline: the scratch
/// directory every artifact lives in, and the probed-once checker.
/// Dropped with the task, which also discards the memoized checker
/// binary.
struct JudgeContext<'a> {
    config: &'a JudgeConfig,
    scratch: TempDir,
    /// Outer `None`: not probed yet. Inner `None`: exact-diff task.
    checker: Option<Option<Checker>>,
}

/// Explicit per-subtask score accumulator. The first case seeds it
/// according to the aggregation type; folding is pure arithmetic on
/// raw 0-100 case scores.
struct SubtaskAccum {
    kind: SubtaskType,
    weight: f64,
    case_count: usize,
    score: Option<f64>,
}

impl SubtaskAccum {
    fn new(subtask: &Subtask) -> Self {
        Self {
            kind: subtask.kind,
            weight: subtask.weight,
            case_count: subtask.cases.len(),
            score: None,
        }
    }

    fn fold(&mut self, case_score: f64) {
        let next = match self.kind {
            SubtaskType::Sum => {
                self.score.unwrap_or(0.0)
                    + case_score / self.case_count as f64 * (self.weight / 100.0)
            }
            SubtaskType::Min => self
                .score
                .unwrap_or(self.weight)
                .min(case_score * self.weight / 100.0),
            SubtaskType::Mul => self.score.unwrap_or(self.weight) * (case_score / 100.0),
        };
        self.score = Some(next);
    }

    fn value(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }
}

/// Overall score: sum of subtask scores, ceiled, capped at 100.
/// Recomputed from scratch after every case so republication is
/// idempotent.
fn overall_score(accums: &[SubtaskAccum]) -> u64 {
    let total: f64 = accums.iter().map(|a| a.value()).sum();
    (total.ceil() as u64).min(100)
}

/// Judges one task end to end, publishing the progressive result
/// through `callback` after every state transition. Errors escaping
/// this function are the caller's cue to report `System Error`.
pub fn judge_task<F>(
    task: &Task,
    config: &JudgeConfig,
    sandbox: &mut Sandbox,
    callback: &mut F,
) -> Result<()>
where
    F: FnMut(&JudgeResult) -> Result<()>,
{
    let mut ctx = JudgeContext {
        config,
        scratch: scratch_dir(config)?,
        checker: None,
    };
    let mut result = JudgeResult::new();

    result.status = JudgeStatus::Compiling;
    callback(&result)?;

    let language = lang::find(&task.language)?;
    let compiled = compile::compile(config, ctx.scratch.path(), &task.code, language.as_ref())?;
    result.compiler_output = compiled.output.clone();

    if !compiled.success {
        info!("task {}: compile error", task.judge_id);
        result.status = JudgeStatus::CompileError;
        result.pending = false;
        return callback(&result);
    }

    let testdata_dir = config.testdata_dir.join(&task.testdata);
    let subtasks = if task.testdata.is_empty() {
        None
    } else {
        testdata::load(&testdata_dir).ok()
    };
    let subtasks = match subtasks {
        Some(subtasks) => subtasks,
        None => {
            info!("task {}: no testdata", task.judge_id);
            result.status = JudgeStatus::NoTestdata;
            result.pending = false;
            return callback(&result);
        }
    };

    result.case_num = subtasks.iter().map(|s| s.cases.len()).sum();
    result.subtasks = Some(
        subtasks
            .iter()
            .map(|s| SubtaskResult {
                case_num: s.cases.len(),
                status: JudgeStatus::Waiting,
                score: None,
                cases: Vec::new(),
                pending: true,
            })
            .collect(),
    );

    let single = subtasks.len() == 1;
    let mut accums: Vec<SubtaskAccum> = subtasks.iter().map(SubtaskAccum::new).collect();
    let mut overall_status: Option<JudgeStatus> = None;

    for (s, subtask) in subtasks.iter().enumerate() {
        let mut subtask_status: Option<JudgeStatus> = None;

        for (i, testcase) in subtask.cases.iter().enumerate() {
            let running = JudgeStatus::Running {
                subtask: if single { None } else { Some(s + 1) },
                case: i + 1,
            };
            result.status = running;
            {
                let subtask_result = &mut result.subtasks.as_mut().unwrap()[s];
                subtask_result.status = JudgeStatus::Running {
                    subtask: None,
                    case: i + 1,
                };
                subtask_result.pending = true;
            }
            callback(&result)?;

            let case_result =
                judge_case(&mut ctx, task, language.as_ref(), &compiled, sandbox, testcase)?;
            debug!(
                "task {}: case {}.{}: {} ({})",
                task.judge_id,
                s + 1,
                i + 1,
                case_result.status,
                case_result.score
            );

            accums[s].fold(case_result.score);
            result.total_time += case_result.time_used;
            result.max_memory = result.max_memory.max(case_result.memory_used);
            if subtask_status.is_none() && case_result.status != JudgeStatus::Accepted {
                subtask_status = Some(case_result.status);
            }
            result.subtasks.as_mut().unwrap()[s].cases.push(case_result);
            result.score = overall_score(&accums);
            callback(&result)?;
        }

        let final_status = subtask_status.unwrap_or(JudgeStatus::Accepted);
        {
            let subtask_result = &mut result.subtasks.as_mut().unwrap()[s];
            subtask_result.score = Some(accums[s].value());
            subtask_result.status = final_status;
            subtask_result.pending = false;
        }
        if overall_status.is_none() && final_status != JudgeStatus::Accepted {
            overall_status = Some(final_status);
        }
    }

    result.status = overall_status.unwrap_or(JudgeStatus::Accepted);
    result.score = overall_score(&accums);
    result.pending = false;
    info!(
        "task {}: {} ({})",
        task.judge_id, result.status, result.score
    );
    callback(&result)
}

fn scratch_dir(config: &JudgeConfig) -> Result<TempDir> {
    fs::create_dir_all(&config.tmp_dir)?;
    let dir = tempfile::Builder::new()
        .prefix("forge-task-")
        .tempdir_in(&config.tmp_dir)?;
    // unprivileged toolchain children traverse into it
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;
    Ok(dir)
}

/// Runs and scores one case per the case algorithm: limits first,
/// then abnormal exits verbatim, then the missing-output File Error,
/// then checker or exact diff.
fn judge_case(
    ctx: &mut JudgeContext,
    task: &Task,
    language: &dyn Language,
    compiled: &CompileResult,
    sandbox: &mut Sandbox,
    testcase: &Testcase,
) -> Result<CaseResult> {
    let floors = language.floors();

    sandbox.reset()?;
    for extra in &compiled.extra_files {
        sandbox.put_extra(extra)?;
    }
    let program = compiled
        .exec_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".into());
    sandbox.put(&compiled.exec_file, 0o755, &program)?;

    // the staged input is a cleaned copy without carriage returns
    let input_data: Vec<u8> = fs::read(&testcase.input)?
        .into_iter()
        .filter(|b| *b != b'\r')
        .collect();
    sandbox.put_data(&input_data, 0o444, task.input_name())?;

    let outcome = sandbox.run(&RunOptions {
        program: &program,
        time_limit: task.time_limit,
        memory_limit: task.memory_limit,
        memory_reserve: floors.min_memory_reserve + 32 * 1024,
        large_stack: floors.large_stack,
        output_limit: ctx.config.output_limit.max(floors.min_output_limit),
        process_limit: floors.min_process_limit,
        stdin: if task.file_io {
            None
        } else {
            Some(task.input_name())
        },
        stdout: if task.file_io {
            None
        } else {
            Some(task.output_name())
        },
        stderr: None,
    })?;

    let mut case = CaseResult {
        status: JudgeStatus::Waiting,
        time_used: outcome.time_usage,
        memory_used: outcome.memory_usage,
        input: shorter_read(&testcase.input, ECHO_LIMIT)?,
        user_out: String::new(),
        answer: shorter_read(&testcase.output, ECHO_LIMIT)?,
        score: 0.0,
        spj_message: None,
    };

    // the produced output has to be pulled out before the next reset
    let user_out = match sandbox.open_output(task.output_name()) {
        Some(path) => {
            let copy = ctx.scratch.path().join("user_out");
            fs::copy(&path, &copy)?;
            case.user_out = shorter_read(&copy, ECHO_LIMIT)?;
            Some(copy)
        }
        None => None,
    };

    if case.time_used > task.time_limit {
        case.status = JudgeStatus::TimeLimitExceeded;
    } else if case.memory_used > task.memory_limit {
        case.status = JudgeStatus::MemoryLimitExceeded;
    } else if outcome.status != RunStatus::ExitedNormally {
        case.status = outcome.status.into();
    } else if user_out.is_none() {
        case.status = JudgeStatus::FileError;
    } else {
        let user_out = user_out.unwrap();
        match special_judge(ctx, task, sandbox, testcase, &user_out)? {
            None => {
                let expected = fs::read_to_string(&testcase.output)?;
                let actual = fs::read_to_string(&user_out)?;
                if normalized_eq(&expected, &actual) {
                    case.status = JudgeStatus::Accepted;
                    case.score = 100.0;
                } else {
                    case.status = JudgeStatus::WrongAnswer;
                }
            }
            Some(spj) => {
                case.score = spj.score;
                case.status = if !spj.success {
                    JudgeStatus::JudgementFailed
                } else if spj.score == 100.0 {
                    JudgeStatus::Accepted
                } else if spj.score == 0.0 {
                    JudgeStatus::WrongAnswer
                } else {
                    JudgeStatus::PartiallyCorrect
                };
                case.spj_message = Some(spj.message);
            }
        }
    }

    Ok(case)
}

/// Probes for the task's checker on first use, then reuses the
/// memoized selection for every later case. A package whose checker
/// cannot even be prepared is memoized as a failing checker, so the
/// cases score as Judgement Failed instead of the task aborting.
fn special_judge(
    ctx: &mut JudgeContext,
    task: &Task,
    sandbox: &mut Sandbox,
    testcase: &Testcase,
    user_out: &Path,
) -> Result<Option<checker::ScoreResult>> {
    if ctx.checker.is_none() {
        let testdata_dir = ctx.config.testdata_dir.join(&task.testdata);
        ctx.checker = Some(checker::discover_contained(
            ctx.config,
            ctx.scratch.path(),
            &testdata_dir,
        ));
    }

    let selected = match ctx.checker.as_ref().unwrap() {
        Some(checker) => checker,
        None => return Ok(None),
    };
    Ok(Some(checker::run(
        ctx.config,
        sandbox,
        selected,
        &testcase.input,
        user_out,
        &testcase.output,
        &task.code,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::Subtask;

    fn subtask(kind: SubtaskType, weight: f64, cases: usize) -> Subtask {
        Subtask {
            kind,
            weight,
            cases: (0..cases)
                .map(|i| Testcase {
                    input: format!("{}.in", i).into(),
                    output: format!("{}.out", i).into(),
                })
                .collect(),
        }
    }

    #[test]
    fn sum_of_full_scores_is_the_weight() {
        let mut accum = SubtaskAccum::new(&subtask(SubtaskType::Sum, 40.0, 4));
        for _ in 0..4 {
            accum.fold(100.0);
        }
        assert!((accum.value() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn sum_averages_partial_scores() {
        let mut accum = SubtaskAccum::new(&subtask(SubtaskType::Sum, 100.0, 2));
        accum.fold(100.0);
        accum.fold(0.0);
        assert!((accum.value() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn min_takes_the_worst_case() {
        let mut accum = SubtaskAccum::new(&subtask(SubtaskType::Min, 60.0, 3));
        accum.fold(100.0);
        accum.fold(50.0);
        accum.fold(80.0);
        // weight * min(score)/100
        assert!((accum.value() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn mul_multiplies_penalties() {
        let mut accum = SubtaskAccum::new(&subtask(SubtaskType::Mul, 100.0, 2));
        accum.fold(100.0);
        accum.fold(50.0);
        assert!((accum.value() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn unseeded_accumulator_scores_zero() {
        let accum = SubtaskAccum::new(&subtask(SubtaskType::Min, 60.0, 1));
        assert_eq!(accum.value(), 0.0);
    }

    #[test]
    fn overall_caps_at_100() {
        let mut a = SubtaskAccum::new(&subtask(SubtaskType::Sum, 80.0, 1));
        let mut b = SubtaskAccum::new(&subtask(SubtaskType::Sum, 80.0, 1));
        a.fold(100.0);
        b.fold(100.0);
        assert_eq!(overall_score(&[a, b]), 100);
    }

    #[test]
    fn overall_ceils() {
        let mut a = SubtaskAccum::new(&subtask(SubtaskType::Sum, 100.0, 3));
        a.fold(100.0); // 33.33…
        assert_eq!(overall_score(&[a]), 34);
    }

    #[test]
    fn overall_is_idempotent_midway() {
        let mut a = SubtaskAccum::new(&subtask(SubtaskType::Sum, 50.0, 2));
        a.fold(100.0);
        let partial = overall_score(std::slice::from_ref(&a));
        assert_eq!(partial, overall_score(std::slice::from_ref(&a)));
        a.fold(100.0);
        assert_eq!(overall_score(&[a]), 50);
    }
}
