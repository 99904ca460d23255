use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::debug;

use crate::config::JudgeConfig;
use crate::error::Result;
use crate::lang::Language;

/// Diagnostic text is cut at this length before it goes on the wire.
pub const COMPILE_OUTPUT_LIMIT: usize = 10 * 1024;

pub const COMPILE_TIMEOUT_TEXT: &str = "Time limit exceeded while compiling";

/// An auxiliary file the runtime needs next to the executable, staged
/// into the sandbox with an explicit permission mask.
#[derive(Debug, Clone)]
pub struct ExtraFile {
    pub target: String,
    pub mode: u32,
    pub source: ExtraSource,
}

#[derive(Debug, Clone)]
pub enum ExtraSource {
    Copy(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct CompileResult {
    pub success: bool,
    pub exec_file: PathBuf,
    pub output: String,
    pub extra_files: Vec<ExtraFile>,
}

/// Invokes toolchain subprocesses under a wall-clock budget, with the
/// worker's privileges dropped for the child. Compiler diagnostics on
/// stdout and stderr are merged.
pub struct Toolchain<'a> {
    config: &'a JudgeConfig,
}

pub struct ToolchainRun {
    pub timed_out: bool,
    /// Exit code was zero. Callers mostly ignore this and probe for
    /// the artifact instead; warnings can exit non-zero.
    pub success: bool,
    pub output: String,
}

impl<'a> Toolchain<'a> {
    pub fn new(config: &'a JudgeConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, cmd: &mut Command) -> Result<ToolchainRun> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // untrusted source goes through the compiler; never run it
        // with worker privileges
        if unsafe { libc::geteuid() } == 0 {
            cmd.uid(self.config.run_uid).gid(self.config.run_gid);
        }

        let mut child = cmd.spawn()?;
        let mut out_pipe = child.stdout.take();
        let mut err_pipe = child.stderr.take();
        let out_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(pipe) = out_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });
        let err_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(pipe) = err_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + Duration::from_millis(self.config.compile_time_limit);
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let mut bytes = out_thread.join().unwrap_or_default();
        bytes.extend(err_thread.join().unwrap_or_default());
        let output = String::from_utf8_lossy(&bytes).into_owned();

        Ok(ToolchainRun {
            timed_out,
            success: status.map(|s| s.success()).unwrap_or(false),
            output,
        })
    }
}

/// Compiles one submission: writes the source under a
/// collision-resistant name inside `scratch`, removes any stale
/// artifact, and hands off to the language's toolchain.
pub fn compile(
    config: &JudgeConfig,
    scratch: &Path,
    code: &str,
    lang: &dyn Language,
) -> Result<CompileResult> {
    // per-process prefix plus tempfile's random suffix keeps parallel
    // workers out of each other's way
    let dir = tempfile::Builder::new()
        .prefix(&format!("tmp_{}_", std::process::id()))
        .tempdir_in(scratch)?
        .into_path();
    // the toolchain child runs unprivileged and must write here
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o777))?;

    let stem = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".into());
    let src = dir.join(lang.filename(&stem));
    fs::write(&src, code)?;
    fs::set_permissions(&src, fs::Permissions::from_mode(0o644))?;

    // a leftover artifact must never be reported as a fresh success
    let exec = dir.join(&stem);
    if exec.is_file() {
        fs::remove_file(&exec)?;
    }

    debug!("compiling {} submission at {:?}", lang.id(), src);

    let toolchain = Toolchain::new(config);
    let mut result = lang.compile(&toolchain, &src)?;
    result.output = truncate_output(&result.output, COMPILE_OUTPUT_LIMIT);
    Ok(result)
}

/// Char-boundary-safe truncation for compiler diagnostics.
pub fn truncate_output(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::lang::{Language, ResourceFloors};

    struct CopyLanguage;

    impl Language for CopyLanguage {
        fn id(&self) -> &'static str {
            "copy"
        }

        fn suffix(&self) -> &'static str {
            "txt"
        }

        fn floors(&self) -> ResourceFloors {
            ResourceFloors {
                min_output_limit: 0,
                min_process_limit: 1,
                min_memory_reserve: 0,
                large_stack: false,
            }
        }

        fn compile(&self, _toolchain: &Toolchain, src: &Path) -> Result<CompileResult> {
            let exec = src.with_extension("");
            fs::copy(src, &exec)?;
            Ok(CompileResult {
                success: exec.is_file(),
                exec_file: exec,
                output: String::new(),
                extra_files: vec![],
            })
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ααααα";
        let t = truncate_output(s, 5);
        assert!(t.len() <= 5);
        assert!(s.starts_with(&t));
        assert_eq!(truncate_output("short", 100), "short");
    }

    #[test]
    fn driver_writes_source_under_random_name() -> Result<()> {
        let config = JudgeConfig::default();
        let scratch = tempfile::tempdir()?;
        let result = compile(&config, scratch.path(), "hello", &CopyLanguage)?;
        assert!(result.success);
        assert!(result.exec_file.is_file());
        let name = result.exec_file.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(&format!("tmp_{}_", std::process::id())));
        assert_eq!(fs::read_to_string(&result.exec_file)?, "hello");
        Ok(())
    }

    #[test]
    fn toolchain_merges_streams() -> Result<()> {
        let config = JudgeConfig::default();
        let toolchain = Toolchain::new(&config);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2");
        let run = toolchain.run(&mut cmd)?;
        assert!(!run.timed_out);
        assert!(run.success);
        assert!(run.output.contains("out"));
        assert!(run.output.contains("err"));
        Ok(())
    }

    #[test]
    fn toolchain_times_out() -> Result<()> {
        let mut config = JudgeConfig::default();
        config.compile_time_limit = 100;
        let toolchain = Toolchain::new(&config);
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let run = toolchain.run(&mut cmd)?;
        assert!(run.timed_out);
        assert!(!run.success);
        Ok(())
    }
}
