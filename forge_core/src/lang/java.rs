use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use regex::Regex;

use super::{Language, ResourceFloors};
use crate::compile::{CompileResult, Toolchain, COMPILE_TIMEOUT_TEXT};
use crate::error::{Error, Result};

/// Java is compiled to a native binary in two passes: the first pass
/// exists only to scrape the public class name out of the compiler
/// diagnostics, then the source is relocated into a per-class
/// directory and compiled for real with `--main`.
pub struct JavaLanguage;

impl Language for JavaLanguage {
    fn id(&self) -> &'static str {
        "java"
    }

    fn suffix(&self) -> &'static str {
        "java"
    }

    fn floors(&self) -> ResourceFloors {
        ResourceFloors {
            min_output_limit: 1024,
            min_process_limit: 2,
            min_memory_reserve: 0,
            large_stack: false,
        }
    }

    fn compile(&self, toolchain: &Toolchain, src: &Path) -> Result<CompileResult> {
        let compiler =
            which::which("gcj").map_err(|_| Error::Toolchain("missing gcj".to_string()))?;
        let exec = src.with_extension("");

        let mut cmd = Command::new(&compiler);
        cmd.arg(src);
        let probe = toolchain.run(&mut cmd)?;
        if probe.timed_out {
            let _ = fs::remove_file(&exec);
            return Ok(CompileResult {
                success: false,
                exec_file: exec,
                output: COMPILE_TIMEOUT_TEXT.to_string(),
                extra_files: vec![],
            });
        }

        let class_re =
            Regex::new(r"error: The public type ([A-Za-z_$0-9]+) must be defined in its own file")
                .unwrap();
        let class_name = probe
            .output
            .lines()
            .find_map(|line| class_re.captures(line))
            .map(|c| c[1].to_string());

        let class_name = match class_name {
            Some(name) => name,
            None => {
                return Ok(CompileResult {
                    success: exec.is_file(),
                    exec_file: exec,
                    output: format!(
                        "Failed to detect the main class name, here is the compiler output:\n\n{}",
                        probe.output
                    ),
                    extra_files: vec![],
                });
            }
        };

        let class_dir = src.with_extension("").with_file_name(format!(
            "{}_dir",
            exec.file_name().unwrap_or_default().to_string_lossy()
        ));
        fs::create_dir(&class_dir)?;
        fs::set_permissions(&class_dir, fs::Permissions::from_mode(0o777))?;
        let relocated = class_dir.join(format!("{}.java", class_name));
        fs::rename(src, &relocated)?;

        let mut cmd = Command::new(&compiler);
        cmd.arg(&relocated)
            .arg("-o")
            .arg(&exec)
            .arg(format!("--main={}", class_name))
            .arg("-O2");
        let run = toolchain.run(&mut cmd)?;

        if run.timed_out {
            let _ = fs::remove_file(&exec);
            return Ok(CompileResult {
                success: false,
                exec_file: exec,
                output: COMPILE_TIMEOUT_TEXT.to_string(),
                extra_files: vec![],
            });
        }

        Ok(CompileResult {
            success: exec.is_file(),
            exec_file: exec,
            output: run.output,
            extra_files: vec![],
        })
    }
}
