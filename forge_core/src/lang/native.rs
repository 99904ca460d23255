use std::path::Path;
use std::process::Command;

use super::{Language, ResourceFloors};
use crate::compile::{CompileResult, Toolchain, COMPILE_TIMEOUT_TEXT};
use crate::error::{Error, Result};

/// C and C++: one compiler invocation producing a static binary.
pub struct NativeLanguage {
    id: &'static str,
    suffix: &'static str,
    compiler: &'static str,
}

impl NativeLanguage {
    pub fn c() -> Self {
        Self {
            id: "c",
            suffix: "c",
            compiler: "gcc",
        }
    }

    pub fn cpp() -> Self {
        Self {
            id: "cpp",
            suffix: "cpp",
            compiler: "g++",
        }
    }
}

impl Language for NativeLanguage {
    fn id(&self) -> &'static str {
        self.id
    }

    fn suffix(&self) -> &'static str {
        self.suffix
    }

    fn floors(&self) -> ResourceFloors {
        ResourceFloors {
            min_output_limit: 1024,
            min_process_limit: 1,
            min_memory_reserve: 0,
            large_stack: true,
        }
    }

    fn compile(&self, toolchain: &Toolchain, src: &Path) -> Result<CompileResult> {
        let compiler = which::which(self.compiler)
            .map_err(|_| Error::Toolchain(format!("missing {}", self.compiler)))?;
        let exec = src.with_extension("");

        let mut cmd = Command::new(compiler);
        cmd.arg(src)
            .arg("-o")
            .arg(&exec)
            .arg("-O2")
            .arg("-lm")
            .arg("-static")
            .arg("-DONLINE_JUDGE")
            .arg("-fdiagnostics-color=always");
        let run = toolchain.run(&mut cmd)?;

        if run.timed_out {
            // half-linked artifacts must not pass as a success
            let _ = std::fs::remove_file(&exec);
            return Ok(CompileResult {
                success: false,
                exec_file: exec,
                output: COMPILE_TIMEOUT_TEXT.to_string(),
                extra_files: vec![],
            });
        }

        Ok(CompileResult {
            // warnings may exit non-zero; the artifact decides
            success: exec.is_file(),
            exec_file: exec,
            output: run.output,
            extra_files: vec![],
        })
    }
}
