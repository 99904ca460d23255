use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use super::{Language, ResourceFloors};
use crate::compile::{CompileResult, ExtraFile, ExtraSource, Toolchain, COMPILE_TIMEOUT_TEXT};
use crate::error::{Error, Result};

/// Interpreted languages are "compiled" by syntax-checking the script
/// and bundling a tiny static stub that re-execs the interpreter on
/// the script staged next to it. The script travels as an ExtraFile.
pub struct ScriptLanguage {
    id: &'static str,
    suffix: &'static str,
    checker: &'static str,
    interpreter: &'static str,
    floors: ResourceFloors,
    /// nodejs stages the script by path copy, ruby by byte buffer;
    /// both staging variants exist in the wild, so keep both.
    extra_by_copy: bool,
}

impl ScriptLanguage {
    pub fn nodejs() -> Self {
        Self {
            id: "nodejs",
            suffix: "js",
            checker: "nodejs",
            interpreter: "/usr/bin/nodejs",
            floors: ResourceFloors {
                min_output_limit: 10240,
                min_process_limit: 15,
                min_memory_reserve: 768 * 1024,
                large_stack: false,
            },
            extra_by_copy: true,
        }
    }

    pub fn ruby() -> Self {
        Self {
            id: "ruby",
            suffix: "rb",
            checker: "ruby",
            interpreter: "/usr/bin/ruby",
            floors: ResourceFloors {
                min_output_limit: 10240,
                min_process_limit: 2,
                min_memory_reserve: 768 * 1024,
                large_stack: false,
            },
            extra_by_copy: false,
        }
    }

    /// The stub appends the script suffix to its own argv[0] and
    /// execs the interpreter on the result.
    fn stub_source(&self) -> String {
        format!(
            r#"#include <stdlib.h>
#include <string.h>
#include <unistd.h>

int main(int argc, char **argv)
{{
    size_t len = strlen(argv[0]);
    char *buf = (char *)malloc(len + sizeof(".{suffix}"));
    memcpy(buf, argv[0], len);
    memcpy(buf + len, ".{suffix}", sizeof(".{suffix}"));

    const char *INTERP = "{interp}";
    execl(INTERP, INTERP, buf, (char *)NULL);
    return 1;
}}
"#,
            suffix = self.suffix,
            interp = self.interpreter
        )
    }
}

impl Language for ScriptLanguage {
    fn id(&self) -> &'static str {
        self.id
    }

    fn suffix(&self) -> &'static str {
        self.suffix
    }

    fn floors(&self) -> ResourceFloors {
        self.floors
    }

    fn compile(&self, toolchain: &Toolchain, src: &Path) -> Result<CompileResult> {
        let checker = which::which(self.checker)
            .map_err(|_| Error::Toolchain(format!("missing {}", self.checker)))?;
        let exec = src.with_extension("");

        let mut cmd = Command::new(checker);
        cmd.arg("-c").arg(src);
        let check = toolchain.run(&mut cmd)?;
        if check.timed_out {
            return Ok(CompileResult {
                success: false,
                exec_file: exec,
                output: COMPILE_TIMEOUT_TEXT.to_string(),
                extra_files: vec![],
            });
        }
        if !check.success {
            return Ok(CompileResult {
                success: false,
                exec_file: exec,
                output: check.output,
                extra_files: vec![],
            });
        }

        let stub_src = src.with_extension("stub.c");
        fs::write(&stub_src, self.stub_source())?;
        fs::set_permissions(&stub_src, fs::Permissions::from_mode(0o644))?;
        let gcc = which::which("gcc").map_err(|_| Error::Toolchain("missing gcc".to_string()))?;
        let mut cmd = Command::new(gcc);
        cmd.arg(&stub_src).arg("-o").arg(&exec).arg("-static");
        let stub = toolchain.run(&mut cmd)?;
        if !exec.is_file() {
            return Err(Error::Toolchain(format!(
                "failed to build the interpreter stub: {}",
                stub.output
            )));
        }

        let target = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = if self.extra_by_copy {
            ExtraSource::Copy(src.to_path_buf())
        } else {
            ExtraSource::Bytes(fs::read(src)?)
        };

        Ok(CompileResult {
            success: true,
            exec_file: exec,
            output: check.output,
            extra_files: vec![ExtraFile {
                target,
                mode: 0o444,
                source,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_mentions_interpreter_and_suffix() {
        let node = ScriptLanguage::nodejs();
        let stub = node.stub_source();
        assert!(stub.contains("/usr/bin/nodejs"));
        assert!(stub.contains(".js"));

        let ruby = ScriptLanguage::ruby();
        assert!(ruby.stub_source().contains("/usr/bin/ruby"));
    }
}
