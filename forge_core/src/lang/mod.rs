mod java;
mod native;
mod script;

use std::path::Path;

use crate::compile::{CompileResult, Toolchain};
use crate::error::{Error, Result};

/// Identifiers the registry knows about, in checker-probe order.
pub const LANGUAGE_IDS: &[&str] = &["c", "cpp", "java", "nodejs", "ruby"];

/// Resource floors a language imposes on every run of its programs.
/// Managed runtimes need room for their VM even when the submission
/// itself is tiny.
#[derive(Debug, Clone, Copy)]
pub struct ResourceFloors {
    /// bytes
    pub min_output_limit: u64,
    /// processes/threads
    pub min_process_limit: u64,
    /// KB reserved on top of the task memory limit
    pub min_memory_reserve: u64,
    pub large_stack: bool,
}

/// One language's capability surface: how its source files are named,
/// what floors its runtime needs, and how to turn source into an
/// executable artifact.
pub trait Language {
    fn id(&self) -> &'static str;

    fn suffix(&self) -> &'static str;

    fn filename(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.suffix())
    }

    fn floors(&self) -> ResourceFloors;

    fn compile(&self, toolchain: &Toolchain, src: &Path) -> Result<CompileResult>;
}

/// Static constructor table. An unknown identifier is a reported
/// error, never a crash.
pub fn find(id: &str) -> Result<Box<dyn Language>> {
    match id {
        "c" => Ok(Box::new(native::NativeLanguage::c())),
        "cpp" => Ok(Box::new(native::NativeLanguage::cpp())),
        "java" => Ok(Box::new(java::JavaLanguage)),
        "nodejs" => Ok(Box::new(script::ScriptLanguage::nodejs())),
        "ruby" => Ok(Box::new(script::ScriptLanguage::ruby())),
        _ => Err(Error::LanguageNotFound(id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_ids() {
        for id in LANGUAGE_IDS {
            let lang = find(id).unwrap();
            assert_eq!(lang.id(), *id);
        }
    }

    #[test]
    fn unknown_language() {
        assert!(matches!(
            find("brainfuck"),
            Err(Error::LanguageNotFound(_))
        ));
    }

    #[test]
    fn filename_rule() {
        assert_eq!(find("c").unwrap().filename("tmp_1"), "tmp_1.c");
        assert_eq!(find("java").unwrap().filename("tmp_1"), "tmp_1.java");
        assert_eq!(find("nodejs").unwrap().filename("tmp_1"), "tmp_1.js");
    }

    #[test]
    fn floors() {
        let c = find("c").unwrap().floors();
        assert!(c.large_stack);
        assert_eq!(c.min_process_limit, 1);

        let node = find("nodejs").unwrap().floors();
        assert_eq!(node.min_process_limit, 15);
        assert_eq!(node.min_memory_reserve, 768 * 1024);
        assert!(!node.large_stack);
    }
}
