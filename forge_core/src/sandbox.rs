use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::warn;

use crate::compile::{ExtraFile, ExtraSource};
use crate::config::JudgeConfig;
use crate::error::{Error, Result};
use crate::probe::ProcessProbe;
use crate::JudgeStatus;

/// System paths bound read-only into every execution root. The
/// isolation view is built once; only staged files change per run.
const SYSTEM_BINDS: &[&str] = &[
    "/usr/bin",
    "/usr/share",
    "/usr/lib",
    "/usr/lib64",
    "/lib",
    "/lib64",
    "/dev",
];

/// Exit code the cell reserves for its own setup failures, so they
/// are never mistaken for the program crashing.
pub const CELL_SETUP_EXIT: i32 = 117;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunStatus {
    ExitedNormally,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
}

impl From<RunStatus> for JudgeStatus {
    fn from(v: RunStatus) -> Self {
        match v {
            RunStatus::ExitedNormally => JudgeStatus::Accepted,
            RunStatus::TimeLimitExceeded => JudgeStatus::TimeLimitExceeded,
            RunStatus::MemoryLimitExceeded => JudgeStatus::MemoryLimitExceeded,
            RunStatus::OutputLimitExceeded => JudgeStatus::OutputLimitExceeded,
            RunStatus::RuntimeError => JudgeStatus::RuntimeError,
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// ms
    pub time_usage: u64,
    /// KB
    pub memory_usage: u64,
}

pub struct RunOptions<'a> {
    /// Staged file name of the program inside the root.
    pub program: &'a str,
    /// ms; the cell receives this rounded up to whole seconds plus a
    /// one-second reserve so scheduling jitter cannot fake a timeout.
    pub time_limit: u64,
    /// KB
    pub memory_limit: u64,
    /// KB on top of `memory_limit`, for runtime/VM overhead.
    pub memory_reserve: u64,
    pub large_stack: bool,
    /// bytes
    pub output_limit: u64,
    pub process_limit: u64,
    /// `None` means file I/O mode: no redirection, the program opens
    /// its configured file names itself.
    pub stdin: Option<&'a str>,
    pub stdout: Option<&'a str>,
    pub stderr: Option<&'a str>,
}

/// A reusable isolated execution root. Construction mounts the
/// read-only system view (requires root); `reset` only clears staged
/// files, so the per-run cost stays small.
pub struct Sandbox {
    root: PathBuf,
    mounts: Vec<PathBuf>,
    keep: Vec<String>,
    cell: PathBuf,
    uid: u32,
    gid: u32,
}

impl Sandbox {
    pub fn new(config: &JudgeConfig) -> Result<Self> {
        fs::create_dir_all(&config.tmp_dir)?;
        let root = tempfile::Builder::new()
            .prefix("forge-box-")
            .tempdir_in(&config.tmp_dir)?
            .into_path();
        // the sandboxed program runs unprivileged and writes its
        // output file at the root
        fs::set_permissions(&root, fs::Permissions::from_mode(0o777))?;

        let mut mounts = Vec::new();
        let mut keep = Vec::new();
        for bind in SYSTEM_BINDS {
            let src = Path::new(bind);
            if !src.is_dir() {
                continue;
            }
            let target = root.join(&bind[1..]);
            bind_mount_readonly(src, &target)?;
            mounts.push(target);
            let top = bind[1..].split('/').next().unwrap_or_default().to_string();
            if !keep.contains(&top) {
                keep.push(top);
            }
        }

        Ok(Self {
            root,
            mounts,
            keep,
            cell: cell_path(config),
            uid: config.run_uid,
            gid: config.run_gid,
        })
    }

    /// Destructively clears everything staged since the last reset.
    /// The bind-mounted system view is left in place.
    pub fn reset(&mut self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.keep.contains(&name) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn put(&mut self, source: &Path, mode: u32, target: &str) -> Result<()> {
        let dst = self.root.join(target);
        fs::copy(source, &dst)?;
        fs::set_permissions(&dst, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    pub fn put_data(&mut self, data: &[u8], mode: u32, target: &str) -> Result<()> {
        let dst = self.root.join(target);
        fs::write(&dst, data)?;
        fs::set_permissions(&dst, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    pub fn put_extra(&mut self, extra: &ExtraFile) -> Result<()> {
        match &extra.source {
            ExtraSource::Copy(path) => self.put(path, extra.mode, &extra.target),
            ExtraSource::Bytes(bytes) => self.put_data(bytes, extra.mode, &extra.target),
        }
    }

    /// Runs a staged program under the cell and classifies its exit.
    pub fn run(&mut self, opts: &RunOptions) -> Result<RunOutcome> {
        let cpu_secs = (opts.time_limit + 999) / 1000 + 1;
        let memory_kb = opts.memory_limit + opts.memory_reserve;

        let mut cmd = Command::new(&self.cell);
        cmd.arg("--root")
            .arg(&self.root)
            .arg("--cpu")
            .arg(cpu_secs.to_string())
            .arg("--memory")
            .arg(memory_kb.to_string())
            .arg("--output")
            .arg(opts.output_limit.to_string())
            .arg("--procs")
            .arg(opts.process_limit.to_string())
            .arg("--uid")
            .arg(self.uid.to_string())
            .arg("--gid")
            .arg(self.gid.to_string());
        if opts.large_stack {
            cmd.arg("--large-stack");
        }
        if let Some(stdin) = opts.stdin {
            cmd.arg("--stdin").arg(stdin);
        }
        if let Some(stdout) = opts.stdout {
            cmd.arg("--stdout").arg(stdout);
        }
        if let Some(stderr) = opts.stderr {
            cmd.arg("--stderr").arg(stderr);
        }
        cmd.arg("--")
            .arg(format!("/{}", opts.program))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn()?;
        let probe = ProcessProbe::new(child.id())?;
        let bio = probe.watching();

        let raw = bio.raw_status();
        let status = if libc::WIFEXITED(raw) {
            match libc::WEXITSTATUS(raw) {
                0 => RunStatus::ExitedNormally,
                CELL_SETUP_EXIT => {
                    return Err(Error::Sandbox("cell failed to set the run up".to_string()))
                }
                _ => RunStatus::RuntimeError,
            }
        } else if libc::WIFSIGNALED(raw) {
            match libc::WTERMSIG(raw) {
                libc::SIGXCPU => RunStatus::TimeLimitExceeded,
                libc::SIGXFSZ => RunStatus::OutputLimitExceeded,
                libc::SIGKILL => {
                    // the kernel kills with SIGKILL both past the hard
                    // CPU limit and on OOM; the clock disambiguates
                    if bio.time_usage() >= opts.time_limit {
                        RunStatus::TimeLimitExceeded
                    } else {
                        RunStatus::MemoryLimitExceeded
                    }
                }
                _ => RunStatus::RuntimeError,
            }
        } else {
            RunStatus::RuntimeError
        };

        Ok(RunOutcome {
            status,
            time_usage: bio.time_usage(),
            memory_usage: bio.peak_memory(),
        })
    }

    /// Retrieves a produced file by name. Absence is meaningful to
    /// the caller ("File Error"), so this does not error.
    pub fn open_output(&self, name: &str) -> Option<PathBuf> {
        let path = self.root.join(name);
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        for target in self.mounts.iter().rev() {
            if let Err(e) = unmount(target) {
                warn!("failed to unmount {:?}: {}", target, e);
            }
        }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!("failed to remove sandbox root {:?}: {}", self.root, e);
        }
    }
}

fn cell_path(config: &JudgeConfig) -> PathBuf {
    if let Some(path) = &config.cell_path {
        return path.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("forge_cell")))
        .unwrap_or_else(|| "forge_cell".into())
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::Sandbox(format!("path contains NUL: {:?}", path)))
}

fn bind_mount_readonly(src: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let c_src = path_cstring(src)?;
    let c_target = path_cstring(target)?;
    let none = std::ptr::null::<libc::c_char>();

    let rc = unsafe {
        libc::mount(
            c_src.as_ptr(),
            c_target.as_ptr(),
            none,
            libc::MS_BIND | libc::MS_REC,
            std::ptr::null(),
        )
    };
    if rc != 0 {
        return Err(Error::Sandbox(format!(
            "bind mount {:?} failed: {}",
            src,
            std::io::Error::last_os_error()
        )));
    }

    let rc = unsafe {
        libc::mount(
            none,
            c_target.as_ptr(),
            none,
            libc::MS_BIND | libc::MS_REMOUNT | libc::MS_RDONLY,
            std::ptr::null(),
        )
    };
    if rc != 0 {
        return Err(Error::Sandbox(format!(
            "read-only remount {:?} failed: {}",
            target,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn unmount(target: &Path) -> Result<()> {
    let c_target = path_cstring(target)?;
    let rc = unsafe { libc::umount2(c_target.as_ptr(), libc::MNT_DETACH) };
    if rc != 0 {
        return Err(Error::Sandbox(format!(
            "umount {:?} failed: {}",
            target,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_maps_to_judge_status() {
        assert_eq!(
            JudgeStatus::from(RunStatus::OutputLimitExceeded),
            JudgeStatus::OutputLimitExceeded
        );
        assert_eq!(
            JudgeStatus::from(RunStatus::RuntimeError),
            JudgeStatus::RuntimeError
        );
    }

    #[test]
    fn cpu_budget_rounds_up_with_reserve() {
        // 1001 ms -> 2 s limit + 1 s reserve
        let ms: u64 = 1001;
        assert_eq!((ms + 999) / 1000 + 1, 3);
        let ms: u64 = 1000;
        assert_eq!((ms + 999) / 1000 + 1, 2);
    }
}
