use std::path::Path;

use crate::error::Result;

/// Watches one spawned child and collects its resource usage through
/// `wait4`. The caller must not `wait()` on the child itself; the
/// probe reaps it.
pub struct ProcessProbe {
    pid: u32,
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);
        if !Path::new(&proc_path).exists() {
            let err = std::io::Error::new(std::io::ErrorKind::NotFound, "process does not exist");
            return Err(err.into());
        }
        Ok(Self { pid })
    }

    /// Waits the process out and returns its whole-life usage.
    pub fn watching(&self) -> ProcessBio {
        let mut status: libc::c_int = 0;
        let mut ru = unsafe { std::mem::zeroed::<libc::rusage>() };
        unsafe {
            assert!(libc::wait4(self.pid as libc::pid_t, &mut status, 0, &mut ru) >= 0);
        }
        ProcessBio {
            status,
            utime: (ru.ru_utime.tv_sec * 1000 + ru.ru_utime.tv_usec / 1000) as u64,
            stime: (ru.ru_stime.tv_sec * 1000 + ru.ru_stime.tv_usec / 1000) as u64,
            maxrss: ru.ru_maxrss as u64,
        }
    }
}

#[derive(Debug)]
pub struct ProcessBio {
    status: i32,
    utime: u64,
    stime: u64,
    maxrss: u64,
}

impl ProcessBio {
    /// CPU time usage (ms), user plus system.
    pub fn time_usage(&self) -> u64 {
        self.utime + self.stime
    }

    /// Peak resident set size (KB).
    pub fn peak_memory(&self) -> u64 {
        self.maxrss
    }

    /// Raw wait status, to be decoded with `libc::WIF*`.
    pub fn raw_status(&self) -> i32 {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn probe_own_process() {
        let probe = ProcessProbe::new(std::process::id()).unwrap();
        assert_eq!(probe.pid, std::process::id());
    }

    #[test]
    fn reap_child() {
        let child = Command::new("true")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let probe = ProcessProbe::new(child.id()).unwrap();
        let bio = probe.watching();
        assert!(libc::WIFEXITED(bio.raw_status()));
        assert_eq!(libc::WEXITSTATUS(bio.raw_status()), 0);
    }
}
