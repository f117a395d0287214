//! Process liveness probes and detached daemon spawning.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Zero-signal probe. A process we may not signal still counts as alive.
pub fn is_alive(pid: u32) -> bool {
    // 0 and negative values address process groups, not a single process.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Starts background processes that outlive the caller.
pub trait ProcessSupervisor {
    /// Spawn `args` detached from the caller, returning the child's pid.
    fn spawn_detached(&self, args: &[OsString], env: &[(String, String)]) -> Result<u32>;
}

/// Re-executes a program (normally this binary) in a new session.
#[derive(Debug, Clone)]
pub struct DetachedSpawner {
    program: PathBuf,
}

impl DetachedSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        DetachedSpawner {
            program: program.into(),
        }
    }

    pub fn current_exe() -> Result<Self> {
        Ok(DetachedSpawner::new(std::env::current_exe()?))
    }
}

impl ProcessSupervisor for DetachedSpawner {
    fn spawn_detached(&self, args: &[OsString], env: &[(String, String)]) -> Result<u32> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // New session: no controlling terminal, no shared process group.
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        let child = command.spawn().map_err(|e| {
            Error::Transport(format!(
                "failed to start daemon {}: {e}",
                self.program.display()
            ))
        })?;
        Ok(child.id())
    }
}
