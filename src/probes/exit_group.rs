//! Scoped supervision of subprocess trees.
//!
//! Commands spawned through an [`ExitGroup`] can be torn down wholesale:
//! one `dispose` call terminates every live descendant, however the child
//! forked. On POSIX each child is moved into its own process group with a
//! pre-exec `setpgid` hook and disposal signals `-pgid`; elsewhere the
//! group falls back to killing the recorded children directly.

use std::io;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use tracing::debug;

/// A container of spawned children that can all be killed at once.
#[derive(Debug, Default)]
pub struct ExitGroup {
    pids: Mutex<Vec<u32>>,
}

impl ExitGroup {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            pids: Mutex::new(Vec::new()),
        })
    }

    /// Spawn `cmd` inside the group.
    ///
    /// The command must not have been started yet: the group installs its
    /// pre-exec hook before the child exists.
    pub fn spawn(&self, cmd: &mut Command) -> io::Result<Child> {
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        if let Some(pid) = child.id() {
            self.pids
                .lock()
                .expect("exit group lock poisoned")
                .push(pid);
        }
        Ok(child)
    }

    /// Kill every process tree spawned through this group.
    pub fn dispose(&self) {
        let pids: Vec<u32> = self
            .pids
            .lock()
            .expect("exit group lock poisoned")
            .drain(..)
            .collect();
        for pid in pids {
            debug!("disposing process group {pid}");
            kill_tree(pid);
        }
    }
}

#[cfg(unix)]
fn kill_tree(pid: u32) {
    // setpgid(0, 0) in the pre-exec hook made pid the group leader.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_tree(pid: u32) {
    // Best effort: ask the OS to take the whole tree down.
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
}
