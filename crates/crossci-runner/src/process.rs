//! Process-group teardown for step commands.
//!
//! Each step command leads its own process group, so everything it starts
//! (test binaries, the command behind `sudo`) can be signalled together.
//! Dropping a [`ProcessGroup`] ends the group: `SIGTERM` first, so an
//! elevation program can relay it, then `SIGKILL` after a short grace period.

use std::time::Duration;
use tokio::process::Command;

/// Time between `SIGTERM` and `SIGKILL` when tearing a group down.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Put the command in a fresh process group it leads.
pub fn isolate(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(not(unix))]
    command.kill_on_drop(true);
}

/// Ends the process group of a spawned step when dropped.
#[derive(Debug)]
pub struct ProcessGroup {
    #[cfg(unix)]
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    /// Track the group led by the process with id `pid`.
    #[cfg(unix)]
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    #[cfg(not(unix))]
    pub fn new(_pid: Option<u32>) -> Self {
        Self {}
    }

    /// Leave the group alone on drop.
    pub fn release(&mut self) {
        #[cfg(unix)]
        {
            self.pgid = None;
        }
    }

    /// Signal every process still in the group. Later calls are no-ops.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            tracing::debug!(pgid, "Terminating step process group");
            signal_group(pgid, libc::SIGTERM);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        tokio::time::sleep(KILL_GRACE).await;
                        signal_group(pgid, libc::SIGKILL);
                    });
                }
                Err(_) => signal_group(pgid, libc::SIGKILL),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: killpg only delivers a signal; a group that is already gone
    // yields ESRCH, which is ignored.
    unsafe {
        libc::killpg(pgid, signal);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_terminate_reaches_grandchildren() {
        // The background `sleep` inherits stdout; EOF only arrives once it dies too.
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("sleep 30 & wait")
            .stdout(Stdio::piped());
        isolate(&mut command);

        let mut child = command.spawn().unwrap();
        let mut stdout = child.stdout.take().unwrap();
        let mut group = ProcessGroup::new(child.id());

        tokio::time::sleep(Duration::from_millis(100)).await;
        group.terminate();

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut buf)).await;
        assert!(read.is_ok(), "group members still hold the pipe");
        let _ = child.wait().await;
    }
}
