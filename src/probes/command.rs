//! Shell command probe.
//!
//! Runs the target through the platform shell under an [`ExitGroup`] so
//! that the hard timeout can reliably kill the whole descendant tree.
//! Unlike the network probes, `delay` is reported in *seconds*.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::{ExitGroup, ProbeReport, COMMAND_TIMEOUT};

/// Payload reported when the command outlives its deadline.
pub const TIMEOUT_MESSAGE: &str = "任务执行超时\n";

pub async fn probe(target: &str) -> ProbeReport {
    run_with_timeout(target, COMMAND_TIMEOUT).await
}

fn shell_command(target: &str) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/c").arg(target);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(target);
        cmd
    };
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null());
    cmd
}

async fn run_with_timeout(target: &str, limit: Duration) -> ProbeReport {
    let start = Instant::now();

    let group = match ExitGroup::new() {
        Ok(group) => group,
        // Group creation failure is reported as the probe result.
        Err(err) => return ProbeReport::failure(err.to_string()),
    };

    let mut cmd = shell_command(target);
    let child = match group.spawn(&mut cmd) {
        Ok(child) => child,
        Err(err) => {
            return ProbeReport {
                delay: start.elapsed().as_secs_f32(),
                successful: false,
                data: err.to_string(),
            }
        }
    };

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Err(_) => {
            group.dispose();
            ProbeReport {
                delay: start.elapsed().as_secs_f32(),
                successful: false,
                data: TIMEOUT_MESSAGE.to_string(),
            }
        }
        Ok(Err(err)) => ProbeReport {
            delay: start.elapsed().as_secs_f32(),
            successful: false,
            data: err.to_string(),
        },
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if output.status.success() {
                ProbeReport {
                    delay: start.elapsed().as_secs_f32(),
                    successful: true,
                    data: stdout,
                }
            } else {
                ProbeReport {
                    delay: start.elapsed().as_secs_f32(),
                    successful: false,
                    data: format!("{}\n{}", stdout, output.status),
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_exit_captures_stdout() {
        let report = probe("echo hello").await;
        assert!(report.successful);
        assert_eq!(report.data, "hello\n");
        assert!(report.delay >= 0.0);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stdout_and_status() {
        let report = probe("echo partial; exit 3").await;
        assert!(!report.successful);
        assert!(report.data.starts_with("partial\n"));
        assert!(report.data.contains('3'));
    }

    #[tokio::test]
    async fn timeout_disposes_group_and_reports_marker() {
        let report = run_with_timeout("sleep 30", Duration::from_millis(200)).await;
        assert!(!report.successful);
        assert_eq!(report.data, TIMEOUT_MESSAGE);
        // Seconds, not milliseconds.
        assert!(report.delay < 5.0);
    }
}
