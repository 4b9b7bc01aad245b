//! Self-update ticker.
//!
//! The update mechanism itself is an external collaborator behind
//! [`ReleaseChannel`]; the agent only owns the cadence: consult the
//! channel every twenty minutes and exit with code 1 once a newer binary
//! has been installed, so the supervisor restarts into it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

const UPDATE_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Exit code signalling the supervisor to restart the agent.
const RESTART_EXIT_CODE: i32 = 1;

/// An upstream release channel that can replace the running binary.
#[async_trait]
pub trait ReleaseChannel: Send + Sync {
    /// Check for a newer release and install it in place.
    ///
    /// Returns `true` when the binary was replaced and the process should
    /// restart to pick it up.
    async fn check_and_apply(&self, current_version: &str) -> anyhow::Result<bool>;
}

/// Run the ticker forever (or until an update lands).
pub async fn run(channel: Arc<dyn ReleaseChannel>, version: String) {
    let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
    loop {
        ticker.tick().await;
        if check_once(channel.as_ref(), &version).await {
            info!("binary updated, restarting");
            std::process::exit(RESTART_EXIT_CODE);
        }
    }
}

/// One update check. Returns true when the process should restart.
async fn check_once(channel: &dyn ReleaseChannel, version: &str) -> bool {
    debug!("checking for updates (current {version})");
    match channel.check_and_apply(version).await {
        Ok(updated) => updated,
        Err(err) => {
            warn!("update check failed: {err:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeChannel {
        calls: AtomicUsize,
        result: anyhow::Result<bool>,
    }

    impl FakeChannel {
        fn new(result: anyhow::Result<bool>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result,
            }
        }
    }

    #[async_trait]
    impl ReleaseChannel for FakeChannel {
        async fn check_and_apply(&self, _current_version: &str) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(updated) => Ok(*updated),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    #[tokio::test]
    async fn up_to_date_channel_does_not_restart() {
        let channel = FakeChannel::new(Ok(false));
        assert!(!check_once(&channel, "0.1.0").await);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn applied_update_requests_restart() {
        let channel = FakeChannel::new(Ok(true));
        assert!(check_once(&channel, "0.1.0").await);
    }

    #[tokio::test]
    async fn failed_check_is_swallowed() {
        let channel = FakeChannel::new(Err(anyhow::anyhow!("registry unreachable")));
        assert!(!check_once(&channel, "0.1.0").await);
    }
}
