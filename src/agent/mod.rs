//! The probe agent.
//!
//! One outer loop walks Dialing → Registering → OpeningStream → Receiving;
//! any error at any stage drops the connection, sleeps a fixed ten
//! seconds, and redials. There is no exponential backoff; the
//! coordinator is expected to be reachable. Every inbound task runs in
//! its own task at whatever concurrency the coordinator's emission rate
//! implies; a failing probe is a report, never a reason to reconnect.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::probes;
use crate::rpc::{self, proto, AgentClient};
use crate::ProbeKind;

pub mod host;
pub mod updater;

pub use updater::ReleaseChannel;

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

pub struct Agent {
    server: String,
    secret: String,
    version: String,
    session_id: u64,
    release_channel: Option<Arc<dyn ReleaseChannel>>,
}

impl Agent {
    pub fn new(server: String, secret: String) -> Self {
        Self {
            server,
            secret,
            version: env!("CARGO_PKG_VERSION").to_string(),
            session_id: rand::random(),
            release_channel: None,
        }
    }

    /// Enable the self-update ticker against the given release channel.
    pub fn with_release_channel(mut self, channel: Arc<dyn ReleaseChannel>) -> Self {
        self.release_channel = Some(channel);
        self
    }

    /// Run forever. Only returns on task-spawn level failures, never on
    /// remote errors.
    pub async fn run(self) -> Result<()> {
        let (client_tx, client_rx) = watch::channel(None::<AgentClient>);

        tokio::spawn(host::report_state(client_rx, self.version.clone()));
        if let Some(channel) = self.release_channel.clone() {
            tokio::spawn(updater::run(channel, self.version.clone()));
        }

        loop {
            if let Err(err) = self.connect_and_receive(&client_tx).await {
                warn!("connection lost: {err:#}");
            }
            client_tx.send_replace(None);
            debug!(
                "reconnecting in {} seconds",
                RECONNECT_DELAY.as_secs()
            );
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_and_receive(
        &self,
        client_tx: &watch::Sender<Option<AgentClient>>,
    ) -> Result<()> {
        let mut client = rpc::connect(&self.server, &self.secret, self.session_id)
            .await
            .context("dial coordinator")?;

        let info = host::collect_host_info(&self.version);
        client
            .report_system_info(info.clone())
            .await
            .context("register host info")?;

        let mut tasks = client
            .request_task(info)
            .await
            .context("open task stream")?
            .into_inner();

        client_tx.send_replace(Some(client.clone()));
        info!("connected to coordinator, receiving tasks");

        while let Some(task) = tasks.message().await.context("receive task")? {
            let client = client.clone();
            tokio::spawn(run_task(client, task));
        }
        bail!("task stream closed by coordinator")
    }
}

/// Execute one task and report its result. Spawned per inbound task;
/// outlives the stream that delivered it.
async fn run_task(mut client: AgentClient, task: proto::Task) {
    let Ok(kind) = ProbeKind::try_from(task.kind) else {
        warn!("unknown probe kind {} in task {}", task.kind, task.id);
        return;
    };

    let report = probes::execute(kind, &task.data).await;
    debug!(
        task = task.id,
        ?kind,
        successful = report.successful,
        delay = report.delay,
        "probe finished"
    );

    let result = proto::TaskResult {
        id: task.id,
        kind: task.kind,
        delay: report.delay,
        successful: report.successful,
        data: report.data,
    };
    if let Err(status) = client.report_task(result).await {
        warn!("failed to report task {}: {status}", task.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_carries_crate_version() {
        let agent = Agent::new("localhost:5555".to_string(), "sekrit".to_string());
        assert_eq!(agent.version, env!("CARGO_PKG_VERSION"));
        assert!(agent.release_channel.is_none());
    }
}
