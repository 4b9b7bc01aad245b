//! Hub-side RPC service.
//!
//! Verifies the shared secret on every call, keeps a registry of connected
//! agents (their task streams), and forwards probe results into the
//! sentinel. Task *scheduling* lives outside; the registry only offers a
//! way to push a task to a connected agent.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use crate::sentinel::{ReportData, SentinelHandle};
use crate::{Task, TaskResult};

use super::{agent_id_from_metadata, proto, VigilService, CLIENT_SECRET_KEY};

const TASK_QUEUE_CAPACITY: usize = 32;

/// Connected agents and their task channels.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<u64, mpsc::Sender<proto::Task>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, agent_id: u64) -> mpsc::Receiver<proto::Task> {
        let (tx, rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .insert(agent_id, tx);
        rx
    }

    fn deregister(&self, agent_id: u64) {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .remove(&agent_id);
    }

    /// Push a task onto a connected agent's stream.
    pub async fn send_task(&self, agent_id: u64, task: Task) -> anyhow::Result<()> {
        let sender = self
            .agents
            .lock()
            .expect("agent registry lock poisoned")
            .get(&agent_id)
            .cloned()
            .ok_or_else(|| anyhow!("agent {agent_id} is not connected"))?;
        sender
            .send(task.into())
            .await
            .map_err(|_| anyhow!("agent {agent_id} went away"))
    }

    pub fn connected_agents(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .agents
            .lock()
            .expect("agent registry lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Task stream handed to an agent; deregisters the agent when dropped.
struct TaskStream {
    inner: ReceiverStream<proto::Task>,
    registry: Arc<AgentRegistry>,
    agent_id: u64,
}

impl Stream for TaskStream {
    type Item = Result<proto::Task, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|t| t.map(Ok))
    }
}

impl Drop for TaskStream {
    fn drop(&mut self) {
        debug!("agent {} disconnected", self.agent_id);
        self.registry.deregister(self.agent_id);
    }
}

/// The coordinator's implementation of the RPC surface.
pub struct HubService {
    secret: String,
    sentinel: SentinelHandle,
    registry: Arc<AgentRegistry>,
}

impl HubService {
    pub fn new(secret: String, sentinel: SentinelHandle, registry: Arc<AgentRegistry>) -> Self {
        Self {
            secret,
            sentinel,
            registry,
        }
    }

    fn authorize<T>(&self, request: &Request<T>) -> Result<u64, Status> {
        let presented = request
            .metadata()
            .get(CLIENT_SECRET_KEY)
            .and_then(|value| value.to_str().ok());
        if presented != Some(self.secret.as_str()) {
            return Err(Status::unauthenticated("invalid client secret"));
        }
        Ok(agent_id_from_metadata(request.metadata()))
    }
}

#[tonic::async_trait]
impl VigilService for HubService {
    async fn report_system_info(
        &self,
        request: Request<proto::HostInfo>,
    ) -> Result<Response<proto::Ack>, Status> {
        let agent_id = self.authorize(&request)?;
        let info = request.into_inner();
        debug!(
            agent_id,
            hostname = %info.hostname,
            version = %info.version,
            "agent registered host info"
        );
        Ok(Response::new(proto::Ack { accepted: true }))
    }

    async fn report_system_state(
        &self,
        request: Request<proto::StateSample>,
    ) -> Result<Response<proto::Ack>, Status> {
        let agent_id = self.authorize(&request)?;
        let sample = request.into_inner();
        tracing::trace!(
            agent_id,
            cpu = sample.cpu_percent,
            mem_used = sample.mem_used,
            "state sample"
        );
        Ok(Response::new(proto::Ack { accepted: true }))
    }

    type RequestTaskStream = Pin<Box<dyn Stream<Item = Result<proto::Task, Status>> + Send>>;

    #[instrument(skip_all)]
    async fn request_task(
        &self,
        request: Request<proto::HostInfo>,
    ) -> Result<Response<Self::RequestTaskStream>, Status> {
        let agent_id = self.authorize(&request)?;
        debug!(agent_id, "agent opened task stream");

        let rx = self.registry.register(agent_id);
        let stream = TaskStream {
            inner: ReceiverStream::new(rx),
            registry: Arc::clone(&self.registry),
            agent_id,
        };
        Ok(Response::new(Box::pin(stream)))
    }

    async fn report_task(
        &self,
        request: Request<proto::TaskResult>,
    ) -> Result<Response<proto::Ack>, Status> {
        let agent_id = self.authorize(&request)?;
        let result = match TaskResult::try_from(request.into_inner()) {
            Ok(result) => result,
            Err(err) => {
                warn!(agent_id, "dropping malformed task result: {err}");
                return Ok(Response::new(proto::Ack { accepted: false }));
            }
        };

        self.sentinel
            .dispatch(ReportData {
                result,
                reporter: agent_id,
            })
            .await;
        Ok(Response::new(proto::Ack { accepted: true }))
    }
}
