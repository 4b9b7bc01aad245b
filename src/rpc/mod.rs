//! RPC plumbing shared by the agent and the hub.
//!
//! The transport is plaintext; authentication is a `client-secret`
//! metadata entry attached to every call by the agent-side interceptor,
//! together with an `agent-id` identifying the reporting session.

use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::{ProbeKind, Task, TaskResult};

pub mod server;

#[allow(clippy::all)]
pub mod proto {
    tonic::include_proto!("vigil.v1");
}

pub use proto::vigil_service_client::VigilServiceClient;
pub use proto::vigil_service_server::{VigilService, VigilServiceServer};

/// Metadata key carrying the shared client secret.
pub const CLIENT_SECRET_KEY: &str = "client-secret";

/// Metadata key carrying the agent's session id.
pub const AGENT_ID_KEY: &str = "agent-id";

/// Client handle with per-call credentials attached.
pub type AgentClient = VigilServiceClient<InterceptedService<Channel, AuthInterceptor>>;

/// Injects `client-secret` and `agent-id` metadata into every call.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    secret: MetadataValue<Ascii>,
    agent_id: MetadataValue<Ascii>,
}

impl AuthInterceptor {
    pub fn new(secret: &str, agent_id: u64) -> Result<Self, anyhow::Error> {
        Ok(Self {
            secret: secret
                .parse()
                .map_err(|_| anyhow::anyhow!("client secret is not valid metadata"))?,
            agent_id: agent_id
                .to_string()
                .parse()
                .map_err(|_| anyhow::anyhow!("agent id is not valid metadata"))?,
        })
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(CLIENT_SECRET_KEY, self.secret.clone());
        request
            .metadata_mut()
            .insert(AGENT_ID_KEY, self.agent_id.clone());
        Ok(request)
    }
}

/// Dial the coordinator and wrap the channel with per-call credentials.
pub async fn connect(server: &str, secret: &str, agent_id: u64) -> anyhow::Result<AgentClient> {
    let endpoint = Endpoint::from_shared(format!("http://{server}"))?;
    let channel = endpoint.connect().await?;
    let interceptor = AuthInterceptor::new(secret, agent_id)?;
    Ok(VigilServiceClient::with_interceptor(channel, interceptor))
}

/// Read the reporter's session id from request metadata. Zero when absent.
pub fn agent_id_from_metadata(metadata: &MetadataMap) -> u64 {
    metadata
        .get(AGENT_ID_KEY)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

impl From<Task> for proto::Task {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            kind: task.kind.as_u32(),
            data: task.data,
        }
    }
}

impl TryFrom<proto::Task> for Task {
    type Error = crate::UnknownProbeKind;

    fn try_from(task: proto::Task) -> Result<Self, Self::Error> {
        Ok(Self {
            id: task.id,
            kind: ProbeKind::try_from(task.kind)?,
            data: task.data,
        })
    }
}

impl From<TaskResult> for proto::TaskResult {
    fn from(result: TaskResult) -> Self {
        Self {
            id: result.id,
            kind: result.kind.as_u32(),
            delay: result.delay,
            successful: result.successful,
            data: result.data,
        }
    }
}

impl TryFrom<proto::TaskResult> for TaskResult {
    type Error = crate::UnknownProbeKind;

    fn try_from(result: proto::TaskResult) -> Result<Self, Self::Error> {
        Ok(Self {
            id: result.id,
            kind: ProbeKind::try_from(result.kind)?,
            delay: result.delay,
            successful: result.successful,
            data: result.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interceptor_attaches_credentials() {
        let mut interceptor = AuthInterceptor::new("sekrit", 42).unwrap();
        let request = interceptor.call(Request::new(())).unwrap();

        assert_eq!(
            request.metadata().get(CLIENT_SECRET_KEY).unwrap(),
            "sekrit"
        );
        assert_eq!(agent_id_from_metadata(request.metadata()), 42);
    }

    #[test]
    fn missing_agent_id_defaults_to_zero() {
        assert_eq!(agent_id_from_metadata(&MetadataMap::new()), 0);
    }

    #[test]
    fn task_conversion_rejects_unknown_kind() {
        let wire = proto::Task {
            id: 1,
            kind: 99,
            data: String::new(),
        };
        assert!(Task::try_from(wire).is_err());
    }
}
