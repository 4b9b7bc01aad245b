//! Full round trip over a real gRPC connection: an authenticated client
//! opens the task stream, the hub pushes a probe task, the probe runs,
//! and the reported result lands in the sentinel.

use std::sync::Arc;

use tokio_stream::wrappers::TcpListenerStream;
use vigil::cache::MemoryCache;
use vigil::notify::LogNotifier;
use vigil::probes;
use vigil::rpc::server::{AgentRegistry, HubService};
use vigil::rpc::{self, proto, VigilServiceServer};
use vigil::sentinel::{SentinelHandle, ServiceSentinel};
use vigil::storage::{MemoryStore, MonitorStore};
use vigil::{Monitor, ProbeKind, Task};

const SECRET: &str = "integration-secret";
const AGENT_ID: u64 = 77;

async fn start_hub() -> (std::net::SocketAddr, Arc<AgentRegistry>, SentinelHandle) {
    let store = Arc::new(MemoryStore::new());
    store.add_monitor(Monitor {
        id: 1,
        name: "tcp-check".to_string(),
        target: "127.0.0.1:1".to_string(),
        kind: ProbeKind::TcpPing,
        notify: false,
    });

    let sentinel = ServiceSentinel::spawn(
        Arc::clone(&store) as Arc<dyn MonitorStore>,
        Arc::new(MemoryCache::new()),
        Arc::new(LogNotifier),
    )
    .await
    .expect("spawn sentinel");

    let registry = Arc::new(AgentRegistry::new());
    let service = HubService::new(SECRET.to_string(), sentinel.clone(), Arc::clone(&registry));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind hub listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(VigilServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    (addr, registry, sentinel)
}

#[tokio::test]
async fn task_stream_round_trip_feeds_the_sentinel() {
    let (addr, registry, sentinel) = start_hub().await;

    let mut client = rpc::connect(&addr.to_string(), SECRET, AGENT_ID)
        .await
        .expect("dial hub");

    let info = proto::HostInfo {
        hostname: "test-agent".to_string(),
        version: "0.0.0".to_string(),
        ..Default::default()
    };
    let ack = client
        .report_system_info(info.clone())
        .await
        .expect("register")
        .into_inner();
    assert!(ack.accepted);

    let mut tasks = client
        .request_task(info)
        .await
        .expect("open task stream")
        .into_inner();
    // The stream registration races the send below; wait for the registry.
    for _ in 0..50 {
        if !registry.connected_agents().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(registry.connected_agents(), vec![AGENT_ID]);

    registry
        .send_task(
            AGENT_ID,
            Task {
                id: 1,
                kind: ProbeKind::TcpPing,
                data: "127.0.0.1:1".to_string(),
            },
        )
        .await
        .expect("push task");

    let task = tasks.message().await.expect("receive").expect("task");
    assert_eq!(task.id, 1);

    // What the agent's task worker does: execute, then report.
    let kind = ProbeKind::try_from(task.kind).unwrap();
    let report = probes::execute(kind, &task.data).await;
    assert!(!report.successful);
    assert!(!report.data.is_empty());

    client
        .report_task(proto::TaskResult {
            id: task.id,
            kind: task.kind,
            delay: report.delay,
            successful: report.successful,
            data: report.data,
        })
        .await
        .expect("report task");

    let snapshot = sentinel.live_snapshot().await;
    assert_eq!(snapshot.today[&1].down, 1);
    assert_eq!(snapshot.current_down[&1], 1);

    drop(tasks);
    sentinel.shutdown().await;
}

#[tokio::test]
async fn wrong_secret_is_rejected_at_the_door() {
    let (addr, _registry, sentinel) = start_hub().await;

    let mut client = rpc::connect(&addr.to_string(), "not-the-secret", AGENT_ID)
        .await
        .expect("dial hub");

    let err = client
        .report_system_info(proto::HostInfo::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unauthenticated);
    sentinel.shutdown().await;
}
