use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use vigil::cache::{MemoryCache, StatsCache};
use vigil::notify::{LogNotifier, Notifier, WebhookNotifier};
use vigil::rpc::server::{AgentRegistry, HubService};
use vigil::rpc::VigilServiceServer;
use vigil::sentinel::ServiceSentinel;
use vigil::storage::{MonitorStore, SqliteStore};

#[derive(Debug, Clone, Parser)]
#[command(name = "hub", about = "vigil coordinator hub")]
struct Args {
    /// RPC listen address
    #[arg(short, long, default_value = "0.0.0.0:5555")]
    listen: SocketAddr,

    /// Client secret agents must present
    #[arg(short = 'p', long)]
    secret: String,

    /// SQLite database path
    #[arg(long, default_value = "vigil.db")]
    database: String,

    /// Webhook to deliver notifications to; logged locally when absent
    #[arg(long)]
    webhook: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init(debug: bool) {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![("vigil", level), ("hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.debug);
    trace!("started with args: {args:?}");

    let store: Arc<dyn MonitorStore> = Arc::new(SqliteStore::new(&args.database).await?);
    let cache: Arc<dyn StatsCache> = Arc::new(MemoryCache::new());
    let notifier: Arc<dyn Notifier> = match args.webhook.clone() {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    };

    let sentinel = ServiceSentinel::spawn(store, cache, notifier).await?;
    info!("service sentinel started");

    let registry = Arc::new(AgentRegistry::new());
    let service = HubService::new(args.secret.clone(), sentinel.clone(), registry);

    info!("hub listening on {}", args.listen);
    tonic::transport::Server::builder()
        .add_service(VigilServiceServer::new(service))
        .serve_with_shutdown(args.listen, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("unable to listen for shutdown signal: {err}");
            }
            info!("received shutdown signal");
        })
        .await?;

    sentinel.shutdown().await;
    info!("hub stopped");
    Ok(())
}
