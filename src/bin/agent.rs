use clap::{CommandFactory, Parser};
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use vigil::agent::Agent;

#[derive(Debug, Clone, Parser)]
#[command(name = "agent", about = "vigil probe agent")]
struct Args {
    /// Coordinator RPC address (host:port)
    #[arg(short = 's')]
    server: Option<String>,

    /// Client secret for the coordinator
    #[arg(short = 'p')]
    secret: Option<String>,

    /// Enable debug logging
    #[arg(short = 'd')]
    debug: bool,

    /// Accepted for compatibility with older deployments; ignored
    #[arg(short = 'i', hide = true)]
    legacy: Option<String>,
}

fn init(debug: bool) {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![("vigil", level), ("agent", level)]);
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

    let (Some(server), Some(secret)) = (args.server.clone(), args.secret.clone()) else {
        Args::command().print_help()?;
        std::process::exit(2);
    };

    Agent::new(server, secret).run().await
}
