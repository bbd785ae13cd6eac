//! Gateway server binary.

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use diener::config::{CacheConfig, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "diener")]
#[command(about = "HTTP gateway serving S3 objects routed by cluster ingress rules")]
struct Args {
    /// Path to Kubernetes config file (unset for in-cluster discovery)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Listen address
    #[arg(long, default_value = ":8282")]
    listen: String,

    /// Set debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = GatewayConfig {
        listen: args.listen,
        kubeconfig: args.kubeconfig.filter(|path| !path.as_os_str().is_empty()),
        debug: args.debug,
        cache: CacheConfig::default(),
    };

    info!(listen = %config.listen, "starting diener gateway");
    diener::run(config).await?;
    Ok(())
}
