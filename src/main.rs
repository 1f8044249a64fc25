//! omnicastd: the streaming engine server binary

use omnicast::config::Config;
use omnicast::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        threads = config.num_threads,
        max_connections = config.max_connections,
        request = %config.request_addr,
        publish = %config.publish_addr,
        "starting omnicast"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.num_threads)
        .enable_all()
        .build()?;

    let engine = Runtime::new(config)?;
    runtime.block_on(engine.serve())?;
    Ok(())
}
