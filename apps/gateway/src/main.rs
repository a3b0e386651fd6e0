use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use venue_gateway::{Args, Config, Gateway, shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Venue Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(args)?;
    let gateway = Gateway::bind(config).await?;
    gateway.run(shutdown_signal()).await
}
