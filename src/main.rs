use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use rudis::config::Config;
use rudis::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::parse();
    Server::new(config).run().await
}
