use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tci_client::{HttpAssetClient, HttpQueueClient};
use tci_core::Entrypoint;
use tci_docker::{DockerConfig, DockerEngine, DockerRunner};
use tci_observe::init_logger;

/// Run tinyci jobs with overlayfs and docker.
///
/// This runner provides a docker interface to running tinyci builds.
/// It also leverages an overlayfs backend and git cache to make clones
/// fast.
#[derive(Parser)]
#[command(name = "overlay-runner", version)]
struct Args {
    /// Location of configuration file
    #[arg(short, long, default_value = "/etc/tinyci/runner.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = DockerConfig::load(&args.config)?;
    init_logger(&config.base.log)?;

    let queue = Arc::new(HttpQueueClient::new(
        &config.base.clients.queuesvc,
        &config.base.clients.tls,
    )?);
    let asset = Arc::new(HttpAssetClient::new(
        &config.base.clients.assetsvc,
        &config.base.clients.tls,
    )?);
    let engine = Arc::new(DockerEngine::from_env()?);

    let runner = DockerRunner::new(config, engine, asset);
    tci_core::run(Entrypoint::new(runner, queue)).await?;

    Ok(())
}
