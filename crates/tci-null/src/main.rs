use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tci_client::HttpQueueClient;
use tci_core::{Config, Entrypoint};
use tci_null::NullRunner;
use tci_observe::init_logger;

/// Accept tinyci jobs and randomly pass or fail them.
///
/// This runner is used operationally to exercise a queue deployment
/// without running anything.
#[derive(Parser)]
#[command(name = "null-runner", version)]
struct Args {
    /// Location of configuration file
    #[arg(short, long, default_value = "/etc/tinyci/runner.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config: Config = Config::load_file(&args.config)?;
    config.resolve_hostname()?;
    init_logger(&config.log)?;

    let queue = Arc::new(HttpQueueClient::new(
        &config.clients.queuesvc,
        &config.clients.tls,
    )?);

    let runner = NullRunner::new(config);
    tci_core::run(Entrypoint::new(runner, queue)).await?;

    Ok(())
}
