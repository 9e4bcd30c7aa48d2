use std::io;
use std::process::ExitCode;

use idle_consumer::config::{self, cli::Opt};
use idle_consumer::error::Result;
use idle_consumer::rabbitmq::{LapinConnector, driver};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use structopt::StructOpt;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    // Needed for amqps:// URIs
    _ = CryptoProvider::install_default(default_provider());

    match run(Opt::from_args()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(opt: Opt) -> Result<()> {
    let config = config::init(opt)?;

    let summary = driver::consume(&LapinConnector::default(), &config, io::stdout()).await?;

    info!(
        "Consumer stopped ({:?}, {} deliveries, ack {:?}). Goodbye!",
        summary.reason, summary.handled, summary.ack
    );
    Ok(())
}
