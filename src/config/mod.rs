pub mod cli;
pub mod duration;
pub mod error;
pub mod rabbit;

use dotenv::dotenv;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{cli::Opt, error::Result, rabbit::ConsumerConfig};

/// Loads `.env`, installs the stderr log subscriber and merges
/// environment settings with command-line overrides.
pub fn init(opt: Opt) -> Result<ConsumerConfig> {
    dotenv().ok();
    init_tracing()?;

    info!("Starting idle consumer");

    let mut config = ConsumerConfig::from_env()?;
    opt.apply(&mut config);
    debug!("Resolved config: {:?}", config);

    Ok(config)
}

/// Installs the global subscriber; stdout stays reserved for message bodies.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish()
        .try_init()?;
    Ok(())
}
