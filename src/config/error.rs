use thiserror::Error;
use tracing_subscriber::util::TryInitError;

pub type Result<T> = std::result::Result<T, ErrorConfig>;

#[derive(Error, Debug)]
pub enum ErrorConfig {
    #[error(transparent)]
    Tracing(#[from] TryInitError),

    #[error("invalid duration {0:?}: {1}")]
    InvalidDuration(String, &'static str),

    #[error("unknown exchange type {0:?} (expected direct|fanout|topic|headers|x-custom)")]
    InvalidExchangeType(String),
}
