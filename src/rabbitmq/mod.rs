pub mod consumer;
pub mod driver;
pub mod error;
pub mod handler;
pub mod lapin_link;
pub mod link;

#[cfg(test)]
pub(crate) mod testing;

pub use consumer::Consumer;
pub use error::{ConsumerError, Stage};
pub use lapin_link::LapinConnector;
pub use link::{ExchangeType, LinkError};
