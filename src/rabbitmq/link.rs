use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::error::ErrorConfig;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    #[error("{0}")]
    Broker(String),
}

/// Stream of deliveries for one subscription. Ends once the subscription is
/// cancelled or the connection goes away.
pub type Deliveries<D> = BoxStream<'static, Result<D, LinkError>>;

/// Routing algorithm of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
    /// Plugin-provided type, always `x-` prefixed.
    Custom(String),
}

impl FromStr for ExchangeType {
    type Err = ErrorConfig;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "fanout" => Ok(Self::Fanout),
            "topic" => Ok(Self::Topic),
            "headers" => Ok(Self::Headers),
            custom if custom.len() > 2 && custom.starts_with("x-") => {
                Ok(Self::Custom(custom.to_string()))
            }
            other => Err(ErrorConfig::InvalidExchangeType(other.to_string())),
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Fanout => f.write_str("fanout"),
            Self::Topic => f.write_str("topic"),
            Self::Headers => f.write_str("headers"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// What the broker reported back from a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub messages: u32,
    pub consumers: u32,
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: BrokerConnection;

    async fn connect(&self, uri: &str) -> Result<Self::Connection, LinkError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    /// Fires once with the reason if the connection is closed by anything
    /// other than our own [`close`](Self::close).
    fn close_notice(&self) -> oneshot::Receiver<LinkError>;

    async fn open_channel(&self) -> Result<Self::Channel, LinkError>;

    async fn close(&self) -> Result<(), LinkError>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    type Delivery: BrokerDelivery;

    /// Durable, not auto-deleted, not internal.
    async fn declare_exchange(&self, name: &str, kind: &ExchangeType) -> Result<(), LinkError>;

    /// Durable, not auto-deleted, not exclusive.
    async fn declare_queue(&self, name: &str) -> Result<QueueInfo, LinkError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, key: &str) -> Result<(), LinkError>;

    /// Manual acknowledgment, not exclusive, local deliveries accepted.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Deliveries<Self::Delivery>, LinkError>;

    /// Waits for the broker to confirm the cancellation.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), LinkError>;
}

#[async_trait]
pub trait BrokerDelivery: Send + Sync + 'static {
    fn body(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    /// Acknowledges this delivery and every earlier unacknowledged one on
    /// the same channel.
    async fn ack_cumulative(&self) -> Result<(), LinkError>;
}
