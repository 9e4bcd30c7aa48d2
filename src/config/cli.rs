use std::time::Duration;
use structopt::StructOpt;

use crate::config::duration::parse_duration;
use crate::config::rabbit::ConsumerConfig;
use crate::rabbitmq::ExchangeType;

/// Command-line overrides. Anything left unset keeps the environment value.
#[derive(StructOpt, Debug)]
#[structopt(
    name = "idle_consumer",
    about = "Consume one queue bound to a durable exchange until it goes idle"
)]
pub struct Opt {
    /// AMQP URI
    #[structopt(long)]
    pub uri: Option<String>,
    /// Durable, non-auto-deleted AMQP exchange name
    #[structopt(long)]
    pub exchange: Option<String>,
    /// Exchange type - direct|fanout|topic|headers|x-custom
    #[structopt(long)]
    pub exchange_type: Option<ExchangeType>,
    /// Durable AMQP queue name
    #[structopt(long)]
    pub queue: Option<String>,
    /// AMQP binding key
    #[structopt(long)]
    pub key: Option<String>,
    /// AMQP consumer tag (a random one is generated when blank)
    #[structopt(long)]
    pub consumer_tag: Option<String>,
    /// Idle time to wait for data before shutting down, e.g. 100ms
    #[structopt(long, parse(try_from_str = parse_duration))]
    pub lifetime: Option<Duration>,
    /// Progress heartbeat while waiting for the idle period
    #[structopt(long, parse(try_from_str = parse_duration))]
    pub poll_interval: Option<Duration>,
    /// Absolute cap on the run, regardless of traffic
    #[structopt(long, parse(try_from_str = parse_duration))]
    pub max_runtime: Option<Duration>,
    /// Acknowledge on idle even if handling a delivery failed
    #[structopt(long)]
    pub ack_on_error: bool,
}

impl Opt {
    pub fn apply(self, config: &mut ConsumerConfig) {
        if let Some(uri) = self.uri {
            config.url = uri;
        }
        if let Some(exchange) = self.exchange {
            config.topology.exchange_name = exchange;
        }
        if let Some(exchange_type) = self.exchange_type {
            config.topology.exchange_type = exchange_type;
        }
        if let Some(queue) = self.queue {
            config.topology.queue_name = queue;
        }
        if let Some(key) = self.key {
            config.topology.routing_key = key;
        }
        if let Some(tag) = self.consumer_tag {
            config.consumer_tag = tag;
        }
        if let Some(lifetime) = self.lifetime {
            config.timing.lifetime = lifetime;
        }
        if let Some(poll_interval) = self.poll_interval {
            config.timing.poll_interval = poll_interval;
        }
        if self.max_runtime.is_some() {
            config.timing.max_runtime = self.max_runtime;
        }
        config.ack_on_error |= self.ack_on_error;
    }
}
