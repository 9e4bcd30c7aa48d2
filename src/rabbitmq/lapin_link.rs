use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    Channel, Connection, ConnectionProperties, Event, ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::sync::oneshot;
use tracing::debug;

use crate::rabbitmq::link::{
    BrokerChannel, BrokerConnection, BrokerDelivery, Connector, Deliveries, ExchangeType,
    LinkError, QueueInfo,
};

/// Opens AMQP 0-9-1 connections through `lapin`.
#[derive(Clone, Default)]
pub struct LapinConnector {
    properties: ConnectionProperties,
}

#[async_trait]
impl Connector for LapinConnector {
    type Connection = LapinConnection;

    async fn connect(&self, uri: &str) -> Result<LapinConnection, LinkError> {
        let connection = Connection::connect(uri, self.properties.clone()).await?;
        Ok(LapinConnection { connection })
    }
}

pub struct LapinConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    fn close_notice(&self) -> oneshot::Receiver<LinkError> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(forward_first_error(self.connection.events_listener(), tx));
        rx
    }

    async fn open_channel(&self) -> Result<LapinChannel, LinkError> {
        let channel = self.connection.create_channel().await?;
        Ok(LapinChannel { channel })
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.connection.close(200, "Normal shutdown").await?;
        Ok(())
    }
}

/// Sends the first connection error, if any, to `tx`. Returns early once the
/// receiving side is dropped.
async fn forward_first_error<S>(events: S, mut tx: oneshot::Sender<LinkError>)
where
    S: Stream<Item = Event> + Send,
{
    futures::pin_mut!(events);
    let first_error = loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Event::Error(err)) => break Some(err),
                Some(event) => debug!("Connection event: {:?}", event),
                None => break None,
            },
            _ = tx.closed() => break None,
        }
    };
    if let Some(err) = first_error {
        let _ = tx.send(LinkError::from(err));
    }
}

pub struct LapinChannel {
    channel: Channel,
}

fn exchange_kind(kind: &ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Headers => ExchangeKind::Headers,
        ExchangeType::Custom(name) => ExchangeKind::Custom(name.clone()),
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    type Delivery = LapinDelivery;

    async fn declare_exchange(&self, name: &str, kind: &ExchangeType) -> Result<(), LinkError> {
        self.channel
            .exchange_declare(
                name,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<QueueInfo, LinkError> {
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(QueueInfo {
            name: queue.name().as_str().to_string(),
            messages: queue.message_count(),
            consumers: queue.consumer_count(),
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, key: &str) -> Result<(), LinkError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Deliveries<LapinDelivery>, LinkError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    no_local: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer
            .map(|delivery| delivery.map(LapinDelivery).map_err(LinkError::from))
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), LinkError> {
        debug!("Cancelling consumer {}", consumer_tag);
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await?;
        Ok(())
    }
}

pub struct LapinDelivery(Delivery);

#[async_trait]
impl BrokerDelivery for LapinDelivery {
    fn body(&self) -> &[u8] {
        &self.0.data
    }

    fn delivery_tag(&self) -> u64 {
        self.0.delivery_tag
    }

    async fn ack_cumulative(&self) -> Result<(), LinkError> {
        self.0.ack(BasicAckOptions { multiple: true }).await?;
        Ok(())
    }
}
