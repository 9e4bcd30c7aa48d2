use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::rabbit::{ConsumerConfig, Topology};
use crate::rabbitmq::error::{ConsumerError, Result, Stage};
use crate::rabbitmq::handler::{self, HandleSummary, IdleReport, LineSink};
use crate::rabbitmq::link::{
    BrokerChannel, BrokerConnection, Connector, Deliveries, LinkError,
};

/// Delivery type produced by a connection's channel.
pub type DeliveryOf<C> = <<C as BrokerConnection>::Channel as BrokerChannel>::Delivery;

/// One live subscription: connection, channel, handling loop and the
/// watcher for unsolicited connection closure.
///
/// Created by [`Consumer::start`] and torn down by [`Consumer::shutdown`],
/// which takes the consumer by value and so runs at most once.
pub struct Consumer<C: BrokerConnection> {
    tag: String,
    connection: C,
    channel: C::Channel,
    handler: JoinHandle<Result<HandleSummary>>,
    idle_rx: Option<oneshot::Receiver<IdleReport<DeliveryOf<C>>>>,
    watcher: CloseWatcher,
}

impl<C: BrokerConnection> Consumer<C> {
    /// Connects, declares the topology, subscribes and spawns the handling
    /// loop. If any step after connecting fails the connection is closed
    /// before the error is returned.
    pub async fn start<K, S>(connector: &K, config: &ConsumerConfig, sink: S) -> Result<Self>
    where
        K: Connector<Connection = C>,
        S: LineSink,
    {
        validate(config)?;
        let tag = resolve_tag(&config.consumer_tag);

        info!("🐰 Dialing {}", config.url);
        let connection = connector
            .connect(&config.url)
            .await
            .map_err(|source| ConsumerError::Connection {
                stage: Stage::Connect,
                source,
            })?;

        let watcher = CloseWatcher::spawn(connection.close_notice());
        info!("✅ Got connection, opening channel");

        let (channel, deliveries) =
            match Self::subscribe(&connection, &config.topology, &tag).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!("❌ Setup failed at {}, closing connection", e);
                    watcher.stop().await;
                    if let Err(close_err) = connection.close().await {
                        warn!("Failed to close connection after setup error: {}", close_err);
                    }
                    return Err(e);
                }
            };

        let (idle_tx, idle_rx) = oneshot::channel();
        let handler = tokio::spawn(handler::handle(deliveries, sink, config.timing, idle_tx));

        info!("🚀 Consumer {} started", tag);
        Ok(Self {
            tag,
            connection,
            channel,
            handler,
            idle_rx: Some(idle_rx),
            watcher,
        })
    }

    async fn subscribe(
        connection: &C,
        topology: &Topology,
        tag: &str,
    ) -> Result<(C::Channel, Deliveries<DeliveryOf<C>>)> {
        let topology_error =
            |stage: Stage| move |source: LinkError| ConsumerError::Topology { stage, source };

        let channel = connection
            .open_channel()
            .await
            .map_err(|source| ConsumerError::Connection {
                stage: Stage::ChannelOpen,
                source,
            })?;

        info!(
            "✅ Got channel, declaring exchange {} ({})",
            topology.exchange_name, topology.exchange_type
        );
        channel
            .declare_exchange(&topology.exchange_name, &topology.exchange_type)
            .await
            .map_err(topology_error(Stage::ExchangeDeclare))?;

        debug!("✅ Declared exchange, declaring queue {}", topology.queue_name);
        let queue = channel
            .declare_queue(&topology.queue_name)
            .await
            .map_err(topology_error(Stage::QueueDeclare))?;

        info!(
            "✅ Declared queue {} ({} messages, {} consumers), binding to exchange with key {:?}",
            queue.name, queue.messages, queue.consumers, topology.routing_key
        );
        channel
            .bind_queue(&queue.name, &topology.exchange_name, &topology.routing_key)
            .await
            .map_err(topology_error(Stage::QueueBind))?;

        info!("🔍 Queue bound, starting consume (consumer tag {:?})", tag);
        let deliveries = channel
            .consume(&queue.name, tag)
            .await
            .map_err(ConsumerError::ConsumeStart)?;

        Ok((channel, deliveries))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Resolves once the handling loop reports its tail: idle lifetime
    /// elapsed, deadline passed or stream closed. Yields `None` on a second
    /// call or if the handling loop died without reporting.
    pub async fn wait_idle(&mut self) -> Option<IdleReport<DeliveryOf<C>>> {
        let rx = self.idle_rx.take()?;
        rx.await.ok()
    }

    /// Cancels the subscription, closes the connection and waits for the
    /// handling loop to drain. The connection is closed even if the cancel
    /// fails; the first error is returned.
    pub async fn shutdown(self) -> Result<HandleSummary> {
        let Self {
            tag,
            connection,
            channel,
            handler,
            watcher,
            ..
        } = self;

        let cancelled = channel.cancel(&tag).await.map_err(|source| ConsumerError::Shutdown {
            stage: Stage::Cancel,
            source,
        });
        if let Err(e) = &cancelled {
            error!("❌ Consumer cancel failed: {}", e);
        }

        watcher.stop().await;

        if let Err(source) = connection.close().await {
            error!("❌ AMQP connection close error: {}", source);
            // The stream may never end on a half-closed connection.
            handler.abort();
            cancelled?;
            return Err(ConsumerError::Shutdown {
                stage: Stage::Close,
                source,
            });
        }
        info!("✅ AMQP connection closed");

        let drained = handler.await;
        cancelled?;
        let summary = drained??;
        info!("AMQP shutdown OK ({} deliveries handled)", summary.handled);
        Ok(summary)
    }
}

fn validate(config: &ConsumerConfig) -> Result<()> {
    if config.url.trim().is_empty() {
        return Err(ConsumerError::InvalidArgument("broker URI"));
    }
    if config.topology.exchange_name.is_empty() {
        return Err(ConsumerError::InvalidArgument("exchange name"));
    }
    if config.topology.queue_name.is_empty() {
        return Err(ConsumerError::InvalidArgument("queue name"));
    }
    Ok(())
}

/// A blank tag would leave nothing to cancel by, so one is generated.
fn resolve_tag(tag: &str) -> String {
    if tag.trim().is_empty() {
        let generated = format!("ctag-{}", Uuid::new_v4());
        warn!("Blank consumer tag, using {}", generated);
        generated
    } else {
        tag.to_string()
    }
}

/// Logs unsolicited connection closure until told to stop.
struct CloseWatcher {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CloseWatcher {
    fn spawn(notice: oneshot::Receiver<LinkError>) -> Self {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            tokio::select! {
                reason = notice => {
                    if let Ok(reason) = reason {
                        warn!("⚠️ Connection closing: {}", reason);
                    }
                }
                _ = stopped => debug!("Close watcher stopped"),
            }
        });
        Self { stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Close watcher ended abnormally: {}", e);
        }
    }
}
