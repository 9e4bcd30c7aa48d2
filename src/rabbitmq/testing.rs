//! In-memory broker for driving the consumer lifecycle in tests.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::sync::{mpsc, oneshot};

use crate::rabbitmq::error::Stage;
use crate::rabbitmq::handler::LineSink;
use crate::rabbitmq::link::{
    BrokerChannel, BrokerConnection, BrokerDelivery, Connector, Deliveries, ExchangeType,
    LinkError, QueueInfo,
};

type Feed = mpsc::UnboundedSender<Result<MockDelivery, LinkError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    OpenChannel,
    DeclareExchange(String, ExchangeType),
    DeclareQueue(String),
    BindQueue {
        queue: String,
        exchange: String,
        key: String,
    },
    Consume {
        queue: String,
        tag: String,
    },
    Cancel(String),
    Close,
    Ack {
        delivery_tag: u64,
        multiple: bool,
    },
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    fail_at: Option<Stage>,
    fail_ack: bool,
    pending: Vec<Vec<u8>>,
    feed: Option<Feed>,
    close_notice: Option<oneshot::Sender<LinkError>>,
    next_tag: u64,
}

/// Records every call, fails at a scripted stage and feeds pre-loaded
/// bodies to the first subscription.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<State>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(self, stage: Stage) -> Self {
        self.state().fail_at = Some(stage);
        self
    }

    pub fn fail_ack(self) -> Self {
        self.state().fail_ack = true;
        self
    }

    pub fn with_deliveries(self, bodies: &[&str]) -> Self {
        self.state()
            .pending
            .extend(bodies.iter().map(|body| body.as_bytes().to_vec()));
        self
    }

    /// Delivers `body` to the live subscription, or queues it for the next.
    pub fn publish(&self, body: &[u8]) {
        let mut state = self.state();
        match state.feed.clone() {
            Some(feed) => {
                let delivery = state.next_delivery(self, body.to_vec());
                let _ = feed.send(Ok(delivery));
            }
            None => state.pending.push(body.to_vec()),
        }
    }

    /// Simulates the broker dropping the connection: the close notice fires
    /// and the subscription sees one error before its stream ends.
    pub fn drop_connection(&self, reason: &str) {
        let mut state = self.state();
        if let Some(tx) = state.close_notice.take() {
            let _ = tx.send(LinkError::Broker(reason.to_string()));
        }
        if let Some(feed) = state.feed.take() {
            let _ = feed.send(Err(LinkError::Broker(reason.to_string())));
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn acks(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Ack { .. }))
            .cloned()
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call, stage: Option<Stage>) -> Result<(), LinkError> {
        let mut state = self.state();
        state.calls.push(call);
        match stage {
            Some(stage) if state.fail_at == Some(stage) => {
                Err(LinkError::Broker(format!("scripted {stage} failure")))
            }
            _ => Ok(()),
        }
    }
}

impl State {
    fn next_delivery(&mut self, broker: &MockBroker, body: Vec<u8>) -> MockDelivery {
        self.next_tag += 1;
        MockDelivery {
            tag: self.next_tag,
            body,
            broker: Some(broker.clone()),
        }
    }
}

#[async_trait]
impl Connector for MockBroker {
    type Connection = MockConnection;

    async fn connect(&self, uri: &str) -> Result<MockConnection, LinkError> {
        self.record(Call::Connect(uri.to_string()), Some(Stage::Connect))?;
        Ok(MockConnection {
            broker: self.clone(),
        })
    }
}

pub struct MockConnection {
    broker: MockBroker,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    type Channel = MockChannel;

    fn close_notice(&self) -> oneshot::Receiver<LinkError> {
        let (tx, rx) = oneshot::channel();
        self.broker.state().close_notice = Some(tx);
        rx
    }

    async fn open_channel(&self) -> Result<MockChannel, LinkError> {
        self.broker.record(Call::OpenChannel, Some(Stage::ChannelOpen))?;
        Ok(MockChannel {
            broker: self.broker.clone(),
        })
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.broker.state().feed = None;
        self.broker.record(Call::Close, Some(Stage::Close))
    }
}

pub struct MockChannel {
    broker: MockBroker,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    type Delivery = MockDelivery;

    async fn declare_exchange(&self, name: &str, kind: &ExchangeType) -> Result<(), LinkError> {
        self.broker.record(
            Call::DeclareExchange(name.to_string(), kind.clone()),
            Some(Stage::ExchangeDeclare),
        )
    }

    async fn declare_queue(&self, name: &str) -> Result<QueueInfo, LinkError> {
        self.broker
            .record(Call::DeclareQueue(name.to_string()), Some(Stage::QueueDeclare))?;
        let messages = self.broker.state().pending.len() as u32;
        Ok(QueueInfo {
            name: name.to_string(),
            messages,
            consumers: 0,
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, key: &str) -> Result<(), LinkError> {
        self.broker.record(
            Call::BindQueue {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                key: key.to_string(),
            },
            Some(Stage::QueueBind),
        )
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Deliveries<MockDelivery>, LinkError> {
        self.broker.record(
            Call::Consume {
                queue: queue.to_string(),
                tag: consumer_tag.to_string(),
            },
            Some(Stage::ConsumeStart),
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.broker.state();
        for body in std::mem::take(&mut state.pending) {
            let delivery = state.next_delivery(&self.broker, body);
            let _ = tx.send(Ok(delivery));
        }
        state.feed = Some(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), LinkError> {
        self.broker
            .record(Call::Cancel(consumer_tag.to_string()), Some(Stage::Cancel))?;
        self.broker.state().feed = None;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockDelivery {
    tag: u64,
    body: Vec<u8>,
    broker: Option<MockBroker>,
}

impl MockDelivery {
    /// A delivery not attached to any broker; acks succeed silently.
    pub fn detached(tag: u64, body: &[u8]) -> Self {
        Self {
            tag,
            body: body.to_vec(),
            broker: None,
        }
    }
}

impl std::fmt::Debug for MockBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MockBroker")
    }
}

#[async_trait]
impl BrokerDelivery for MockDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    async fn ack_cumulative(&self) -> Result<(), LinkError> {
        let Some(broker) = &self.broker else {
            return Ok(());
        };
        let fail = broker.state().fail_ack;
        broker.record(
            Call::Ack {
                delivery_tag: self.tag,
                multiple: true,
            },
            None,
        )?;
        if fail {
            return Err(LinkError::Broker("PRECONDITION_FAILED - unknown delivery tag".into()));
        }
        Ok(())
    }
}

/// Collects emitted lines; `failing()` rejects every write.
#[derive(Clone, Default)]
pub struct CollectSink {
    lines: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl CollectSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl LineSink for CollectSink {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}
