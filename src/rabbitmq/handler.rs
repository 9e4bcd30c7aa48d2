use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::config::rabbit::Timing;
use crate::rabbitmq::error::{ConsumerError, Result};
use crate::rabbitmq::link::{BrokerDelivery, Deliveries};

/// Replaces every run of TAB, CR and LF with a single space.
pub fn normalize(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if matches!(c, '\t' | '\r' | '\n') {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Destination for normalized message bodies, one per line.
pub trait LineSink: Send + 'static {
    fn emit(&mut self, line: &str) -> io::Result<()>;
}

impl LineSink for io::Stdout {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        let mut out = self.lock();
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

/// Why the handling loop handed its tail to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// No delivery for a full lifetime.
    Idle,
    /// The absolute run deadline passed.
    Deadline,
    /// The delivery stream ended before either timer fired.
    StreamClosed,
}

/// Snapshot of the most recent delivery, sent once to the idle driver.
pub struct IdleReport<D> {
    pub reason: IdleReason,
    pub last: Option<Arc<D>>,
    pub last_at: Option<DateTime<Utc>>,
    pub handled: u64,
    /// A sink write or stream error happened before the snapshot.
    pub failed: bool,
}

/// Terminal value of a cleanly finished handling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSummary {
    pub handled: u64,
}

struct Tail<D> {
    last: Option<Arc<D>>,
    last_at: Option<DateTime<Utc>>,
    handled: u64,
    failed: bool,
}

impl<D> Tail<D> {
    fn new() -> Self {
        Self {
            last: None,
            last_at: None,
            handled: 0,
            failed: false,
        }
    }

    fn record(&mut self, delivery: Arc<D>) {
        self.last = Some(delivery);
        self.last_at = Some(Utc::now());
        self.handled += 1;
    }

    fn report(&self, reason: IdleReason) -> IdleReport<D> {
        IdleReport {
            reason,
            last: self.last.clone(),
            last_at: self.last_at,
            handled: self.handled,
            failed: self.failed,
        }
    }
}

/// Drains `deliveries` into `sink` until the stream closes.
///
/// The idle timer restarts on every delivery. When it (or the optional
/// deadline) fires, the tail is sent on `idle_tx` and draining continues;
/// nothing is acknowledged here.
pub async fn handle<D, S>(
    mut deliveries: Deliveries<D>,
    mut sink: S,
    timing: Timing,
    idle_tx: oneshot::Sender<IdleReport<D>>,
) -> Result<HandleSummary>
where
    D: BrokerDelivery,
    S: LineSink,
{
    info!("📥 Starting delivery handling loop...");

    let mut tail = Tail::new();
    let mut idle_tx = Some(idle_tx);
    let mut stream_error = None;

    let idle = sleep(timing.lifetime);
    tokio::pin!(idle);
    let deadline = timing.max_runtime.map(|max| Instant::now() + max);
    let deadline_timer = sleep_until(deadline.unwrap_or_else(Instant::now));
    tokio::pin!(deadline_timer);

    loop {
        tokio::select! {
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => {
                    trace!("Delivery {} ({} bytes)", delivery.delivery_tag(), delivery.body().len());
                    if let Err(e) = sink.emit(&normalize(delivery.body())) {
                        error!("❌ Failed to write delivery {}: {}", delivery.delivery_tag(), e);
                        tail.failed = true;
                    }
                    tail.record(Arc::new(delivery));
                    idle.as_mut().reset(Instant::now() + timing.lifetime);
                }
                Some(Err(e)) => {
                    error!("❌ Error receiving delivery: {}", e);
                    tail.failed = true;
                    stream_error.get_or_insert(e);
                }
                None => break,
            },
            _ = &mut idle, if idle_tx.is_some() => {
                debug!("No delivery for {:?}", timing.lifetime);
                send_report(&mut idle_tx, tail.report(IdleReason::Idle));
            }
            _ = &mut deadline_timer, if deadline.is_some() && idle_tx.is_some() => {
                warn!("Run deadline reached after {:?}", timing.max_runtime);
                send_report(&mut idle_tx, tail.report(IdleReason::Deadline));
            }
        }
    }

    info!("handle: deliveries stream closed after {} deliveries", tail.handled);
    send_report(&mut idle_tx, tail.report(IdleReason::StreamClosed));

    match stream_error {
        Some(e) => Err(ConsumerError::Stream(e)),
        None => Ok(HandleSummary {
            handled: tail.handled,
        }),
    }
}

fn send_report<D>(slot: &mut Option<oneshot::Sender<IdleReport<D>>>, report: IdleReport<D>) {
    if let Some(tx) = slot.take() {
        // The driver may have given up waiting already.
        let _ = tx.send(report);
    }
}
