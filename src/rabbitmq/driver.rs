use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::config::rabbit::{ConsumerConfig, Timing};
use crate::rabbitmq::consumer::Consumer;
use crate::rabbitmq::error::{ConsumerError, Result};
use crate::rabbitmq::handler::{IdleReason, IdleReport, LineSink};
use crate::rabbitmq::link::{BrokerConnection, BrokerDelivery, Connector, LinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for the handling loop to go idle.
    Running,
    /// Acknowledging and shutting down.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing was delivered, so there is no handle to ack against.
    NoDelivery,
    /// Handling reported a failure and acking on error is off.
    HandlingFailed,
}

#[derive(Debug)]
pub enum AckOutcome {
    Acked { delivery_tag: u64, handled: u64 },
    Skipped(SkipReason),
    Failed(LinkError),
}

#[derive(Debug)]
pub struct RunSummary {
    pub reason: Option<IdleReason>,
    pub ack: AckOutcome,
    /// Deliveries handled over the whole run, including any that arrived
    /// after the tail was taken.
    pub handled: u64,
}

/// Issues the single cumulative ack for everything up to the reported tail.
pub async fn acknowledge<D: BrokerDelivery>(
    report: &IdleReport<D>,
    ack_on_error: bool,
) -> AckOutcome {
    let Some(last) = &report.last else {
        info!("No deliveries received, nothing to ack");
        return AckOutcome::Skipped(SkipReason::NoDelivery);
    };
    if report.failed && !ack_on_error {
        warn!(
            "Handling failed, leaving {} deliveries unacked for redelivery",
            report.handled
        );
        return AckOutcome::Skipped(SkipReason::HandlingFailed);
    }

    match last.ack_cumulative().await {
        Ok(()) => {
            info!(
                "✅ Acked {} deliveries up to tag {} (last at {:?})",
                report.handled,
                last.delivery_tag(),
                report.last_at
            );
            AckOutcome::Acked {
                delivery_tag: last.delivery_tag(),
                handled: report.handled,
            }
        }
        Err(e) => {
            error!("❌ Cumulative ack up to tag {} failed: {}", last.delivery_tag(), e);
            AckOutcome::Failed(e)
        }
    }
}

/// Waits until the consumer goes idle, acks the tail once and shuts down.
///
/// Shutdown runs whatever the ack outcome; an ack failure is returned only
/// when shutdown itself succeeded.
pub async fn run<C: BrokerConnection>(
    mut consumer: Consumer<C>,
    timing: Timing,
    ack_on_error: bool,
) -> Result<RunSummary> {
    let mut state = DriverState::Running;
    let started = Instant::now();
    debug!("Idle driver {:?}, lifetime {:?}", state, timing.lifetime);

    let report = {
        let mut heartbeat = interval(timing.poll_interval.max(Duration::from_millis(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let idle = consumer.wait_idle();
        tokio::pin!(idle);
        loop {
            tokio::select! {
                report = &mut idle => break report,
                _ = heartbeat.tick() => {
                    debug!("Waiting for idle ({:?} elapsed)", started.elapsed());
                }
            }
        }
    };

    state = DriverState::Draining;
    let reason = report.as_ref().map(|r| r.reason);
    info!("Idle driver {:?} after {:?} ({:?})", state, started.elapsed(), reason);

    let ack = match &report {
        Some(report) => acknowledge(report, ack_on_error).await,
        None => AckOutcome::Skipped(SkipReason::NoDelivery),
    };
    drop(report);

    let summary = consumer.shutdown().await?;

    match ack {
        AckOutcome::Failed(e) => Err(ConsumerError::Ack(e)),
        ack => Ok(RunSummary {
            reason,
            ack,
            handled: summary.handled,
        }),
    }
}

/// Starts a consumer on `connector` and drives it until it goes idle.
pub async fn consume<K, S>(connector: &K, config: &ConsumerConfig, sink: S) -> Result<RunSummary>
where
    K: Connector,
    S: LineSink,
{
    let consumer = Consumer::start(connector, config, sink).await?;
    run(consumer, config.timing, config.ack_on_error).await
}
