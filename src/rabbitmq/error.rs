use std::fmt;

use thiserror::Error;
use tokio::task::JoinError;

use crate::rabbitmq::link::LinkError;

pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Step of the consumer lifecycle an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    ChannelOpen,
    ExchangeDeclare,
    QueueDeclare,
    QueueBind,
    ConsumeStart,
    Cancel,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect => "connect",
            Stage::ChannelOpen => "channel-open",
            Stage::ExchangeDeclare => "exchange-declare",
            Stage::QueueDeclare => "queue-declare",
            Stage::QueueBind => "queue-bind",
            Stage::ConsumeStart => "consume-start",
            Stage::Cancel => "cancel",
            Stage::Close => "close",
        })
    }
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid argument: {0} must not be empty")]
    InvalidArgument(&'static str),

    #[error("{stage}: {source}")]
    Connection { stage: Stage, source: LinkError },

    #[error("{stage}: {source}")]
    Topology { stage: Stage, source: LinkError },

    #[error("consume-start: {0}")]
    ConsumeStart(#[source] LinkError),

    #[error("shutdown {stage}: {source}")]
    Shutdown { stage: Stage, source: LinkError },

    #[error("delivery stream: {0}")]
    Stream(#[source] LinkError),

    #[error("cumulative ack: {0}")]
    Ack(#[source] LinkError),

    #[error("handling loop: {0}")]
    Join(#[from] JoinError),
}

impl ConsumerError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Connection { stage, .. }
            | Self::Topology { stage, .. }
            | Self::Shutdown { stage, .. } => Some(*stage),
            Self::ConsumeStart(_) => Some(Stage::ConsumeStart),
            _ => None,
        }
    }
}
