use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Everything the transport adapter hands to the consumer side.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum InboundEvent {
    Connected,
    Disconnected,
    Message {
        received_at: DateTime<Utc>,
        payload: String,
    },
}

pub type InboundSender = mpsc::UnboundedSender<InboundEvent>;
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// The single ordered queue between a device's receive loop (producer) and
/// its session (consumer).
#[derive(Debug)]
pub struct Channels {
    pub inbound_tx: InboundSender,
    pub inbound_rx: InboundReceiver,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx,
        }
    }

    pub fn split(self) -> (InboundSender, InboundReceiver) {
        (self.inbound_tx, self.inbound_rx)
    }
}
