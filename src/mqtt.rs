use crate::prelude::*;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Publish, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const RECONNECT_DELAY_SECS: u64 = 5;
const KEEP_ALIVE_SECS: u64 = 60;

/// Outbound half of the transport, as seen by the workflow engine.
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish of one command to the device's command topic.
    fn publish(&self, command: &CommandMessage) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

// Topics {{{
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub command: String,
    pub response: String,
}

impl Topics {
    // eg /AC/5 + EZMCOGX000001 => /AC/5/EZMCOGX000001/Command
    pub fn new(namespace: &str, device: &str) -> Self {
        let namespace = namespace.trim_end_matches('/');
        Self {
            command: format!("{}/{}/Command", namespace, device),
            response: format!("{}/{}/Response", namespace, device),
        }
    }
} // }}}

#[derive(Clone)]
pub struct Mqtt {
    client: AsyncClient,
    topics: Topics,
    connected: Arc<AtomicBool>,
    clock: SharedClock,
    inbound: InboundSender,
}

impl Mqtt {
    /// Opens a broker session for one device and waits for the CONNACK.
    ///
    /// Returns the adapter plus the event loop, which the caller must hand to
    /// [`Mqtt::receiver`] on its own task.
    pub async fn connect(
        config: &ConfigWrapper,
        clock: SharedClock,
        inbound: InboundSender,
    ) -> Result<(Self, EventLoop), TransportError> {
        let c = config.mqtt();
        let device = config.device();
        let topics = Topics::new(c.namespace(), device.id());
        let broker = format!("{}:{}", c.host(), c.port());

        let client_id = format!("ongrid-settings-{}-{}", device.id(), std::process::id());
        let mut options = MqttOptions::new(client_id, c.host(), c.port());
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {} for device {}", broker, device.id());

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let connect_timeout = config.timing().connect_timeout();
        let wait_for_connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(format!("broker refused connection: {:?}", ack.code));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e.to_string()),
                }
            }
        };

        let connection_error = |reason: String| TransportError::Connection {
            broker: broker.clone(),
            reason,
        };

        match tokio::time::timeout(connect_timeout, wait_for_connack).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(connection_error(reason)),
            Err(_) => {
                return Err(connection_error(format!(
                    "no CONNACK within {}s",
                    connect_timeout.as_secs()
                )))
            }
        }

        client
            .subscribe(&topics.response, QoS::AtLeastOnce)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        info!("subscribed to {}", topics.response);

        let mqtt = Self {
            client,
            topics,
            connected: Arc::new(AtomicBool::new(true)),
            clock,
            inbound,
        };
        mqtt.enqueue(InboundEvent::Connected);

        Ok((mqtt, eventloop))
    }

    // broker -> inbound queue
    pub async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        loop {
            if self.inbound.is_closed() {
                break;
            }

            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.handle_message(publish);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("reconnected to broker, resubscribing to {}", self.topics.response);
                    if let Err(e) = self
                        .client
                        .try_subscribe(&self.topics.response, QoS::AtLeastOnce)
                    {
                        error!("resubscribe failed: {}", e);
                    }
                    self.connected.store(true, Ordering::SeqCst);
                    self.enqueue(InboundEvent::Connected);
                }
                Ok(_) => {} // keepalives etc
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        self.enqueue(InboundEvent::Disconnected);
                    }
                    error!("{}", e);
                    info!("reconnecting in {}s", RECONNECT_DELAY_SECS);
                    tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            debug!("disconnect: {}", e);
        }
    }

    fn handle_message(&self, publish: Publish) {
        if publish.topic != self.topics.response {
            debug!("ignoring message on {}", publish.topic);
            return;
        }

        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
        debug!("RX: {} = {}", publish.topic, payload);

        self.enqueue(InboundEvent::Message {
            received_at: self.clock.now(),
            payload,
        });
    }

    fn enqueue(&self, event: InboundEvent) {
        if self.inbound.send(event).is_err() {
            warn!("inbound queue closed, dropping event");
        }
    }
}

impl Transport for Mqtt {
    fn publish(&self, command: &CommandMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        info!("publishing: {} = {}", self.topics.command, command.redacted());
        self.client
            .try_publish(
                &self.topics.command,
                QoS::AtLeastOnce,
                false,
                command.to_string(),
            )
            .map_err(|e| {
                error!("MQTT publish failed: {:?}", e);
                TransportError::NotConnected
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
