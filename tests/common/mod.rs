#![allow(dead_code)]

use ongrid_settings::channels::Channels;
use ongrid_settings::clock::ManualClock;
use ongrid_settings::coordinator::Session;
use ongrid_settings::prelude::*;

use chrono::TimeZone;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every command instead of publishing it.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<String>>,
    disconnected: AtomicBool,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }
}

impl Transport for FakeTransport {
    fn publish(&self, command: &CommandMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(command.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

/// A session wired to a fake transport and a manual clock, plus the producer
/// end of its inbound queue.
pub struct Harness {
    pub session: Session,
    pub transport: Arc<FakeTransport>,
    pub clock: ManualClock,
    pub inbound: InboundSender,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Factory::config())
    }

    pub fn with_config(config: Config) -> Self {
        let config = ConfigWrapper::from_config(config);
        let transport = Arc::new(FakeTransport::default());
        let clock = ManualClock::new(Factory::epoch());
        let (inbound, inbound_rx) = Channels::new().split();

        let session = Session::new(
            &config,
            transport.clone(),
            Arc::new(clock.clone()),
            inbound_rx,
        );

        Self {
            session,
            transport,
            clock,
            inbound,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Queues a reply stamped with the current clock.
    pub fn reply(&self, payload: &str) {
        self.reply_at(self.now(), payload);
    }

    pub fn reply_at(&self, received_at: DateTime<Utc>, payload: &str) {
        self.inbound
            .send(InboundEvent::Message {
                received_at,
                payload: payload.to_string(),
            })
            .unwrap();
    }

    pub fn advance_ms(&self, ms: i64) {
        self.clock.advance_ms(ms);
    }
}

pub struct Factory;

impl Factory {
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 15, 15, 6, 9).unwrap()
    }

    pub fn config() -> Config {
        Config::from_yaml(
            "
mqtt:
  host: broker.local
device:
  id: EZMCOGX000001
  ct_write_register: \"1538\"
timing:
  timeout_secs: 6
  settle_ms: 800
",
        )
        .unwrap()
    }

    pub fn envelope(text: &str) -> String {
        serde_json::json!({ "rsp": text }).to_string()
    }

    pub fn ack() -> String {
        Self::envelope("UP PROCESSED")
    }

    pub fn processing() -> String {
        Self::envelope("READ PROCESSING")
    }
}
