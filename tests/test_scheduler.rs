mod common;
use common::*;

use ongrid_settings::coordinator::Outcome;
use ongrid_settings::prelude::*;
use ongrid_settings::scheduler::Scheduler;

fn send(inbound: &InboundSender, clock: &impl Clock, text: &str) {
    inbound
        .send(InboundEvent::Message {
            received_at: clock.now(),
            payload: Factory::envelope(text),
        })
        .unwrap();
}

#[tokio::test]
async fn idle_session_returns_immediately() {
    common_setup();
    let mut h = Harness::new();
    let scheduler = Scheduler::with_interval(Duration::from_millis(5));

    assert_eq!(scheduler.run(&mut h.session).await, None);
}

#[tokio::test]
async fn runs_read_pair_to_completion() {
    common_setup();
    let mut h = Harness::new();
    let transport = h.transport.clone();
    let clock = h.clock.clone();
    let inbound = h.inbound.clone();

    h.session.read_export().unwrap();
    let scheduler = Scheduler::with_interval(Duration::from_millis(5));

    let device = async {
        clock.advance_ms(10);
        send(&inbound, &clock, "1032:1");

        while transport.sent().len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        clock.advance_ms(10);
        send(&inbound, &clock, "0802:2500");
    };

    let (outcome, _) = futures::join!(scheduler.run(&mut h.session), device);

    assert_eq!(
        outcome.map(|o| o.is_success()),
        Some(true),
    );
    assert_eq!(h.session.cache().setting(Setting::ExportLimit), Some(2500));
    assert!(matches!(h.session.last_outcome(), Some(Outcome::Success { .. })));
}

#[tokio::test]
async fn reports_timeout() {
    common_setup();
    let mut h = Harness::new();
    let clock = h.clock.clone();

    h.session.read_voltage().unwrap();
    let scheduler = Scheduler::with_interval(Duration::from_millis(5));

    let silence = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.advance_ms(6001);
    };

    let (outcome, _) = futures::join!(scheduler.run(&mut h.session), silence);

    let outcome = outcome.unwrap();
    assert!(outcome.failure().unwrap().is_timeout());
    assert!(h.session.is_idle());
}
