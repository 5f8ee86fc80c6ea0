//! The correlation engine.
//!
//! A [`Session`] is the whole consumer-side state for one device: the inbound
//! queue receiver, the response log, the register cache and the active
//! workflow. Only [`Session::tick`] and the `start` family mutate it, and both
//! take `&mut self`, so there is no locking anywhere on this side.

use crate::prelude::*;

pub mod workflow;

use crate::parser::{self, ParsedResult};
use crate::response_log::ResponseLog;
use std::collections::HashSet;
use std::sync::Arc;
use workflow::{Expect, PendingRequest, Step, Workflow, WorkflowKind};

/// How a workflow ended. Reported once, by the tick that finished it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success {
        workflow: WorkflowKind,
        values: Vec<(Register, i64)>,
    },
    Failure {
        workflow: WorkflowKind,
        reason: FailureReason,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn workflow(&self) -> WorkflowKind {
        match self {
            Outcome::Success { workflow, .. } | Outcome::Failure { workflow, .. } => *workflow,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Failure { reason, .. } => Some(reason),
            Outcome::Success { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Running {
        workflow: WorkflowKind,
        step: usize,
        pending: PendingRequest,
    },
}

struct ActiveWorkflow {
    workflow: Workflow,
    step: usize,
    pending: PendingRequest,
    // next log sequence number to look at
    cursor: u64,
    // raw payloads already evaluated by the current step
    seen: HashSet<String>,
    values: Vec<(Register, i64)>,
}

impl ActiveWorkflow {
    fn current(&self) -> &Step {
        &self.workflow.steps[self.step]
    }
}

enum Matched {
    Value(i64),
    WriteAck,
}

pub struct Session {
    device: config::Device,
    timeout: Duration,
    settle: Duration,
    transport: Arc<dyn Transport>,
    clock: SharedClock,
    inbound: InboundReceiver,
    log: ResponseLog,
    cache: RegisterCache,
    connected: bool,
    active: Option<ActiveWorkflow>,
    last_outcome: Option<Outcome>,
}

impl Session {
    pub fn new(
        config: &ConfigWrapper,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
        inbound: InboundReceiver,
    ) -> Self {
        let timing = config.timing();
        Self {
            device: config.device(),
            timeout: timing.timeout(),
            settle: timing.settle(),
            transport,
            clock,
            inbound,
            log: ResponseLog::new(config.log_capacity()),
            cache: RegisterCache::new(),
            connected: false,
            active: None,
            last_outcome: None,
        }
    }

    pub fn device(&self) -> &config::Device {
        &self.device
    }

    pub fn log(&self) -> &ResponseLog {
        &self.log
    }

    pub fn cache(&self) -> &RegisterCache {
        &self.cache
    }

    /// Link state as last reported through the inbound queue.
    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.active.as_ref().map(|a| &a.pending)
    }

    pub fn state(&self) -> WorkflowState {
        match &self.active {
            None => WorkflowState::Idle,
            Some(active) => WorkflowState::Running {
                workflow: active.workflow.kind,
                step: active.step,
                pending: active.pending.clone(),
            },
        }
    }

    // control actions {{{
    pub fn read_pair(&mut self, a: Setting, b: Setting) -> Result<(), WorkflowError> {
        let workflow = Workflow::read_pair(&self.device, a, b);
        self.start(workflow)
    }

    /// CT sensing flag, then the export limit.
    pub fn read_export(&mut self) -> Result<(), WorkflowError> {
        self.read_pair(Setting::CtEnabled, Setting::ExportLimit)
    }

    /// Upper, then lower grid voltage threshold.
    pub fn read_voltage(&mut self) -> Result<(), WorkflowError> {
        self.read_pair(Setting::VoltageUpper, Setting::VoltageLower)
    }

    pub fn enable(&mut self, setting: Setting) -> Result<(), WorkflowError> {
        self.ensure_connected(WorkflowKind::Enable(setting))?;
        let workflow = Workflow::enable(&self.device, setting, self.settle)?;
        self.start(workflow)
    }

    pub fn disable(&mut self, setting: Setting) -> Result<(), WorkflowError> {
        self.ensure_connected(WorkflowKind::Disable(setting))?;
        let workflow = Workflow::disable(&self.device, setting, self.settle)?;
        self.start(workflow)
    }

    pub fn set_value(&mut self, setting: Setting, value: i64) -> Result<(), WorkflowError> {
        self.ensure_connected(WorkflowKind::SetValue(setting, value))?;
        let workflow = Workflow::set_value(&self.device, setting, value, self.settle)?;
        self.start(workflow)
    }
    // }}}

    /// Starts `workflow`, publishing its first command.
    ///
    /// A workflow that is still running is dropped without being reported;
    /// the last one started wins.
    pub fn start(&mut self, workflow: Workflow) -> Result<(), WorkflowError> {
        self.ensure_connected(workflow.kind)?;

        // anything already queued predates the new request
        self.drain_inbound();

        if let Some(previous) = self.active.take() {
            warn!(
                "{} superseded by {} while waiting for {}",
                previous.workflow.kind,
                workflow.kind,
                previous.current().awaiting()
            );
        }

        if workflow.steps.is_empty() {
            let outcome = Outcome::Success {
                workflow: workflow.kind,
                values: vec![],
            };
            self.last_outcome = Some(outcome);
            return Ok(());
        }

        info!("starting {}", workflow.kind);

        let cursor = self.log.end_seq();
        self.publish_step(&workflow.steps[0]);

        // stamped after the last publish, so replies to earlier commands never count
        let pending = PendingRequest::for_step(&workflow.steps[0], self.clock.now(), self.timeout);
        self.active = Some(ActiveWorkflow {
            workflow,
            step: 0,
            pending,
            cursor,
            seen: HashSet::new(),
            values: Vec::new(),
        });

        Ok(())
    }

    /// One bounded, non-blocking pass: drain the queue, then make at most one
    /// workflow transition. Returns the outcome on the tick that finishes a
    /// workflow.
    pub fn tick(&mut self) -> Option<Outcome> {
        self.drain_inbound();

        let now = self.clock.now();
        let active = self.active.as_ref()?;

        if active.pending.is_expired(now) {
            let step = active.current();
            warn!(
                "{}: timed out waiting for {} (issued {}, deadline {})",
                active.workflow.kind,
                step.awaiting(),
                active.pending.issued_at,
                active.pending.deadline
            );
            if let Some(last) = self.log.iter().last() {
                debug!("last response at {}: {:?}", last.received_at, last.raw);
            }
            let reason = FailureReason::Timeout {
                awaiting: step.awaiting(),
            };
            return self.fail(reason);
        }

        if let Expect::Settle(delay) = active.current().expect {
            let settled_at = active.pending.issued_at + workflow::to_chrono(delay);
            if now < settled_at {
                return None;
            }

            debug!("{}: settle delay elapsed", active.workflow.kind);
            return self.advance(now);
        }

        match self.scan() {
            Some(Matched::WriteAck) => self.advance(now),
            Some(Matched::Value(value)) => self.on_value(value, now),
            None => None,
        }
    }

    fn ensure_connected(&self, kind: WorkflowKind) -> Result<(), WorkflowError> {
        if !self.transport.is_connected() {
            return Err(WorkflowError::NotConnected(kind.name()));
        }
        Ok(())
    }

    fn drain_inbound(&mut self) {
        while let Ok(event) = self.inbound.try_recv() {
            match event {
                InboundEvent::Connected => {
                    info!("connected to broker");
                    self.connected = true;
                }
                InboundEvent::Disconnected => {
                    warn!("disconnected from broker");
                    self.connected = false;
                }
                InboundEvent::Message {
                    received_at,
                    payload,
                } => {
                    trace!("log: {} = {}", received_at, payload);
                    self.log.push(received_at, payload);
                }
            }
        }
    }

    /// Walks log records after the cursor until one satisfies the current
    /// step. Later records stay unread for the next tick.
    fn scan(&mut self) -> Option<Matched> {
        let active = self.active.as_mut()?;
        let issued_at = active.pending.issued_at;
        let step = &active.workflow.steps[active.step];

        for (seq, record) in self.log.since(active.cursor) {
            active.cursor = seq + 1;

            if record.received_at < issued_at {
                trace!("skipping record {} received before request", seq);
                continue;
            }

            if !active.seen.insert(record.raw.clone()) {
                debug!("skipping duplicate payload {:?}", record.raw);
                continue;
            }

            match (&step.expect, parser::parse(&record.raw, step.register)) {
                (Expect::Value { register, .. }, ParsedResult::RegisterValue(r, value))
                    if *register == r =>
                {
                    debug!("{}: {} = {}", active.workflow.kind, r, value);
                    return Some(Matched::Value(value));
                }
                (Expect::WriteAck, ParsedResult::WriteAcknowledged) => {
                    debug!("{}: {} acknowledged", active.workflow.kind, step.action);
                    return Some(Matched::WriteAck);
                }
                (_, ParsedResult::Processing) => {
                    debug!("{}: device still processing", active.workflow.kind);
                }
                (_, result) => {
                    trace!("ignoring {:?} while waiting for {}", result, step.awaiting());
                }
            }
        }

        None
    }

    fn on_value(&mut self, value: i64, now: DateTime<Utc>) -> Option<Outcome> {
        let active = self.active.as_mut()?;
        let register = active.current().register;

        if let Some(expected) = active.pending.expected_value {
            if value != expected {
                warn!(
                    "{}: verification failed, expected {} got {}",
                    active.workflow.kind, expected, value
                );
                return self.fail(FailureReason::Mismatch {
                    register,
                    expected,
                    actual: value,
                });
            }
        }

        active.values.push((register, value));
        self.advance(now)
    }

    /// Moves to the next step, or finishes successfully after the last one.
    fn advance(&mut self, now: DateTime<Utc>) -> Option<Outcome> {
        let mut active = self.active.take()?;

        active.step += 1;
        if active.step == active.workflow.steps.len() {
            for (register, value) in &active.values {
                self.cache.set(*register, *value, now);
            }
            info!("{} succeeded: {:?}", active.workflow.kind, active.values);

            let outcome = Outcome::Success {
                workflow: active.workflow.kind,
                values: active.values,
            };
            self.last_outcome = Some(outcome.clone());
            return Some(outcome);
        }

        self.publish_step(active.current());

        active.pending = PendingRequest::for_step(active.current(), self.clock.now(), self.timeout);
        active.seen.clear();
        debug!(
            "{}: step {} ({}), waiting for {}",
            active.workflow.kind,
            active.step,
            active.pending.action,
            active.current().awaiting()
        );

        self.active = Some(active);

        None
    }

    fn fail(&mut self, reason: FailureReason) -> Option<Outcome> {
        let workflow = self.active.take()?.workflow.kind;
        error!("{} failed: {}", workflow, reason);

        let outcome = Outcome::Failure { workflow, reason };
        self.last_outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn publish_step(&self, step: &Step) {
        for command in &step.commands {
            // a lost publish surfaces as a timeout of this step
            if let Err(e) = self.transport.publish(command) {
                warn!("publish of {} failed: {}", command.redacted(), e);
            }
        }
    }
}
