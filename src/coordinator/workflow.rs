//! Declarative workflow definitions.
//!
//! A workflow is a list of [`Step`]s. Each step names the commands to publish
//! on entry and what has to be seen before moving on. The state machine in
//! [`super::Session`] walks the list; nothing here touches the transport.

use crate::prelude::*;

/// What a [`PendingRequest`] is waiting on, for logs and timeout reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    /// Unlock, write and re-lock, published together.
    Lock,
    Settle,
    Verify,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Lock => "lock",
            Action::Settle => "settle",
            Action::Verify => "verify",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expect {
    /// A data line for `register`. With `expected` set, any other value fails
    /// the workflow with a mismatch.
    Value {
        register: Register,
        expected: Option<i64>,
    },
    /// The device's write acknowledgement marker.
    WriteAck,
    /// Nothing to wait for but time.
    Settle(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub action: Action,
    /// Register the step is about; also the register replies are parsed against.
    pub register: Register,
    pub commands: Vec<CommandMessage>,
    pub expect: Expect,
}

impl Step {
    fn read(command: CommandMessage, action: Action, expected: Option<i64>) -> Self {
        let register = command.register();
        Self {
            action,
            register,
            commands: vec![command],
            expect: Expect::Value { register, expected },
        }
    }

    fn locked_write(unlock: CommandMessage, write: CommandMessage) -> Self {
        Self {
            action: Action::Lock,
            register: Register::LOCK,
            commands: vec![unlock, write, CommandMessage::lock()],
            expect: Expect::WriteAck,
        }
    }

    /// Human readable description of what this step waits for.
    pub fn awaiting(&self) -> String {
        match self.expect {
            Expect::Value { register, .. } => format!("register {}", register),
            Expect::WriteAck => format!("{} acknowledgement ({})", self.action, self.register),
            Expect::Settle(d) => format!("settle delay of {}ms", d.as_millis()),
        }
    }
}

/// The operation a workflow carries out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowKind {
    ReadPair(Setting, Setting),
    Enable(Setting),
    Disable(Setting),
    SetValue(Setting, i64),
}

impl WorkflowKind {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowKind::ReadPair(..) => "read-pair",
            WorkflowKind::Enable(_) => "enable",
            WorkflowKind::Disable(_) => "disable",
            WorkflowKind::SetValue(..) => "set-value",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowKind::ReadPair(a, b) => write!(f, "read-pair({}, {})", a, b),
            WorkflowKind::Enable(s) => write!(f, "enable({})", s),
            WorkflowKind::Disable(s) => write!(f, "disable({})", s),
            WorkflowKind::SetValue(s, v) => write!(f, "set-value({} = {})", s, v),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workflow {
    pub kind: WorkflowKind,
    pub steps: Vec<Step>,
}

impl Workflow {
    /// read(A) → await A → read(B) → await B.
    pub fn read_pair(device: &config::Device, a: Setting, b: Setting) -> Self {
        Self {
            kind: WorkflowKind::ReadPair(a, b),
            steps: vec![
                Step::read(CommandMessage::read(device, a), Action::Read, None),
                Step::read(CommandMessage::read(device, b), Action::Read, None),
            ],
        }
    }

    pub fn enable(device: &config::Device, setting: Setting, settle: Duration) -> Result<Self, WorkflowError> {
        Self::write_verify(WorkflowKind::Enable(setting), device, setting, 1, settle)
    }

    pub fn disable(device: &config::Device, setting: Setting, settle: Duration) -> Result<Self, WorkflowError> {
        Self::write_verify(WorkflowKind::Disable(setting), device, setting, 0, settle)
    }

    pub fn set_value(
        device: &config::Device,
        setting: Setting,
        value: i64,
        settle: Duration,
    ) -> Result<Self, WorkflowError> {
        Self::write_verify(WorkflowKind::SetValue(setting, value), device, setting, value, settle)
    }

    /// unlock, write and lock published back to back, one acknowledgement
    /// received after the lock, then a settle delay and a read-back that must
    /// equal `value`.
    ///
    /// The re-lock goes out with the write, so a lost acknowledgement can never
    /// leave the device unlocked.
    fn write_verify(
        kind: WorkflowKind,
        device: &config::Device,
        setting: Setting,
        value: i64,
        settle: Duration,
    ) -> Result<Self, WorkflowError> {
        setting.validate(value)?;

        let write_register = device
            .write_register(setting)
            .ok_or(WorkflowError::NotWritable(setting))?;

        let unlock = CommandMessage::unlock(device.unlock_password())
            .map_err(|_| WorkflowError::InvalidUnlockPassword)?;
        let write = CommandMessage::write(write_register, value).map_err(|_| {
            let (min, max) = setting.range();
            WorkflowError::OutOfRange {
                setting,
                value,
                min,
                max,
            }
        })?;

        Ok(Self {
            kind,
            steps: vec![
                Step::locked_write(unlock, write),
                Step {
                    action: Action::Settle,
                    register: setting.read_register(),
                    commands: vec![],
                    expect: Expect::Settle(settle),
                },
                Step::read(CommandMessage::read(device, setting), Action::Verify, Some(value)),
            ],
        })
    }
}

/// What the active step is waiting for, and until when.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub register: Register,
    pub action: Action,
    pub expected_value: Option<i64>,
    pub issued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl PendingRequest {
    pub fn for_step(step: &Step, issued_at: DateTime<Utc>, timeout: Duration) -> Self {
        let mut window = to_chrono(timeout);
        if let Expect::Settle(settle) = step.expect {
            window += to_chrono(settle);
        }

        let expected_value = match step.expect {
            Expect::Value { expected, .. } => expected,
            _ => None,
        };

        Self {
            register: step.register,
            action: step.action,
            expected_value,
            issued_at,
            deadline: issued_at + window,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    // anything beyond chrono's range is effectively forever
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> config::Device {
        config::Device {
            id: "EZMCOGX000001".to_string(),
            read_password: "12345".to_string(),
            device_serial: "1234567890".to_string(),
            unlock_password: "02014".to_string(),
            ct_write_register: None,
        }
    }

    fn wire(step: &Step) -> Vec<String> {
        step.commands.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn read_pair_steps() {
        let wf = Workflow::read_pair(&device(), Setting::CtEnabled, Setting::ExportLimit);
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wire(&wf.steps[0]), ["READ04**12345##1234567890,1032"]);
        assert_eq!(wire(&wf.steps[1]), ["READ03**12345##1234567890,0802"]);
        assert_eq!(
            wf.steps[1].expect,
            Expect::Value {
                register: Register::new(802),
                expected: None
            }
        );
    }

    #[test]
    fn set_value_steps() -> Result<()> {
        let wf = Workflow::set_value(&device(), Setting::VoltageLower, 180, Duration::from_millis(800))?;

        let actions: Vec<_> = wf.steps.iter().map(|s| s.action).collect();
        assert_eq!(actions, [Action::Lock, Action::Settle, Action::Verify]);
        assert_eq!(
            wire(&wf.steps[0]),
            ["UP#,1536:02014", "UP#,1567:00180", "UP#,1536:00001"]
        );
        assert_eq!(wf.steps[0].expect, Expect::WriteAck);
        assert!(wf.steps[1].commands.is_empty());
        assert_eq!(wire(&wf.steps[2]), ["READ03**12345##1234567890,0811"]);
        assert_eq!(
            wf.steps[2].expect,
            Expect::Value {
                register: Register::new(811),
                expected: Some(180)
            }
        );

        Ok(())
    }

    #[test]
    fn write_verify_rejects_bad_requests() {
        let settle = Duration::from_millis(800);
        assert_eq!(
            Workflow::enable(&device(), Setting::CtEnabled, settle),
            Err(WorkflowError::NotWritable(Setting::CtEnabled))
        );
        assert!(matches!(
            Workflow::set_value(&device(), Setting::VoltageUpper, 400, settle),
            Err(WorkflowError::OutOfRange { .. })
        ));
        assert!(matches!(
            Workflow::disable(&device(), Setting::ExportLimit, settle),
            Err(WorkflowError::OutOfRange { value: 0, .. })
        ));
    }

    #[test]
    fn bad_unlock_password_is_reported_as_such() {
        let mut device = device();
        device.unlock_password = "2O14".to_string();

        assert_eq!(
            Workflow::set_value(&device, Setting::ExportLimit, 500, Duration::from_millis(800)),
            Err(WorkflowError::InvalidUnlockPassword)
        );
    }

    #[test]
    fn configured_ct_write_register_enables_ct_workflows() -> Result<()> {
        let mut device = device();
        device.ct_write_register = Some(Register::new(1538));

        let wf = Workflow::disable(&device, Setting::CtEnabled, Duration::from_millis(800))?;
        assert_eq!(wire(&wf.steps[0])[1], "UP#,1538:00000");
        assert_eq!(wf.kind, WorkflowKind::Disable(Setting::CtEnabled));

        Ok(())
    }

    #[test]
    fn pending_deadline_covers_settle_delay() {
        let now = Utc::now();
        let wf = Workflow::enable(&device(), Setting::ExportLimit, Duration::from_millis(800)).unwrap();

        let lock = PendingRequest::for_step(&wf.steps[0], now, Duration::from_secs(6));
        assert_eq!(lock.deadline, now + chrono::Duration::seconds(6));
        assert_eq!(lock.register, Register::LOCK);

        let settle = PendingRequest::for_step(&wf.steps[1], now, Duration::from_secs(6));
        assert_eq!(settle.deadline, now + chrono::Duration::milliseconds(6800));

        let verify = PendingRequest::for_step(&wf.steps[2], now, Duration::from_secs(6));
        assert_eq!(verify.expected_value, Some(1));
        assert!(!verify.is_expired(verify.deadline));
        assert!(verify.is_expired(verify.deadline + chrono::Duration::milliseconds(1)));
    }
}
