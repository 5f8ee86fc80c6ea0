use crate::prelude::*;

/// Value written to the lock register to re-lock settings after a write.
pub const LOCK_VALUE: u32 = 1;

/// Largest value the 5-digit write field can carry.
pub const MAX_WRITE_VALUE: u32 = 99_999;

/// A protocol command, rendered to its wire string with `to_string()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandMessage {
    /// `READ<NN>**<PPPPP>##<DDDDDDDDDD>,<RRRR>`
    Read {
        opcode: u8,
        password: String,
        device_serial: String,
        register: Register,
    },
    /// `UP#,<RRRR>:<VVVVV>`
    Write { register: Register, value: u32 },
}

impl CommandMessage {
    pub fn read(credentials: &config::Device, setting: Setting) -> Self {
        Self::read_register(credentials, setting.read_opcode(), setting.read_register())
    }

    pub fn read_register(credentials: &config::Device, opcode: u8, register: Register) -> Self {
        CommandMessage::Read {
            opcode,
            password: credentials.read_password().to_owned(),
            device_serial: credentials.device_serial().to_owned(),
            register,
        }
    }

    pub fn write(register: Register, value: i64) -> Result<Self> {
        let value = u32::try_from(value)
            .ok()
            .filter(|v| *v <= MAX_WRITE_VALUE)
            .ok_or_else(|| anyhow!("value {} does not fit the 5-digit write field", value))?;

        Ok(CommandMessage::Write { register, value })
    }

    pub fn unlock(password: &str) -> Result<Self> {
        Self::write(Register::LOCK, password.parse()?)
    }

    pub fn lock() -> Self {
        CommandMessage::Write {
            register: Register::LOCK,
            value: LOCK_VALUE,
        }
    }

    pub fn register(&self) -> Register {
        match self {
            CommandMessage::Read { register, .. } | CommandMessage::Write { register, .. } => {
                *register
            }
        }
    }

    /// Rendering for logs; hides the unlock password.
    pub fn redacted(&self) -> String {
        match self {
            CommandMessage::Write { register, value }
                if *register == Register::LOCK && *value != LOCK_VALUE =>
            {
                format!("UP#,{}:*****", register)
            }
            _ => self.to_string(),
        }
    }
}

impl std::fmt::Display for CommandMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandMessage::Read {
                opcode,
                password,
                device_serial,
                register,
            } => write!(
                f,
                "READ{:02}**{}##{},{}",
                opcode, password, device_serial, register
            ),
            CommandMessage::Write { register, value } => {
                write!(f, "UP#,{}:{:05}", register, value)
            }
        }
    }
}
