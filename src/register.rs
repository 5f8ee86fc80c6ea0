use crate::prelude::*;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Register {{{
/// A device register, addressed on the wire by a zero-padded 4-digit id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u16);

impl Register {
    pub const MAX: u16 = 9999;

    /// Write target for the unlock/re-lock sequence.
    pub const LOCK: Register = Register::new(1536);

    pub const CT_ENABLED: Register = Register::new(1032);
    pub const EXPORT_LIMIT: Register = Register::new(802);
    pub const EXPORT_LIMIT_WRITE: Register = Register::new(1540);
    pub const VOLTAGE_UPPER: Register = Register::new(808);
    pub const VOLTAGE_UPPER_WRITE: Register = Register::new(1566);
    pub const VOLTAGE_LOWER: Register = Register::new(811);
    pub const VOLTAGE_LOWER_WRITE: Register = Register::new(1567);

    // only for the constants above, where an out of range id fails the build
    pub(crate) const fn new(id: u16) -> Self {
        assert!(id <= Self::MAX);
        Self(id)
    }

    pub fn id(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl std::fmt::Debug for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Register({:04})", self.0)
    }
}

impl TryFrom<u16> for Register {
    type Error = anyhow::Error;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        if id > Self::MAX {
            bail!("register {} does not fit the 4-digit wire format", id);
        }

        Ok(Self(id))
    }
}

impl FromStr for Register {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            bail!("register {:?} must be exactly 4 digits", s);
        }

        Self::try_from(s.parse::<u16>()?)
    }
}

impl Serialize for Register {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Register {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Register::from_str(&s).map_err(serde::de::Error::custom)
    }
} // }}}

// Setting {{{
/// The inverter settings this tool knows how to read and change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Setting {
    CtEnabled,
    ExportLimit,
    VoltageUpper,
    VoltageLower,
}

impl Setting {
    /// Register the current value is read back from.
    pub fn read_register(&self) -> Register {
        match self {
            Setting::CtEnabled => Register::CT_ENABLED,
            Setting::ExportLimit => Register::EXPORT_LIMIT,
            Setting::VoltageUpper => Register::VOLTAGE_UPPER,
            Setting::VoltageLower => Register::VOLTAGE_LOWER,
        }
    }

    /// Register a new value is written to. The device exposes writes on a
    /// different id from reads; the CT sense register has no known write id
    /// and must be supplied through configuration.
    pub fn write_register(&self) -> Option<Register> {
        match self {
            Setting::CtEnabled => None,
            Setting::ExportLimit => Some(Register::EXPORT_LIMIT_WRITE),
            Setting::VoltageUpper => Some(Register::VOLTAGE_UPPER_WRITE),
            Setting::VoltageLower => Some(Register::VOLTAGE_LOWER_WRITE),
        }
    }

    pub fn read_opcode(&self) -> u8 {
        match self {
            Setting::CtEnabled => 4,
            _ => 3,
        }
    }

    /// Inclusive range of values the operator may write.
    pub fn range(&self) -> (i64, i64) {
        match self {
            Setting::CtEnabled => (0, 1),
            Setting::ExportLimit => (1, 10000),
            Setting::VoltageUpper | Setting::VoltageLower => (150, 300),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Setting::CtEnabled => "",
            Setting::ExportLimit => "W",
            Setting::VoltageUpper | Setting::VoltageLower => "V",
        }
    }

    pub fn validate(&self, value: i64) -> Result<(), WorkflowError> {
        let (min, max) = self.range();
        if value < min || value > max {
            return Err(WorkflowError::OutOfRange {
                setting: *self,
                value,
                min,
                max,
            });
        }

        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Setting::CtEnabled => "ct_enabled",
            Setting::ExportLimit => "export_limit",
            Setting::VoltageUpper => "voltage_upper",
            Setting::VoltageLower => "voltage_lower",
        }
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Setting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "ct" | "ct_enabled" => Ok(Setting::CtEnabled),
            "export" | "export_limit" => Ok(Setting::ExportLimit),
            "upper" | "voltage_upper" => Ok(Setting::VoltageUpper),
            "lower" | "voltage_lower" => Ok(Setting::VoltageLower),
            _ => bail!("unknown setting {:?}", s),
        }
    }
} // }}}
