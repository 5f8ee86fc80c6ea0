use crate::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedValue {
    pub value: i64,
    pub updated_at: DateTime<Utc>,
}

/// Last confirmed value of each register for one session.
///
/// Only terminal-success workflows write here, so a value is never a guess:
/// it was either read back from the device or verified after a write.
#[derive(Clone, Debug, Default)]
pub struct RegisterCache {
    register_data: HashMap<Register, CachedValue>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, register: Register, value: i64, updated_at: DateTime<Utc>) {
        debug!("register_cache: {} = {}", register, value);
        self.register_data
            .insert(register, CachedValue { value, updated_at });
    }

    pub fn get(&self, register: Register) -> Option<i64> {
        self.register_data.get(&register).map(|c| c.value)
    }

    pub fn entry(&self, register: Register) -> Option<&CachedValue> {
        self.register_data.get(&register)
    }

    pub fn setting(&self, setting: Setting) -> Option<i64> {
        self.get(setting.read_register())
    }

    /// CT sensing must be on before zero-export limits mean anything.
    pub fn ct_enabled(&self) -> Option<bool> {
        self.setting(Setting::CtEnabled).map(|v| v != 0)
    }

    pub fn len(&self) -> usize {
        self.register_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.register_data.is_empty()
    }
}
