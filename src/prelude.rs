pub use std::str::FromStr;
pub use std::time::Duration;

pub use anyhow::{anyhow, bail, Result};
pub use chrono::{DateTime, Utc};
pub use log::{debug, error, info, trace, warn};

pub use crate::channels::{InboundEvent, InboundReceiver, InboundSender};
pub use crate::clock::{Clock, SharedClock};
pub use crate::command::CommandMessage;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{FailureReason, TransportError, WorkflowError};
pub use crate::mqtt::{self, Topics, Transport};
pub use crate::register::{Register, Setting};
pub use crate::register_cache::RegisterCache;
