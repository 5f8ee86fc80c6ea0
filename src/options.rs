use clap::{Parser, Subcommand};

use crate::register::Setting;

/// ongrid-settings - read and change grid settings on a Solax inverter over MQTT
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Device topic to use instead of the one in the config file, eg EZMCOGX000001
    #[clap(short = 'd', long = "device")]
    pub device: Option<String>,

    #[clap(subcommand)]
    pub command: Operation,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Operation {
    /// Read the CT enabled flag and the export limit
    ReadExport,

    /// Read the upper and lower grid voltage thresholds
    ReadVoltage,

    /// Set the export limit in watts (only when CT sensing is enabled)
    SetExportLimit { watts: i64 },

    /// Set a grid voltage threshold: `upper` or `lower`
    SetVoltage { threshold: Setting, volts: i64 },

    /// Write 1 to a setting and verify it
    Enable { setting: Setting },

    /// Write 0 to a setting and verify it
    Disable { setting: Setting },
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
