// Module declarations for the application's core components
pub mod channels;       // Inbound event queue between transport and session
pub mod clock;          // Injectable wall clock
pub mod command;        // Protocol command strings
pub mod config;         // Configuration management
pub mod coordinator;    // Correlation state machine and workflows
pub mod error;          // Error handling and types
pub mod mqtt;           // MQTT transport adapter
pub mod options;        // Command line options parsing
pub mod parser;         // Inbound payload decoding
pub mod prelude;        // Common imports and types
pub mod register;       // Register ids and known settings
pub mod register_cache; // Last confirmed register values
pub mod response_log;   // Bounded log of raw responses
pub mod scheduler;      // Periodic session ticks

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::clock::SystemClock;
use crate::coordinator::{Outcome, Session};
use crate::mqtt::Mqtt;
use crate::options::{Operation, Options};
use crate::prelude::*;
use crate::scheduler::Scheduler;
use std::io::Write;
use std::sync::Arc;

fn init_logging(filter: &str) {
    if let Err(e) = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
    {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

/// Main application entry point
///
/// Loads the configuration, connects to the broker for the chosen device,
/// runs the requested operation to completion and disconnects.
pub async fn app(options: Options) -> Result<()> {
    let config = match Config::new(options.config_file.clone()) {
        Ok(config) => {
            init_logging(&config.loglevel);
            ConfigWrapper::from_config(config)
        }
        Err(err) => {
            init_logging("info");
            error!("Failed to load config: {:?}", err);
            return Err(err);
        }
    };

    info!("ongrid-settings {} starting", CARGO_PKG_VERSION);

    if let Some(device) = options.device {
        config.set_device_id(device);
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let (inbound_tx, inbound_rx) = channels::Channels::new().split();

    let (mqtt, eventloop) = Mqtt::connect(&config, clock.clone(), inbound_tx).await?;
    let receiver = {
        let mqtt = mqtt.clone();
        tokio::spawn(async move {
            if let Err(e) = mqtt.receiver(eventloop).await {
                error!("MQTT task failed: {}", e);
            }
        })
    };

    let transport: Arc<dyn Transport> = Arc::new(mqtt.clone());
    let mut session = Session::new(&config, transport, clock, inbound_rx);
    let scheduler = Scheduler::new(&config);

    let result = run_operation(&mut session, &scheduler, options.command).await;

    mqtt.disconnect().await;
    receiver.abort();

    result
}

async fn run_operation(session: &mut Session, scheduler: &Scheduler, operation: Operation) -> Result<()> {
    match operation {
        Operation::ReadExport => {
            session.read_export()?;
            finish(session, scheduler).await?;
            print_settings(session, &[Setting::CtEnabled, Setting::ExportLimit]);
        }
        Operation::ReadVoltage => {
            session.read_voltage()?;
            finish(session, scheduler).await?;
            print_settings(session, &[Setting::VoltageUpper, Setting::VoltageLower]);
        }
        Operation::SetExportLimit { watts } => {
            // zero export can only be configured with CT sensing on
            session.read_export()?;
            finish(session, scheduler).await?;
            if session.cache().ct_enabled() != Some(true) {
                bail!("CT is not enabled, export limit cannot be configured");
            }

            session.set_value(Setting::ExportLimit, watts)?;
            finish(session, scheduler).await?;
            println!("Export limit updated to {} W", watts);
        }
        Operation::SetVoltage { threshold, volts } => {
            if !matches!(threshold, Setting::VoltageUpper | Setting::VoltageLower) {
                bail!("{} is not a voltage threshold", threshold);
            }

            session.set_value(threshold, volts)?;
            finish(session, scheduler).await?;
            println!("Voltage threshold {} set to {} V", threshold, volts);
        }
        Operation::Enable { setting } => {
            session.enable(setting)?;
            finish(session, scheduler).await?;
            println!("{} enabled", setting);
        }
        Operation::Disable { setting } => {
            session.disable(setting)?;
            finish(session, scheduler).await?;
            println!("{} disabled", setting);
        }
    }

    Ok(())
}

async fn finish(session: &mut Session, scheduler: &Scheduler) -> Result<()> {
    match scheduler.run(session).await {
        Some(Outcome::Success { .. }) => Ok(()),
        Some(Outcome::Failure { workflow, reason }) => bail!("{} failed: {}", workflow, reason),
        None => bail!("no workflow was running"),
    }
}

fn print_settings(session: &Session, settings: &[Setting]) {
    for setting in settings {
        match session.cache().setting(*setting) {
            Some(value) => println!("{}: {} {}", setting, value, setting.unit()),
            None => println!("{}: unknown", setting),
        }
    }
}
