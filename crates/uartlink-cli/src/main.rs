//! uartlink CLI
//!
//! Sends controller commands over the serial link, one per flag, in the
//! order they appear on the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};
use uartlink_core::config::ConfigStore;
use uartlink_core::protocol::{map_speed, Command, GuardKind, Session};

mod reflash;

#[derive(Parser, Debug)]
#[command(name = "uartlink")]
#[command(author, version, about = "Send commands to the controller over UART", long_about = None)]
struct Cli {
    /// Move in direction 1
    #[arg(long = "Direction1")]
    direction1: bool,

    /// Move in direction 2
    #[arg(long = "Direction2")]
    direction2: bool,

    /// Move in direction 3
    #[arg(long = "Direction3")]
    direction3: bool,

    /// Turn the LED on
    #[arg(long = "Led_On")]
    led_on: bool,

    /// Turn the LED off
    #[arg(long = "Led_Off")]
    led_off: bool,

    /// Ask the controller for its status
    #[arg(long = "Send_Status")]
    send_status: bool,

    /// Stop the system
    #[arg(long = "Stop_System")]
    stop_system: bool,

    /// Reflash the controller firmware, then drain its boot output
    #[arg(long = "Reflash")]
    reflash: bool,

    /// Send the init frame carrying the link rate
    #[arg(long)]
    init: bool,

    /// Baud rate (overrides the saved value)
    #[arg(short = 'B', value_name = "RATE")]
    baud: Option<u32>,

    /// Serial device (overrides the saved value)
    #[arg(short = 'd', value_name = "DEVICE")]
    device: Option<String>,

    /// Wait up to MS milliseconds for a response after the commands
    #[arg(long, value_name = "MS")]
    read: Option<u32>,

    /// Save the effective rate and device for next time
    #[arg(long)]
    save: bool,

    /// Config record location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serialize against this process only instead of the system-wide guard
    #[arg(long)]
    process_lock: bool,

    /// Give up waiting for the link guard after MS milliseconds
    #[arg(long, value_name = "MS")]
    lock_timeout: Option<u64>,

    /// Firmware image for --Reflash
    #[arg(long, value_name = "PATH", default_value = reflash::DEFAULT_FIRMWARE)]
    firmware: PathBuf,

    /// Flash offset for --Reflash
    #[arg(long, value_name = "OFFSET", default_value = reflash::DEFAULT_OFFSET)]
    flash_offset: String,

    /// Flashing tool for --Reflash
    #[arg(long, value_name = "PROGRAM", default_value = "esptool")]
    esptool: String,

    /// Chip family passed to the flashing tool
    #[arg(long, value_name = "CHIP", default_value = "esp32")]
    chip: String,
}

/// One step requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Send(Command),
    Init,
    Reflash,
}

impl Cli {
    /// Requested actions in command-line order
    fn actions(&self, matches: &ArgMatches) -> Vec<Action> {
        let flags = [
            ("direction1", self.direction1, Action::Send(Command::Direction1)),
            ("direction2", self.direction2, Action::Send(Command::Direction2)),
            ("direction3", self.direction3, Action::Send(Command::Direction3)),
            ("led_on", self.led_on, Action::Send(Command::LedOn)),
            ("led_off", self.led_off, Action::Send(Command::LedOff)),
            ("send_status", self.send_status, Action::Send(Command::SendStatus)),
            ("stop_system", self.stop_system, Action::Send(Command::StopSystem)),
            ("reflash", self.reflash, Action::Reflash),
            ("init", self.init, Action::Init),
        ];

        let mut ordered: Vec<(usize, Action)> = flags
            .into_iter()
            .filter(|(_, set, _)| *set)
            .filter(|(id, _, _)| matches.value_source(id) == Some(ValueSource::CommandLine))
            .map(|(id, _, action)| (matches.index_of(id).unwrap_or(usize::MAX), action))
            .collect();
        ordered.sort_by_key(|(index, _)| *index);
        ordered.into_iter().map(|(_, action)| action).collect()
    }
}

fn main() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let actions = cli.actions(&matches);
    run(&cli, &actions)
}

fn run(cli: &Cli, actions: &[Action]) -> Result<()> {
    let store = cli
        .config
        .as_ref()
        .map(ConfigStore::at)
        .unwrap_or_default();
    let mut config = store.load().unwrap_or_default();

    if let Some(rate) = cli.baud {
        config.speed = map_speed(rate);
    }
    if let Some(device) = &cli.device {
        config.device_path = device.clone();
    }
    if cli.process_lock {
        config.guard = GuardKind::Process;
    }
    config.acquire_timeout = cli.lock_timeout.map(Duration::from_millis);

    if cli.save {
        store.save(&config);
    }

    let session = Session::open(&config)
        .with_context(|| format!("opening {} at {} baud", config.device_path, config.speed))?;

    for action in actions {
        match action {
            Action::Send(cmd) => session
                .write_command(cmd.opcode())
                .with_context(|| format!("sending {}", cmd.cli_name()))?,
            Action::Init => session
                .write_init(config.speed.as_u32())
                .context("sending init frame")?,
            Action::Reflash => {
                let options = reflash::FlashOptions {
                    tool: cli.esptool.clone(),
                    chip: cli.chip.clone(),
                    port: config.device_path.clone(),
                    offset: cli.flash_offset.clone(),
                    firmware: cli.firmware.clone(),
                };
                reflash::run(&options, &session)?;
            }
        }
    }

    if let Some(timeout_ms) = cli.read {
        match session.read_response(timeout_ms).context("reading response")? {
            Some(bytes) => println!("{}", hex(&bytes)),
            None => println!("no response"),
        }
    }

    session.close();
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
