use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use mculink_channel::ids::{self, param};
use mculink_channel::sim::{DeviceSim, Registers};
use mculink_channel::{ChannelConfig, ProtocolEngine};
use mculink_transport::{LinkConfig, SerialLink, DEFAULT_BAUD_RATE};
use mculink_update::{Supervisor, UpdateError, UpdatePolicy, UpdateProcedure};
use tracing::warn;

use crate::exit::{
    channel_error, transport_error, update_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS,
    USAGE,
};
use crate::output::{print_report, OutputFormat};

pub mod command;
pub mod flash;
pub mod fpga;
pub mod monitor;
pub mod ports;
pub mod read;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a parameter.
    Read(ReadArgs),
    /// Write a parameter.
    Write(WriteArgs),
    /// Send a command and print its acknowledgement.
    Command(CommandArgs),
    /// Update the controller (dsPIC) firmware from an image file.
    Flash(FlashArgs),
    /// Configure the FPGA from a bitstream file.
    Fpga(FpgaArgs),
    /// Poll a parameter until interrupted.
    Monitor(MonitorArgs),
    /// List serial ports.
    Ports,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Read(args) => read::run(args, link, format),
        Command::Write(args) => write::run(args, link, format),
        Command::Command(args) => command::run(args, link, format),
        Command::Flash(args) => flash::run(args, link, format),
        Command::Fpga(args) => fpga::run(args, link, format),
        Command::Monitor(args) => monitor::run(args, link, format),
        Command::Ports => ports::run(format),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the controller.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Serial port the controller is attached to.
    #[arg(long, short = 'p', env = "MCULINK_PORT", global = true)]
    pub port: Option<PathBuf>,
    /// Line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, global = true)]
    pub baud: u32,
    /// How long to wait for each reply (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s", global = true)]
    pub reply_timeout: String,
    /// Talk to a built-in simulated controller instead of a serial port.
    #[arg(long, global = true)]
    pub simulate: bool,
}

/// How a parameter value is encoded on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ValueKind {
    U8,
    U16,
    U32,
    F32,
    String,
    Hex,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Parameter name (e.g. current_in_maximum) or numeric id.
    pub param: String,
    /// Value encoding.
    #[arg(long = "as", value_enum, default_value = "hex")]
    pub kind: ValueKind,
    /// Issue a group read instead of a single read.
    #[arg(long)]
    pub group: bool,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Parameter name or numeric id.
    pub param: String,
    /// Value to write, in the encoding given by --as.
    pub value: String,
    /// Value encoding.
    #[arg(long = "as", value_enum)]
    pub kind: ValueKind,
}

#[derive(Args, Debug)]
pub struct CommandArgs {
    /// Command name (e.g. stop_charging) or numeric id.
    pub command: String,
    /// Command arguments as hex bytes.
    #[arg(long, value_name = "HEX")]
    pub args: Option<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Whole-sequence attempts before giving up.
    #[arg(long, default_value_t = 5)]
    pub attempts: u32,
    /// Upper bound on one attempt (e.g. 10m, 90s).
    #[arg(long, default_value = "10m")]
    pub attempt_timeout: String,
    /// Retry n waits n times this long.
    #[arg(long, default_value = "5s")]
    pub backoff: String,
}

impl UpdateArgs {
    pub fn policy(&self) -> CliResult<UpdatePolicy> {
        if self.attempts == 0 {
            return Err(CliError::new(USAGE, "--attempts must be at least 1"));
        }
        Ok(UpdatePolicy {
            max_attempts: self.attempts,
            attempt_timeout: parse_duration(&self.attempt_timeout)?,
            backoff_step: parse_duration(&self.backoff)?,
            ..UpdatePolicy::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct FlashArgs {
    /// Firmware image file.
    pub image: PathBuf,
    /// The image starts with a NUL-terminated version string.
    #[arg(long)]
    pub versioned: bool,
    #[command(flatten)]
    pub update: UpdateArgs,
}

#[derive(Args, Debug)]
pub struct FpgaArgs {
    /// Bitstream file.
    pub bitstream: PathBuf,
    #[command(flatten)]
    pub update: UpdateArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Parameter name or numeric id.
    pub param: String,
    /// Value encoding.
    #[arg(long = "as", value_enum, default_value = "hex")]
    pub kind: ValueKind,
    /// Time between polls (e.g. 1s, 200ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after N samples.
    #[arg(long)]
    pub count: Option<u64>,
    /// Print link statistics on exit.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// An open link to the controller. Keeps the simulator alive when
/// `--simulate` is used.
pub struct Session {
    pub engine: ProtocolEngine,
    _sim: Option<DeviceSim>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

pub fn open_session(link: &LinkArgs) -> CliResult<Session> {
    let config =
        ChannelConfig::default().with_reply_timeout(parse_duration(&link.reply_timeout)?);

    if link.simulate {
        let (engine, sim) = DeviceSim::attach(demo_controller(), config)
            .map_err(|err| channel_error("simulator failed to start", err))?;
        return Ok(Session {
            engine,
            _sim: Some(sim),
        });
    }

    let port = link.port.as_ref().ok_or_else(|| {
        CliError::new(USAGE, "no serial port given (use --port or MCULINK_PORT)")
    })?;
    let link_config = LinkConfig {
        baud_rate: link.baud,
        ..LinkConfig::default()
    };
    let stream = SerialLink::open_with_config(port, &link_config)
        .map_err(|err| transport_error("open failed", err))?;
    let engine = ProtocolEngine::start_with_config(stream, config)
        .map_err(|err| channel_error("link start failed", err))?;
    Ok(Session { engine, _sim: None })
}

/// Run `procedure` under a [`Supervisor`]; Ctrl-C aborts the run.
pub fn run_update<P: UpdateProcedure>(
    procedure: P,
    update: &UpdateArgs,
    link: &LinkArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let policy = update.policy()?;
    let session = open_session(link)?;
    let supervisor = Supervisor::with_policy(procedure, session.engine.clone(), policy);

    let abort = supervisor.abort_token();
    ctrlc::set_handler(move || {
        warn!("interrupted, aborting update");
        abort.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    match supervisor.run() {
        Ok(report) => {
            print_report(&report, format);
            Ok(SUCCESS)
        }
        Err(UpdateError::RetriesExhausted(report)) => {
            print_report(&report, format);
            Err(CliError::new(
                FAILURE,
                format!(
                    "{} update failed after {} attempts",
                    report.family,
                    report.attempts.len()
                ),
            ))
        }
        Err(err) => Err(update_error("update failed", err)),
    }
}

/// Register contents of the simulated controller.
fn demo_controller() -> Registers {
    Registers::new()
        .with_u8(param::MODE, 1)
        .with_str(param::SERIAL_NUMBER, "EVC-000123")
        .with_f32(param::INTERNAL_TEMPERATURE, 41.5)
        .with_f32(param::VOLTAGE_PHASE1, 230.1)
        .with_f32(param::VOLTAGE_PHASE2, 229.8)
        .with_f32(param::VOLTAGE_PHASE3, 231.0)
        .with_f32(param::CURRENT_IN_MAXIMUM, 32.0)
        .with_f32(param::CURRENT_IN_MINIMUM, 6.0)
        .with_u8(param::ACTIVE_PHASES, 3)
        .with_u16(param::IS_STANDALONE, 0)
        .with_u8(param::HMI_BRIGHTNESS, 80)
        .with_u32(param::WARNINGS, 0)
        .with_str(param::SMART_MAINBOARD_APP_SW_VERSION, "2.1.0")
        .with_str(param::SMART_MAINBOARD_BOOT_SW_VERSION, "1.4.0")
        .with_u8(param::FPGA_TYPE, 0)
        .with_u8(param::FPGA_NEEDS_CONFIGURATION, 0)
}

/// Resolve a catalogued name or a numeric id.
pub fn resolve_id(input: &str) -> CliResult<u16> {
    if let Some(id) = ids::lookup(input) {
        return Ok(id);
    }
    input
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("unknown parameter or command: {input}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

/// Parse hex bytes, tolerating `0x`, spaces and colons.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !matches!(c, ' ' | ':'))
        .collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, format!("not an even run of hex digits: {input}")));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex: {input}")))
        })
        .collect()
}
