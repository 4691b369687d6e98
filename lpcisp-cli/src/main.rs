//! lpcisp CLI - Command-line tool for programming NXP LPC81x flash.
//!
//! ## Features
//!
//! - Download a binary image into flash (`-D`)
//! - Upload flash contents into a file (`-U`)
//! - Optional start of the user program after the transfer (`--go`)
//! - Environment variable and config file support

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgGroup, Parser};
use console::style;
use env_logger::Env;
use lpcisp::port::{DEFAULT_BAUD, DEFAULT_TIMEOUT, SUPPORTED_BAUD_RATES, is_supported_baud};
use lpcisp::{ChipConfig, ChipFamily, SerialConfig};
use log::{debug, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod commands;
mod config;

use config::Config;

/// Serial device used when neither the command line nor a config file names one.
const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Upload length when `-t` is not given.
const DEFAULT_UPLOAD_BYTES: u32 = 256;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Usage-level failures detected by the CLI itself.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of options or values.
    #[error("{0}")]
    Usage(String),
    /// The user pressed Ctrl-C.
    #[error("{0}")]
    Cancelled(String),
}

/// lpcisp - Program NXP LPC81x flash over the UART ISP boot loader.
///
/// Environment variables:
///   LPCISP_DEVICE   - Default serial device
///   LPCISP_BAUD     - Default baud rate (default: 115200)
#[derive(Parser, Debug)]
#[command(name = "lpcisp")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["upload", "download"])
))]
pub(crate) struct Cli {
    /// Serial device connected to the target [default: /dev/ttyUSB0].
    #[arg(short, long, env = "LPCISP_DEVICE", value_name = "DEVICE")]
    pub device: Option<String>,

    /// Baud rate: 9600, 19200, 38400, 57600 or 115200 [default: 115200].
    #[arg(short, long, env = "LPCISP_BAUD", value_name = "BAUD", value_parser = parse_baud)]
    pub baud: Option<u32>,

    /// Number of bytes to upload.
    #[arg(
        short = 't',
        long = "bytes",
        value_name = "BYTES",
        value_parser = parse_u32,
        default_value_t = DEFAULT_UPLOAD_BYTES
    )]
    pub bytes: u32,

    /// Upload flash contents from the device into FILE.
    #[arg(short = 'U', long, value_name = "FILE")]
    pub upload: Option<PathBuf>,

    /// Download FILE into the device flash.
    #[arg(short = 'D', long, value_name = "FILE")]
    pub download: Option<PathBuf>,

    /// Crystal frequency reported to the boot loader, in kHz [default: 12000].
    #[arg(long, value_name = "KHZ")]
    pub crystal: Option<u32>,

    /// Synchronisation attempts before giving up [default: 10].
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Serial read timeout in milliseconds [default: 500].
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Start the user program at ADDR (default 0) after the transfer.
    #[arg(
        long,
        value_name = "ADDR",
        num_args = 0..=1,
        default_missing_value = "0",
        value_parser = parse_u32
    )]
    pub go: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,
}

/// Parse a baud rate, accepting only the rates the boot ROM detects.
fn parse_baud(s: &str) -> Result<u32, String> {
    let baud: u32 = s
        .trim()
        .parse()
        .map_err(|e| format!("Invalid baud rate '{s}': {e}"))?;
    if is_supported_baud(baud) {
        Ok(baud)
    } else {
        Err(format!(
            "Unsupported baud rate {baud} (expected one of {SUPPORTED_BAUD_RATES:?})"
        ))
    }
}

/// Parse a decimal or 0x-prefixed hexadecimal number (underscores allowed).
fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let digits: String = s.chars().filter(|c| *c != '_').collect();
    let parsed = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        digits.parse()
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

impl Cli {
    /// Serial settings: command line, then config file, then defaults.
    pub(crate) fn serial_config(&self, config: &Config) -> Result<SerialConfig> {
        let device = self
            .device
            .clone()
            .or_else(|| config.connection.device.clone())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

        let baud = match (self.baud, config.connection.baud) {
            (Some(baud), _) => baud,
            (None, Some(baud)) if is_supported_baud(baud) => baud,
            (None, Some(baud)) => {
                return Err(CliError::Usage(format!(
                    "Unsupported baud rate {baud} in configuration (expected one of {SUPPORTED_BAUD_RATES:?})"
                ))
                .into());
            },
            (None, None) => DEFAULT_BAUD,
        };

        let timeout = self
            .timeout_ms
            .or(config.connection.timeout_ms)
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);

        Ok(SerialConfig::new(device, baud).with_timeout(timeout))
    }

    /// Handshake settings: command line, then config file, then defaults.
    pub(crate) fn chip_config(&self, config: &Config) -> ChipConfig {
        let mut chip = ChipConfig::new(ChipFamily::Lpc81x);
        if let Some(khz) = self.crystal.or(config.isp.crystal_khz) {
            chip = chip.with_crystal_khz(khz);
        }
        if let Some(retries) = self.retries.or(config.isp.retries) {
            chip = chip.with_sync_retries(retries);
        }
        chip
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

/// Route Ctrl-C into the library so transfers stop at a sector boundary.
fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }
    lpcisp::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let serial = cli.serial_config(&config)?;
    let chip = cli.chip_config(&config);

    match (&cli.download, &cli.upload) {
        (Some(file), None) => commands::transfer::cmd_download(cli, &serial, chip, file),
        (None, Some(file)) => commands::transfer::cmd_upload(cli, &serial, chip, file),
        _ => Err(CliError::Usage("exactly one of -U or -D is required".to_string()).into()),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        },
    };

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);
    debug!(
        "lpcisp v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::FAILURE
        },
    }
}
