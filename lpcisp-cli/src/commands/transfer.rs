//! Download and upload command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use lpcisp::{ChipConfig, DeviceInfo, Flasher, SerialConfig};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by Ctrl-C".to_string()).into())
    } else {
        Ok(())
    }
}

/// Turn a library error into a reportable one, naming its class.
fn report(err: lpcisp::Error, what: &str) -> anyhow::Error {
    if matches!(err, lpcisp::Error::Cancelled) {
        return CliError::Cancelled("Interrupted by Ctrl-C".to_string()).into();
    }
    let class = err.class();
    anyhow::Error::new(err).context(format!("{what} failed ({class} error)"))
}

/// Like [`report`], naming the file being read or written.
fn report_file(err: lpcisp::Error, action: &str, path: &Path) -> anyhow::Error {
    report(err, &format!("{action} {}", path.display()))
}

fn progress_bar(cli: &Cli, len: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Open the port, synchronise and run `op`; the port is closed on every path.
fn with_device<T>(
    cli: &Cli,
    serial: &SerialConfig,
    chip: ChipConfig,
    op: impl FnOnce(&mut dyn Flasher, &DeviceInfo) -> Result<T>,
) -> Result<T> {
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("*").cyan(),
            serial.port_name,
            serial.baud_rate
        );
    }

    let family = chip.family;
    let mut flasher = family
        .create_flasher(serial, chip)
        .with_context(|| format!("Failed to open serial device {}", serial.port_name))?;

    let result = (|| -> Result<T> {
        ensure_not_interrupted()?;
        if !cli.quiet {
            eprintln!("{} Waiting for the boot loader...", style("*").yellow());
        }
        let info = flasher.connect().map_err(|e| report(e, "Synchronisation"))?;
        ensure_not_interrupted()?;

        println!("ISP version {}", info.boot_version);
        println!("{}", info.profile);

        op(flasher.as_mut(), &info)
    })();

    flasher.close();
    result
}

fn start_user_code(cli: &Cli, flasher: &mut dyn Flasher) -> Result<()> {
    if let Some(addr) = cli.go {
        flasher.go(addr).map_err(|e| report(e, "Go"))?;
        if !cli.quiet {
            eprintln!("{} Started user code at 0x{addr:08X}", style("*").cyan());
        }
    }
    Ok(())
}

/// Download a binary file into the device flash.
pub(crate) fn cmd_download(
    cli: &Cli,
    serial: &SerialConfig,
    chip: ChipConfig,
    path: &Path,
) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?
        .len();
    let mut image = BufReader::new(file);

    with_device(cli, serial, chip, |flasher, info| {
        let capacity = info.profile.flash_bytes;
        if info.profile.is_known() && size > u64::from(capacity) {
            let err = lpcisp::Error::ImageTooLarge {
                size: u32::try_from(size).unwrap_or(u32::MAX),
                capacity,
            };
            return Err(report_file(err, "Download of", path));
        }

        let pb = progress_bar(cli, size);
        pb.set_message("writing");
        let outcome = flasher.download(&mut image, &mut |written| {
            pb.set_position(u64::from(written).min(size));
        });
        let summary = match outcome {
            Ok(summary) => {
                pb.finish_with_message("done");
                summary
            },
            Err(err) => {
                pb.abandon();
                return Err(report_file(err, "Download of", path));
            },
        };

        if let Some(checksum) = summary.vector_checksum {
            println!("Checksum 0x{checksum:08X}");
        }
        println!("CRP: {}", summary.crp_level);
        println!("wrote {} bytes", summary.bytes_transferred);

        start_user_code(cli, flasher)
    })
}

/// Upload flash contents into a file.
pub(crate) fn cmd_upload(
    cli: &Cli,
    serial: &SerialConfig,
    chip: ChipConfig,
    path: &Path,
) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    with_device(cli, serial, chip, |flasher, _info| {
        let total = cli.bytes;

        let pb = progress_bar(cli, u64::from(total));
        pb.set_message("reading");
        let read = flasher.upload(&mut out, Some(total), &mut |done| {
            pb.set_position(u64::from(done));
        });
        let read = match read {
            Ok(read) => {
                pb.finish_with_message("done");
                read
            },
            Err(err) => {
                pb.abandon();
                return Err(report_file(err, "Upload into", path));
            },
        };
        out.flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;

        println!("read {read} bytes");

        start_user_code(cli, flasher)
    })
}
