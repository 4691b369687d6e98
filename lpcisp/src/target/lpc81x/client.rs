//! UART ISP command executor.
//!
//! [`IspClient::execute`] runs any [`Command`] from the table in
//! [`crate::protocol::isp`]; the public command methods are thin wrappers
//! that turn the decimal lines into typed results.

use crate::error::{Error, Result};
use crate::protocol::isp::{Command, DataPhase, ReturnCode, UNLOCK_KEY};
use crate::protocol::line::{LineTransport, MAX_LINE_LEN, parse_decimal};
use log::{debug, info, trace};
use std::io::{Read, Write};

/// Default number of `?` requests sent while synchronising.
pub const DEFAULT_SYNC_RETRIES: u32 = 10;

/// Default crystal frequency reported during the handshake, in kHz.
pub const DEFAULT_CRYSTAL_KHZ: u32 = 12_000;

const SYNCHRONIZED: &str = "Synchronized\r\n";
const OK: &str = "OK\r\n";

/// Raw data that accompanies a command.
pub enum Payload<'a> {
    /// No binary data phase.
    None,
    /// Bytes sent after a successful Write to RAM.
    Send(&'a [u8]),
    /// Buffer filled by a successful Read Memory.
    Receive(&'a mut [u8]),
}

/// Outcome of a command that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `CMD_SUCCESS` followed by the command's data lines.
    Ok(Vec<u32>),
    /// A non-zero code that carries information rather than a failure.
    Informational {
        /// Code returned by the boot ROM.
        code: ReturnCode,
        /// Values of the lines that followed it.
        values: Vec<u32>,
    },
}

/// Result of Blank check sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankCheck {
    /// Every word in the range reads `0xFFFFFFFF`.
    Blank,
    /// The first word that is not erased.
    NotBlank {
        /// Byte offset of the word.
        offset: u32,
        /// Contents of the word.
        contents: u32,
    },
}

/// Result of Compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Both regions hold the same data.
    Equal,
    /// The regions differ.
    Mismatch {
        /// Offset of the first differing word.
        offset: u32,
    },
}

/// Boot code version reported by `K`.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl std::fmt::Display for BootVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Client for the LPC81x UART ISP boot ROM.
pub struct IspClient<P: Read + Write> {
    transport: LineTransport<P>,
}

impl<P: Read + Write> IspClient<P> {
    /// Create a client on an opened channel. Echo is assumed enabled, as
    /// it is after reset.
    pub fn new(port: P) -> Self {
        Self {
            transport: LineTransport::new(port),
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        self.transport.port()
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        self.transport.port_mut()
    }

    /// Consume the client and return the underlying port.
    pub fn into_port(self) -> P {
        self.transport.into_port()
    }

    /// Whether the device currently echoes received characters.
    pub fn echo_enabled(&self) -> bool {
        self.transport.echo()
    }

    /// Synchronise with the boot ROM.
    ///
    /// Sends `?` up to `retries` times until the ROM answers
    /// `Synchronized`, then completes the exchange and reports the crystal
    /// frequency.
    pub fn isp_init(&mut self, retries: u32, crystal_khz: u32) -> Result<()> {
        let mut synchronized = false;
        for attempt in 1..=retries {
            self.transport.write_raw(b"?")?;
            match self.transport.read_line(MAX_LINE_LEN) {
                Ok(line) if line == SYNCHRONIZED => {
                    debug!("Synchronized after {attempt} attempt(s)");
                    synchronized = true;
                    break;
                },
                Ok(line) => trace!("Unexpected reply to '?': {line:?}"),
                Err(Error::Timeout(_) | Error::SizeMismatch(_)) => {
                    trace!("No reply to '?' (attempt {attempt}/{retries})");
                },
                Err(e) => return Err(e),
            }
        }
        if !synchronized {
            return Err(Error::HandshakeFailed { attempts: retries });
        }

        self.transport.write_line(SYNCHRONIZED)?;
        self.expect_ok("Synchronized")?;

        self.transport.write_line(&format!("{crystal_khz}\r\n"))?;
        self.expect_ok("crystal frequency")?;

        info!("Synchronized with boot ROM");
        Ok(())
    }

    fn expect_ok(&mut self, after: &str) -> Result<()> {
        let line = self.transport.read_line(MAX_LINE_LEN)?;
        if line != OK {
            return Err(Error::Malformed(format!(
                "expected OK after {after}, got {line:?}"
            )));
        }
        Ok(())
    }

    /// Run one command: send its line, read the return code, run the data
    /// phase and collect the follow-on lines.
    ///
    /// Codes that are informational for `command` are returned as
    /// [`Response::Informational`]; every other non-zero code is an
    /// [`Error::Vendor`].
    pub fn execute(&mut self, command: &Command, payload: Payload<'_>) -> Result<Response> {
        let shape_ok = match (command.data_phase(), &payload) {
            (DataPhase::None, Payload::None) => true,
            (DataPhase::Send(n), Payload::Send(data)) => data.len() == n as usize,
            (DataPhase::Receive(n), Payload::Receive(buf)) => buf.len() == n as usize,
            _ => false,
        };
        if !shape_ok {
            return Err(Error::SizeMismatch(format!(
                "payload does not match {command}"
            )));
        }

        debug!("{command}");
        self.transport.write_line(&command.line())?;

        let line = self.transport.read_line(MAX_LINE_LEN)?;
        let raw = parse_decimal(&line, "return code")?;
        let code = ReturnCode::from_code(raw)
            .ok_or_else(|| Error::Malformed(format!("unknown return code {raw}")))?;

        if code != ReturnCode::Success {
            if let Some(lines) = command.informational_lines(code) {
                let values = self.read_values(lines)?;
                debug!("{} returned {code} {values:?}", command.name());
                return Ok(Response::Informational { code, values });
            }
            return Err(Error::Vendor {
                command: command.name(),
                code,
            });
        }

        match payload {
            Payload::None => {},
            Payload::Send(data) => self.transport.write_bytes(data)?,
            Payload::Receive(buf) => self.transport.read_exact(buf)?,
        }

        Ok(Response::Ok(self.read_values(command.data_lines())?))
    }

    fn read_values(&mut self, count: usize) -> Result<Vec<u32>> {
        (0..count)
            .map(|_| {
                let line = self.transport.read_line(MAX_LINE_LEN)?;
                parse_decimal(&line, "value")
            })
            .collect()
    }

    /// Run a command that only reports success.
    fn simple(&mut self, command: &Command) -> Result<()> {
        self.execute(command, Payload::None).map(|_| ())
    }

    /// Run a command expected to return exactly `N` values.
    fn values<const N: usize>(&mut self, command: &Command) -> Result<[u32; N]> {
        match self.execute(command, Payload::None)? {
            Response::Ok(values) => values.try_into().map_err(|v: Vec<u32>| {
                Error::SizeMismatch(format!(
                    "{} returned {} values, expected {N}",
                    command.name(),
                    v.len()
                ))
            }),
            Response::Informational { code, .. } => Err(Error::Vendor {
                command: command.name(),
                code,
            }),
        }
    }

    /// Unlock Erase, Write and Go.
    pub fn unlock(&mut self) -> Result<()> {
        self.simple(&Command::Unlock { key: UNLOCK_KEY })
    }

    /// Change the ROM's baud rate. The host side must follow separately.
    pub fn set_baud_rate(&mut self, baud: u32, stop_bits: u8) -> Result<()> {
        self.simple(&Command::SetBaudRate { baud, stop_bits })
    }

    /// Switch character echo and track the mode on the transport.
    pub fn echo(&mut self, enabled: bool) -> Result<()> {
        self.simple(&Command::Echo { enabled })?;
        self.transport.set_echo(enabled);
        Ok(())
    }

    /// Write `data` to RAM at `addr`.
    pub fn write_to_ram(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let command = Command::WriteToRam {
            addr,
            bytes: data.len() as u32,
        };
        self.execute(&command, Payload::Send(data)).map(|_| ())
    }

    /// Read `buf.len()` bytes starting at `addr`.
    pub fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let command = Command::ReadMemory {
            addr,
            bytes: buf.len() as u32,
        };
        self.execute(&command, Payload::Receive(buf)).map(|_| ())
    }

    /// Prepare sectors `start..=end` for erase or write.
    pub fn prepare_sectors(&mut self, start: u32, end: u32) -> Result<()> {
        self.simple(&Command::PrepareSectors { start, end })
    }

    /// Program `bytes` bytes from RAM at `ram` into flash at `flash`.
    pub fn copy_ram_to_flash(&mut self, flash: u32, ram: u32, bytes: u32) -> Result<()> {
        self.simple(&Command::CopyRamToFlash { flash, ram, bytes })
    }

    /// Jump to `addr` in Thumb mode.
    pub fn go(&mut self, addr: u32) -> Result<()> {
        self.simple(&Command::Go { addr })
    }

    /// Erase sectors `start..=end`.
    pub fn erase_sectors(&mut self, start: u32, end: u32) -> Result<()> {
        self.simple(&Command::EraseSectors { start, end })
    }

    /// Blank check sectors `start..=end`.
    pub fn blank_check_sectors(&mut self, start: u32, end: u32) -> Result<BlankCheck> {
        match self.execute(&Command::BlankCheckSectors { start, end }, Payload::None)? {
            Response::Ok(_) => Ok(BlankCheck::Blank),
            Response::Informational { values, .. } => Ok(BlankCheck::NotBlank {
                offset: values[0],
                contents: values[1],
            }),
        }
    }

    /// Read the part identification number.
    pub fn read_part_id(&mut self) -> Result<u32> {
        let [part_id] = self.values(&Command::ReadPartId)?;
        Ok(part_id)
    }

    /// Read the boot code version.
    pub fn read_boot_code_version(&mut self) -> Result<BootVersion> {
        let [minor, major] = self.values(&Command::ReadBootCodeVersion)?;
        let byte = |value: u32, what: &str| {
            u8::try_from(value)
                .map_err(|_| Error::Malformed(format!("boot code {what} version {value}")))
        };
        Ok(BootVersion {
            major: byte(major, "major")?,
            minor: byte(minor, "minor")?,
        })
    }

    /// Compare `bytes` bytes at `addr1` and `addr2`.
    pub fn compare(&mut self, addr1: u32, addr2: u32, bytes: u32) -> Result<Comparison> {
        let command = Command::Compare {
            addr1,
            addr2,
            bytes,
        };
        match self.execute(&command, Payload::None)? {
            Response::Ok(_) => Ok(Comparison::Equal),
            Response::Informational { values, .. } => Ok(Comparison::Mismatch { offset: values[0] }),
        }
    }

    /// Read the 128-bit unique ID as four words.
    pub fn read_uid(&mut self) -> Result<[u32; 4]> {
        self.values(&Command::ReadUid)
    }

    /// Read the CRC-32 of `bytes` bytes at `addr`.
    pub fn read_crc_checksum(&mut self, addr: u32, bytes: u32) -> Result<u32> {
        let [crc] = self.values(&Command::ReadCrcChecksum { addr, bytes })?;
        Ok(crc)
    }
}
