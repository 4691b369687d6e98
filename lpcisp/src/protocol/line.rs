//! Byte level transport for the ISP line protocol.
//!
//! While echo is enabled the boot ROM sends every received character back.
//! [`LineTransport`] then writes one byte at a time and checks each echo
//! before sending the next. With echo off, buffers go out in a single write.

use crate::error::{Error, Result};
use log::trace;
use std::io::{ErrorKind, Read, Write};

/// Maximum length of a response line, terminator included.
pub const MAX_LINE_LEN: usize = 32;

/// Line oriented transport over a raw serial channel.
pub struct LineTransport<P: Read + Write> {
    port: P,
    echo: bool,
}

impl<P: Read + Write> LineTransport<P> {
    /// Create a transport. The boot ROM starts with echo enabled.
    pub fn new(port: P) -> Self {
        Self { port, echo: true }
    }

    /// Whether the device is expected to echo transmitted characters.
    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Record the echo mode the device has acknowledged.
    pub fn set_echo(&mut self, enabled: bool) {
        self.echo = enabled;
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the transport and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Write bytes without waiting for any echo.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Send a text line (the caller supplies the CR LF terminator).
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        trace!("> {:?}", text);
        self.write_bytes(text.as_bytes())
    }

    /// Send bytes, consuming and checking the echo when it is enabled.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if !self.echo {
            return self.write_raw(data);
        }

        for &byte in data {
            self.write_raw(&[byte])?;
            let echoed = self.read_byte()?;
            if echoed != byte {
                return Err(Error::EchoMismatch {
                    expected: byte,
                    actual: echoed,
                });
            }
        }
        Ok(())
    }

    /// Read one line, terminator included.
    ///
    /// At most `max_len - 1` bytes are consumed; a longer line is a
    /// [`Error::SizeMismatch`].
    pub fn read_line(&mut self, max_len: usize) -> Result<String> {
        let mut line = Vec::with_capacity(max_len);
        for _ in 0..max_len.saturating_sub(1) {
            let byte = self.read_byte()?;
            line.push(byte);
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&line).into_owned();
                trace!("< {:?}", line);
                return Ok(line);
            }
        }
        Err(Error::SizeMismatch(format!(
            "no line terminator within {} bytes",
            max_len.saturating_sub(1)
        )))
    }

    /// Read exactly `buf.len()` raw bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Timeout(format!(
                        "received {filled} of {} bytes",
                        buf.len()
                    )));
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "received {filled} of {} bytes",
                        buf.len()
                    )));
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
        trace!("< {} raw bytes", buf.len());
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            match self.port.read(&mut buf) {
                Ok(1) => return Ok(buf[0]),
                Ok(_) => return Err(Error::Timeout("no data".into())),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Error::Timeout("no data".into()));
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

/// Parse a decimal response line such as `"0\r\n"`.
pub fn parse_decimal(line: &str, what: &str) -> Result<u32> {
    line.trim()
        .parse()
        .map_err(|_| Error::Malformed(format!("invalid {what}: {line:?}")))
}
