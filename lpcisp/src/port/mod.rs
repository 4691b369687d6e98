//! Port abstraction for serial communication.
//!
//! The ISP layers only need a byte stream with a read timeout, so they are
//! generic over the [`Port`] trait. The native implementation wraps the
//! `serialport` crate; tests drive the same code with an in-memory device.
//!
//! ```text
//! +------------------+
//! |  Lpc81xFlasher   |   sector loop, upload loop
//! +--------+---------+
//!          |
//! +--------+---------+
//! |    IspClient     |   command table, return codes
//! +--------+---------+
//!          |
//! +--------+---------+
//! |  LineTransport   |   echo handling, lines, raw blocks
//! +--------+---------+
//!          |
//! +--------+---------+
//! |    Port trait    |   NativePort (serialport + termios restore)
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default read timeout. The boot ROM answers within a few milliseconds, the
/// slowest command (erase) well within half a second.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Baud rates the LPC81x boot ROM auto-detects reliably.
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115_200];

/// Serial port configuration.
///
/// The line is always 8 data bits, no parity, one stop bit and no flow
/// control; only the device, speed and timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Returns whether `baud` is one of [`SUPPORTED_BAUD_RATES`].
pub fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUD_RATES.contains(&baud)
}

/// Serial channel used by the ISP client.
pub trait Port: Read + Write + Send {
    /// Discard unread input.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and restore the line settings found at open.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

#[cfg(feature = "native")]
pub use native::NativePort;
