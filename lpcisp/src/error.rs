//! Error types for lpcisp.

use std::io;
use thiserror::Error;

use crate::protocol::isp::ReturnCode;

/// Result type for lpcisp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`], used when reporting a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The boot ROM did not answer the way the protocol requires.
    Protocol,
    /// The boot ROM answered with a non-success return code.
    Vendor,
    /// A file or serial device could not be opened, read or written.
    Io,
    /// The transfer itself failed (verification, capacity, cancellation).
    Transfer,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Protocol => "protocol",
            Self::Vendor => "vendor",
            Self::Io => "I/O",
            Self::Transfer => "transfer",
        })
    }
}

/// Error type for lpcisp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No data arrived before the read timeout expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A response line could not be parsed.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The device echoed a different byte than the one sent.
    #[error("Unexpected echo: sent 0x{expected:02X}, got 0x{actual:02X}")]
    EchoMismatch {
        /// Byte that was transmitted.
        expected: u8,
        /// Byte that came back.
        actual: u8,
    },

    /// A response did not fit the expected size.
    #[error("Size mismatch: {0}")]
    SizeMismatch(String),

    /// The boot ROM never answered the synchronisation request.
    #[error("Handshake failed: no \"Synchronized\" after {attempts} attempts")]
    HandshakeFailed {
        /// Number of `?` requests sent.
        attempts: u32,
    },

    /// The boot ROM rejected a command.
    #[error("{command} failed: {code}")]
    Vendor {
        /// Human readable command name.
        command: &'static str,
        /// Return code reported by the boot ROM.
        code: ReturnCode,
    },

    /// A sector was still not blank after erasing it.
    #[error("Sector still not blank after erase (offset {offset}, contents 0x{contents:08X})")]
    NotBlankAfterErase {
        /// Offset of the first non-blank word.
        offset: u32,
        /// Contents of that word.
        contents: u32,
    },

    /// Read-back of a written sector differs from the source.
    #[error("Verify failed at 0x{address:08X}: expected 0x{expected:02X}, read 0x{actual:02X}")]
    VerifyFailed {
        /// Flash address of the first differing byte.
        address: u32,
        /// Byte from the image.
        expected: u8,
        /// Byte read back from flash.
        actual: u8,
    },

    /// The image does not fit into the device flash.
    #[error("Image too large: {size} bytes do not fit into {capacity} bytes of flash")]
    ImageTooLarge {
        /// Bytes that would be written.
        size: u32,
        /// Flash capacity of the device.
        capacity: u32,
    },

    /// The embedding application asked to stop.
    #[error("Operation cancelled")]
    Cancelled,

    /// An error raised while processing one flash sector.
    #[error("sector {sector}")]
    Sector {
        /// Index of the sector being processed.
        sector: u32,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the failing sector index to this error.
    pub fn in_sector(self, sector: u32) -> Self {
        match self {
            Self::Sector { .. } | Self::Cancelled => self,
            other => Self::Sector {
                sector,
                source: Box::new(other),
            },
        }
    }

    /// Classify this error according to the ISP error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) => ErrorClass::Io,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorClass::Io,
            Self::Timeout(_)
            | Self::Malformed(_)
            | Self::EchoMismatch { .. }
            | Self::SizeMismatch(_)
            | Self::HandshakeFailed { .. } => ErrorClass::Protocol,
            Self::Vendor { .. } => ErrorClass::Vendor,
            Self::NotBlankAfterErase { .. }
            | Self::VerifyFailed { .. }
            | Self::ImageTooLarge { .. }
            | Self::Cancelled => ErrorClass::Transfer,
            Self::Sector { source, .. } => source.class(),
        }
    }
}
