//! NXP LPC81x UART ISP command set.
//!
//! The boot ROM speaks a line oriented ASCII protocol. Every command is a
//! single verb character followed by decimal arguments and CR LF:
//!
//! ```text
//! host   -> "W 268436224 256\r\n"
//! device -> "0\r\n"                  return code
//! host   -> <256 raw bytes>          data phase (W and R only)
//! device -> "<value>\r\n" ...        follow-on lines (J, K, N, S, and the
//!                                    informational codes of I and M)
//! ```
//!
//! [`Command`] describes the whole table: how a command is rendered, which
//! binary data phase follows a successful return code, and how many decimal
//! lines come after it. The executor in
//! [`IspClient`](crate::target::lpc81x::client::IspClient) is written once
//! against this table.

use std::fmt;

/// Key accepted by the Unlock command.
pub const UNLOCK_KEY: u32 = 23130;

/// Return codes of the UART ISP commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReturnCode {
    /// Command executed successfully.
    Success = 0,
    /// Invalid command.
    InvalidCommand = 1,
    /// Source address is not on a word boundary.
    SrcAddrError = 2,
    /// Destination address is not on a correct boundary.
    DstAddrError = 3,
    /// Source address is not mapped in the memory map.
    SrcAddrNotMapped = 4,
    /// Destination address is not mapped in the memory map.
    DstAddrNotMapped = 5,
    /// Byte count is not a permitted value.
    CountError = 6,
    /// Sector number is invalid or end sector is before start sector.
    InvalidSector = 7,
    /// Sector is not blank.
    SectorNotBlank = 8,
    /// Command to prepare sector for write operation was not executed.
    SectorNotPrepared = 9,
    /// Source and destination data are not the same.
    CompareError = 10,
    /// Flash programming interface is busy.
    Busy = 11,
    /// Insufficient number of parameters or invalid parameter.
    ParamError = 12,
    /// Address is not on a word boundary.
    AddrError = 13,
    /// Address is not mapped in the memory map.
    AddrNotMapped = 14,
    /// Command is locked.
    CmdLocked = 15,
    /// Unlock code is invalid.
    InvalidCode = 16,
    /// Invalid baud rate setting.
    InvalidBaudRate = 17,
    /// Invalid stop bit setting.
    InvalidStopBit = 18,
    /// Code read protection enabled.
    CodeReadProtectionEnabled = 19,
}

impl ReturnCode {
    const ALL: [Self; 20] = [
        Self::Success,
        Self::InvalidCommand,
        Self::SrcAddrError,
        Self::DstAddrError,
        Self::SrcAddrNotMapped,
        Self::DstAddrNotMapped,
        Self::CountError,
        Self::InvalidSector,
        Self::SectorNotBlank,
        Self::SectorNotPrepared,
        Self::CompareError,
        Self::Busy,
        Self::ParamError,
        Self::AddrError,
        Self::AddrNotMapped,
        Self::CmdLocked,
        Self::InvalidCode,
        Self::InvalidBaudRate,
        Self::InvalidStopBit,
        Self::CodeReadProtectionEnabled,
    ];

    /// Look up a numeric return code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    /// Numeric value sent by the boot ROM.
    pub fn code(self) -> u32 {
        u32::from(self as u8)
    }

    /// Name used in the NXP user manual.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "CMD_SUCCESS",
            Self::InvalidCommand => "INVALID_COMMAND",
            Self::SrcAddrError => "SRC_ADDR_ERROR",
            Self::DstAddrError => "DST_ADDR_ERROR",
            Self::SrcAddrNotMapped => "SRC_ADDR_NOT_MAPPED",
            Self::DstAddrNotMapped => "DST_ADDR_NOT_MAPPED",
            Self::CountError => "COUNT_ERROR",
            Self::InvalidSector => "INVALID_SECTOR",
            Self::SectorNotBlank => "SECTOR_NOT_BLANK",
            Self::SectorNotPrepared => "SECTOR_NOT_PREPARED_FOR_WRITE_OPERATION",
            Self::CompareError => "COMPARE_ERROR",
            Self::Busy => "BUSY",
            Self::ParamError => "PARAM_ERROR",
            Self::AddrError => "ADDR_ERROR",
            Self::AddrNotMapped => "ADDR_NOT_MAPPED",
            Self::CmdLocked => "CMD_LOCKED",
            Self::InvalidCode => "INVALID_CODE",
            Self::InvalidBaudRate => "INVALID_BAUD_RATE",
            Self::InvalidStopBit => "INVALID_STOP_BIT",
            Self::CodeReadProtectionEnabled => "CODE_READ_PROTECTION_ENABLED",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binary data phase that follows a successful return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPhase {
    /// Text lines only.
    None,
    /// Host sends this many raw bytes (Write to RAM).
    Send(u32),
    /// Device sends this many raw bytes (Read Memory).
    Receive(u32),
}

/// A single UART ISP command with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `U <key>`: unlock Erase, Write and Go.
    Unlock {
        /// Unlock key, normally [`UNLOCK_KEY`].
        key: u32,
    },
    /// `B <baud> <stop>`: change the ROM's baud rate.
    SetBaudRate {
        /// New baud rate.
        baud: u32,
        /// Number of stop bits (1 or 2).
        stop_bits: u8,
    },
    /// `A <0|1>`: switch character echo.
    Echo {
        /// Whether the ROM echoes received characters.
        enabled: bool,
    },
    /// `W <addr> <bytes>`: write raw data to RAM.
    WriteToRam {
        /// RAM start address (word aligned).
        addr: u32,
        /// Number of bytes (multiple of 4).
        bytes: u32,
    },
    /// `R <addr> <bytes>`: read raw memory.
    ReadMemory {
        /// Start address (word aligned).
        addr: u32,
        /// Number of bytes (multiple of 4).
        bytes: u32,
    },
    /// `P <start> <end>`: prepare sectors for write.
    PrepareSectors {
        /// First sector.
        start: u32,
        /// Last sector.
        end: u32,
    },
    /// `C <flash> <ram> <bytes>`: program flash from RAM.
    CopyRamToFlash {
        /// Destination flash address.
        flash: u32,
        /// Source RAM address.
        ram: u32,
        /// Byte count (64, 128, 256, 512 or 1024).
        bytes: u32,
    },
    /// `G <addr> T`: jump to code in Thumb mode.
    Go {
        /// Entry address.
        addr: u32,
    },
    /// `E <start> <end>`: erase sectors.
    EraseSectors {
        /// First sector.
        start: u32,
        /// Last sector.
        end: u32,
    },
    /// `I <start> <end>`: blank check sectors.
    BlankCheckSectors {
        /// First sector.
        start: u32,
        /// Last sector.
        end: u32,
    },
    /// `J`: read part identification number.
    ReadPartId,
    /// `K`: read boot code version.
    ReadBootCodeVersion,
    /// `M <addr1> <addr2> <bytes>`: compare two memory regions.
    Compare {
        /// First address.
        addr1: u32,
        /// Second address.
        addr2: u32,
        /// Byte count (multiple of 4).
        bytes: u32,
    },
    /// `N`: read the 128-bit unique device ID.
    ReadUid,
    /// `S <addr> <bytes>`: read the CRC checksum of a memory block.
    ReadCrcChecksum {
        /// Start address.
        addr: u32,
        /// Byte count.
        bytes: u32,
    },
}

impl Command {
    /// Verb character sent on the wire.
    pub fn verb(&self) -> char {
        match self {
            Self::Unlock { .. } => 'U',
            Self::SetBaudRate { .. } => 'B',
            Self::Echo { .. } => 'A',
            Self::WriteToRam { .. } => 'W',
            Self::ReadMemory { .. } => 'R',
            Self::PrepareSectors { .. } => 'P',
            Self::CopyRamToFlash { .. } => 'C',
            Self::Go { .. } => 'G',
            Self::EraseSectors { .. } => 'E',
            Self::BlankCheckSectors { .. } => 'I',
            Self::ReadPartId => 'J',
            Self::ReadBootCodeVersion => 'K',
            Self::Compare { .. } => 'M',
            Self::ReadUid => 'N',
            Self::ReadCrcChecksum { .. } => 'S',
        }
    }

    /// Human readable name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unlock { .. } => "Unlock",
            Self::SetBaudRate { .. } => "Set Baud Rate",
            Self::Echo { .. } => "Echo",
            Self::WriteToRam { .. } => "Write to RAM",
            Self::ReadMemory { .. } => "Read Memory",
            Self::PrepareSectors { .. } => "Prepare sectors",
            Self::CopyRamToFlash { .. } => "Copy RAM to flash",
            Self::Go { .. } => "Go",
            Self::EraseSectors { .. } => "Erase sectors",
            Self::BlankCheckSectors { .. } => "Blank check sectors",
            Self::ReadPartId => "Read Part ID",
            Self::ReadBootCodeVersion => "Read Boot code version",
            Self::Compare { .. } => "Compare",
            Self::ReadUid => "Read UID",
            Self::ReadCrcChecksum { .. } => "Read CRC checksum",
        }
    }

    /// Render the command line including the CR LF terminator.
    pub fn line(&self) -> String {
        let verb = self.verb();
        match *self {
            Self::Unlock { key } => format!("{verb} {key}\r\n"),
            Self::SetBaudRate { baud, stop_bits } => format!("{verb} {baud} {stop_bits}\r\n"),
            Self::Echo { enabled } => format!("{verb} {}\r\n", u8::from(enabled)),
            Self::WriteToRam { addr, bytes }
            | Self::ReadMemory { addr, bytes }
            | Self::ReadCrcChecksum { addr, bytes } => format!("{verb} {addr} {bytes}\r\n"),
            Self::PrepareSectors { start, end }
            | Self::EraseSectors { start, end }
            | Self::BlankCheckSectors { start, end } => format!("{verb} {start} {end}\r\n"),
            Self::CopyRamToFlash { flash, ram, bytes } => {
                format!("{verb} {flash} {ram} {bytes}\r\n")
            },
            Self::Go { addr } => format!("{verb} {addr} T\r\n"),
            Self::Compare {
                addr1,
                addr2,
                bytes,
            } => format!("{verb} {addr1} {addr2} {bytes}\r\n"),
            Self::ReadPartId | Self::ReadBootCodeVersion | Self::ReadUid => format!("{verb}\r\n"),
        }
    }

    /// Raw binary transfer that follows `CMD_SUCCESS`.
    pub fn data_phase(&self) -> DataPhase {
        match *self {
            Self::WriteToRam { bytes, .. } => DataPhase::Send(bytes),
            Self::ReadMemory { bytes, .. } => DataPhase::Receive(bytes),
            _ => DataPhase::None,
        }
    }

    /// Number of decimal lines that follow `CMD_SUCCESS`.
    pub fn data_lines(&self) -> usize {
        match self {
            Self::ReadPartId | Self::ReadCrcChecksum { .. } => 1,
            Self::ReadBootCodeVersion => 2,
            Self::ReadUid => 4,
            _ => 0,
        }
    }

    /// Number of decimal lines that follow an informational return code.
    ///
    /// Returns `None` when `code` is an ordinary failure for this command.
    pub fn informational_lines(&self, code: ReturnCode) -> Option<usize> {
        match (self, code) {
            // offset and contents of the first non-blank word
            (Self::BlankCheckSectors { .. }, ReturnCode::SectorNotBlank) => Some(2),
            // offset of the first mismatch
            (Self::Compare { .. }, ReturnCode::CompareError) => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.line().trim_end())
    }
}
