//! Chip/target abstraction.
//!
//! Device profiles map the part ID read from the boot ROM to a name and
//! memory sizes. The [`Flasher`] trait is the interface the CLI drives.

use crate::error::Result;
use crate::image::flash::{CrpLevel, StagingArea};
use crate::target::lpc81x::client::{BootVersion, DEFAULT_CRYSTAL_KHZ, DEFAULT_SYNC_RETRIES};
use std::fmt;
use std::io::{Read, Write};

#[cfg(feature = "native")]
use crate::port::SerialConfig;

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChipFamily {
    /// LPC810, LPC811 and LPC812.
    #[default]
    Lpc81x,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lpc81x => write!(f, "LPC81x"),
        }
    }
}

/// Static description of one part.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Part identification number returned by `J`.
    pub part_id: u32,
    /// Part name.
    pub name: &'static str,
    /// SRAM size in bytes.
    pub sram_bytes: u32,
    /// Flash size in bytes.
    pub flash_bytes: u32,
}

/// Known LPC81x parts.
pub const DEVICE_PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        part_id: 0x0000_8100,
        name: "LPC810M021FN8",
        sram_bytes: 1024,
        flash_bytes: 4096,
    },
    DeviceProfile {
        part_id: 0x0000_8110,
        name: "LPC811M001JDH16",
        sram_bytes: 2048,
        flash_bytes: 8192,
    },
    DeviceProfile {
        part_id: 0x0000_8120,
        name: "LPC812M101JDH16",
        sram_bytes: 4096,
        flash_bytes: 16384,
    },
    DeviceProfile {
        part_id: 0x0000_8121,
        name: "LPC812M101JD20",
        sram_bytes: 4096,
        flash_bytes: 16384,
    },
    DeviceProfile {
        part_id: 0x0000_8122,
        name: "LPC812M101JDH20/JTB16",
        sram_bytes: 4096,
        flash_bytes: 16384,
    },
];

impl DeviceProfile {
    /// Name reported for part IDs missing from [`DEVICE_PROFILES`].
    pub const UNKNOWN_NAME: &'static str = "unknown device";

    /// Look up `part_id`. Unknown parts get the smallest family member's
    /// memory sizes.
    pub fn lookup(part_id: u32) -> Self {
        DEVICE_PROFILES
            .iter()
            .find(|p| p.part_id == part_id)
            .copied()
            .unwrap_or(Self {
                part_id,
                name: Self::UNKNOWN_NAME,
                sram_bytes: 1024,
                flash_bytes: 4096,
            })
    }

    /// Whether the part ID was found in the table.
    pub fn is_known(&self) -> bool {
        DEVICE_PROFILES.iter().any(|p| p.part_id == self.part_id)
    }

    /// SRAM window used for staging flash writes.
    pub fn staging(&self) -> StagingArea {
        StagingArea::for_sram(self.sram_bytes)
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID 0x{:04X} {}", self.part_id, self.name)
    }
}

/// Chip configuration parameters.
#[derive(Debug, Clone)]
pub struct ChipConfig {
    /// Chip family.
    pub family: ChipFamily,
    /// Crystal frequency reported during the handshake, in kHz.
    pub crystal_khz: u32,
    /// Number of `?` requests before giving up.
    pub sync_retries: u32,
}

impl ChipConfig {
    /// Create a new chip configuration for the given family.
    pub fn new(family: ChipFamily) -> Self {
        Self {
            family,
            crystal_khz: DEFAULT_CRYSTAL_KHZ,
            sync_retries: DEFAULT_SYNC_RETRIES,
        }
    }

    /// Set the crystal frequency.
    #[must_use]
    pub fn with_crystal_khz(mut self, khz: u32) -> Self {
        self.crystal_khz = khz;
        self
    }

    /// Set the number of synchronisation attempts.
    #[must_use]
    pub fn with_sync_retries(mut self, retries: u32) -> Self {
        self.sync_retries = retries;
        self
    }
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self::new(ChipFamily::default())
    }
}

/// Identification read while connecting.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Boot code version.
    pub boot_version: BootVersion,
    /// Resolved profile (possibly the unknown-device fallback).
    pub profile: DeviceProfile,
    /// 128-bit unique ID, if the ROM supports `N`.
    pub uid: Option<[u32; 4]>,
}

/// Outcome of a download.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes taken from the image, skipped unchanged sectors included.
    /// Page padding is not counted.
    pub bytes_transferred: u32,
    /// Protection level found in the CRP word afterwards.
    pub crp_level: CrpLevel,
    /// Vector checksum patched into sector 0, if the image reached it.
    pub vector_checksum: Option<u32>,
}

/// Trait for flashing operations across all chip families.
pub trait Flasher {
    /// Synchronise with the boot ROM and identify the part.
    fn connect(&mut self) -> Result<DeviceInfo>;

    /// Identification from the last successful [`connect`](Self::connect).
    fn device(&self) -> Option<&DeviceInfo>;

    /// Program `image` into flash starting at address 0.
    ///
    /// `progress` receives the running number of flash bytes programmed,
    /// page padding included.
    fn download(
        &mut self,
        image: &mut dyn Read,
        progress: &mut dyn FnMut(u32),
    ) -> Result<TransferReport>;

    /// Copy `length` bytes of flash (all of it when `None`) into `out`.
    ///
    /// `progress` receives the running number of bytes read.
    fn upload(
        &mut self,
        out: &mut dyn Write,
        length: Option<u32>,
        progress: &mut dyn FnMut(u32),
    ) -> Result<u32>;

    /// Start user code at `addr`.
    fn go(&mut self, addr: u32) -> Result<()>;

    /// Close the flasher and release resources.
    ///
    /// Safe to call more than once. After calling this method, the flasher
    /// cannot be used.
    fn close(&mut self);
}

impl ChipFamily {
    /// Create a flasher instance for this chip family (native platforms).
    #[cfg(feature = "native")]
    pub fn create_flasher(
        &self,
        serial: &SerialConfig,
        config: ChipConfig,
    ) -> Result<Box<dyn Flasher>> {
        match self {
            Self::Lpc81x => {
                let flasher = super::lpc81x::flasher::Lpc81xFlasher::open(serial, config)?;
                Ok(Box::new(flasher))
            },
        }
    }
}
