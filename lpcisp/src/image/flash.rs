//! LPC81x flash image layout.
//!
//! The image file is a flat copy of flash starting at address 0. Two words
//! have a meaning to the boot ROM:
//!
//! ```text
//! 0x000  +--------------------------+
//!        | vector table words 0..6  |
//! 0x01C  | word 7: vector checksum  |  sum of words 0..7 must be 0
//!        |           ...            |
//! 0x2FC  | CRP word                 |  code read protection level
//!        |           ...            |
//! 0x400  +--------------------------+  sector 1
//! ```
//!
//! Flash is programmed one 1024-byte sector at a time. Data is first staged
//! in SRAM with Write to RAM, then committed with Copy RAM to flash, which
//! only accepts the sizes in [`CHUNK_SIZES`].

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::io::{self, ErrorKind, Read};

/// Minimum write granularity of the flash.
pub const PAGE_SIZE: usize = 64;

/// Erase granularity of the flash.
pub const SECTOR_SIZE: usize = 1024;

/// Start of flash in the memory map.
pub const FLASH_ADDRESS: u32 = 0x0000_0000;

/// Start of SRAM in the memory map.
pub const SRAM_ADDRESS: u32 = 0x1000_0000;

/// SRAM used by the boot ROM for its stack and variables.
pub const ROM_RESERVED: u32 = 0x300;

/// Flash offset of the code read protection word.
pub const CRP_OFFSET: u32 = 0x2FC;

/// Byte counts accepted by Copy RAM to flash.
pub const CHUNK_SIZES: [u32; 5] = [64, 128, 256, 512, 1024];

/// Index of the vector table checksum word.
pub const CHECKSUM_WORD: usize = 7;

/// Code read protection level encoded in the CRP word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CrpLevel {
    /// No protection.
    #[default]
    None,
    /// SWD disabled, partial flash updates through ISP allowed.
    Crp1,
    /// SWD disabled, only full chip erase through ISP.
    Crp2,
    /// SWD and ISP entry disabled.
    Crp3,
    /// ISP entry pin not sampled.
    NoIsp,
}

impl CrpLevel {
    /// Magic value for CRP1.
    pub const CRP1_MAGIC: u32 = 0x1234_5678;
    /// Magic value for CRP2.
    pub const CRP2_MAGIC: u32 = 0x8765_4321;
    /// Magic value for CRP3.
    pub const CRP3_MAGIC: u32 = 0x4321_8765;
    /// Magic value for NO_ISP.
    pub const NO_ISP_MAGIC: u32 = 0x4E69_7370;

    /// Classify a CRP word read from flash.
    pub fn from_word(word: u32) -> Self {
        match word {
            Self::CRP1_MAGIC => Self::Crp1,
            Self::CRP2_MAGIC => Self::Crp2,
            Self::CRP3_MAGIC => Self::Crp3,
            Self::NO_ISP_MAGIC => Self::NoIsp,
            _ => Self::None,
        }
    }
}

impl fmt::Display for CrpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Crp1 => write!(f, "CRP1"),
            Self::Crp2 => write!(f, "CRP2"),
            Self::Crp3 => write!(f, "CRP3"),
            Self::NoIsp => write!(f, "NO_ISP"),
        }
    }
}

/// Checksum that makes the first eight vector table words sum to zero.
///
/// `sector` must hold at least the first 28 bytes of the image.
pub fn vector_checksum(sector: &[u8]) -> u32 {
    (0..CHECKSUM_WORD)
        .map(|i| LittleEndian::read_u32(&sector[i * 4..]))
        .fold(0u32, u32::wrapping_add)
        .wrapping_neg()
}

/// Overwrite word 7 of `sector` with the vector checksum and return it.
pub fn patch_vector_checksum(sector: &mut [u8]) -> u32 {
    let checksum = vector_checksum(sector);
    LittleEndian::write_u32(&mut sector[CHECKSUM_WORD * 4..], checksum);
    checksum
}

/// Pad `payload` with `0xFF` up to the next page boundary.
pub fn pad_to_page(payload: &mut Vec<u8>) {
    let padded = payload.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
    payload.resize(padded, 0xFF);
}

/// Fill `buf` from `reader`, stopping early only at end of file.
pub fn read_sector<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// SRAM window used to stage data for Copy RAM to flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingArea {
    /// Start address in SRAM.
    pub address: u32,
    /// Usable bytes.
    pub size: u32,
}

impl StagingArea {
    /// Staging window for a part with `sram_bytes` of SRAM.
    ///
    /// The first [`ROM_RESERVED`] bytes belong to the boot ROM. Small parts
    /// stage right after them; larger parts stage at 1 KiB.
    pub fn for_sram(sram_bytes: u32) -> Self {
        let usable = sram_bytes.saturating_sub(ROM_RESERVED);
        if sram_bytes <= SECTOR_SIZE as u32 {
            Self {
                address: SRAM_ADDRESS + ROM_RESERVED,
                size: usable,
            }
        } else {
            Self {
                address: SRAM_ADDRESS + SECTOR_SIZE as u32,
                size: usable.min(SECTOR_SIZE as u32),
            }
        }
    }
}

/// Split a page aligned payload into Copy RAM to flash sizes.
///
/// Each chunk is the largest entry of [`CHUNK_SIZES`] that fits both the
/// staging area and the bytes still to write. Fails when no entry fits,
/// which happens for a staging area below the smallest copy size or a
/// payload that is not page aligned.
pub fn chunk_sizes(staging_size: u32, payload_len: usize) -> Result<Vec<u32>> {
    let mut chunks = Vec::new();
    let mut remaining = payload_len as u32;
    while remaining > 0 {
        let limit = staging_size.min(remaining);
        let Some(&size) = CHUNK_SIZES.iter().rev().find(|&&s| s <= limit) else {
            return Err(Error::SizeMismatch(format!(
                "{remaining} bytes left that no copy size fits (staging area {staging_size} bytes)"
            )));
        };
        chunks.push(size);
        remaining -= size;
    }
    Ok(chunks)
}

/// Work for one sector of a download.
#[derive(Debug, Clone)]
pub struct SectorPlan {
    /// Sector number.
    pub index: u32,
    /// Flash address of the first byte.
    pub flash_address: u32,
    /// Page aligned payload.
    pub payload: Vec<u8>,
    /// Copy RAM to flash sizes covering `payload`.
    pub chunks: Vec<u32>,
    /// Vector checksum written into sector 0.
    pub checksum: Option<u32>,
}

impl SectorPlan {
    /// Pad `payload`, patch the vector checksum into sector 0 and cut the
    /// chunk list.
    pub fn new(index: u32, mut payload: Vec<u8>, staging: &StagingArea) -> Result<Self> {
        pad_to_page(&mut payload);
        let checksum = (index == 0 && payload.len() >= PAGE_SIZE)
            .then(|| patch_vector_checksum(&mut payload));
        let chunks = chunk_sizes(staging.size, payload.len())?;
        Ok(Self {
            index,
            flash_address: FLASH_ADDRESS + index * SECTOR_SIZE as u32,
            payload,
            chunks,
            checksum,
        })
    }

    /// Flash address one past the last payload byte.
    pub fn end_address(&self) -> u32 {
        self.flash_address + self.payload.len() as u32
    }
}
