//! LPC81x flasher implementation.
//!
//! Download programs the image one sector at a time:
//!
//! ```text
//! read sector from image, pad to 64 bytes, patch checksum (sector 0)
//!   |
//! I  blank check --- blank ----------------------------+
//!   | not blank                                        |
//! R  read back --- already holds payload -> next       |
//!   | differs                                          |
//! P, E, I  erase and check again                       |
//!   |                                                  |
//!   +<-------------------------------------------------+
//!   |
//! W, P, C  per chunk: stage in SRAM, prepare, copy to flash
//!   |
//! R  verify the whole payload
//! ```
//!
//! Unlock is sent once before the first sector. The interrupt checker is
//! polled between sectors, never inside one.

use crate::error::{Error, Result};
use crate::image::flash::{
    CRP_OFFSET, CrpLevel, FLASH_ADDRESS, SECTOR_SIZE, SectorPlan, StagingArea, read_sector,
};
use crate::port::Port;
use crate::target::chip::{ChipConfig, DeviceInfo, DeviceProfile, TransferReport};
use crate::target::lpc81x::client::{BlankCheck, IspClient};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use std::io::{Read, Write};

/// Largest block fetched by one Read Memory during upload.
const UPLOAD_CHUNK: u32 = 1024;

/// LPC81x flasher.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct Lpc81xFlasher<P: Port> {
    client: IspClient<P>,
    config: ChipConfig,
    device: Option<DeviceInfo>,
    unlocked: bool,
}

impl<P: Port> Lpc81xFlasher<P> {
    /// Create a new flasher with an existing port.
    pub fn new(port: P, config: ChipConfig) -> Self {
        Self {
            client: IspClient::new(port),
            config,
            device: None,
            unlocked: false,
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        self.client.port()
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        self.client.port_mut()
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.client.into_port()
    }

    /// Direct access to the ISP commands.
    pub fn client_mut(&mut self) -> &mut IspClient<P> {
        &mut self.client
    }

    /// Identification from the last successful [`connect`](Self::connect).
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Synchronise with the boot ROM, turn echo off and identify the part.
    pub fn connect(&mut self) -> Result<DeviceInfo> {
        info!("Waiting for boot ROM on {}...", self.client.port().name());
        self.client.port_mut().clear_input()?;
        self.client
            .isp_init(self.config.sync_retries, self.config.crystal_khz)?;
        self.client.echo(false)?;

        let boot_version = self.client.read_boot_code_version()?;
        debug!("ISP version {boot_version}");

        let part_id = self.client.read_part_id()?;
        let profile = DeviceProfile::lookup(part_id);
        if profile.is_known() {
            debug!("{profile}");
        } else {
            warn!(
                "Unknown part ID 0x{part_id:08X}, assuming {} bytes SRAM and {} bytes flash",
                profile.sram_bytes, profile.flash_bytes
            );
        }

        let uid = match self.client.read_uid() {
            Ok(uid) => {
                debug!(
                    "UID {:08X}-{:08X}-{:08X}-{:08X}",
                    uid[0], uid[1], uid[2], uid[3]
                );
                Some(uid)
            },
            Err(e @ Error::Vendor { .. }) => {
                debug!("UID not available: {e}");
                None
            },
            Err(e) => return Err(e),
        };

        let info = DeviceInfo {
            boot_version,
            profile,
            uid,
        };
        self.device = Some(info.clone());
        Ok(info)
    }

    fn ensure_connected(&mut self) -> Result<DeviceProfile> {
        match &self.device {
            Some(info) => Ok(info.profile),
            None => Ok(self.connect()?.profile),
        }
    }

    fn ensure_unlocked(&mut self) -> Result<()> {
        if !self.unlocked {
            self.client.unlock()?;
            self.unlocked = true;
        }
        Ok(())
    }

    /// Program `image` into flash starting at address 0.
    ///
    /// Connects first if [`connect`](Self::connect) has not been called.
    pub fn download<R, F>(&mut self, image: &mut R, mut progress: F) -> Result<TransferReport>
    where
        R: Read + ?Sized,
        F: FnMut(u32),
    {
        let profile = self.ensure_connected()?;
        let staging = profile.staging();
        debug!(
            "Staging {} bytes at 0x{:08X}",
            staging.size, staging.address
        );

        self.ensure_unlocked()?;

        let mut buf = vec![0u8; SECTOR_SIZE];
        let mut sector = 0u32;
        let mut written = 0u32;
        let mut programmed = 0u32;
        let mut vector_checksum = None;
        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Cancelled);
            }

            let n = read_sector(image, &mut buf)?;
            if n == 0 {
                break;
            }

            let plan = SectorPlan::new(sector, buf[..n].to_vec(), &staging)
                .map_err(|e| e.in_sector(sector))?;
            let end = plan.end_address();
            if profile.is_known() && end > profile.flash_bytes {
                return Err(Error::ImageTooLarge {
                    size: end,
                    capacity: profile.flash_bytes,
                }
                .in_sector(sector));
            }
            if let Some(checksum) = plan.checksum {
                debug!("Checksum 0x{checksum:08X}");
                vector_checksum = Some(checksum);
            }

            self.program_sector(&plan, &staging)
                .map_err(|e| e.in_sector(sector))?;

            written += n as u32;
            programmed = end;
            progress(programmed);

            if n < SECTOR_SIZE {
                break;
            }
            sector += 1;
        }

        let mut word = [0u8; 4];
        self.client.read_memory(CRP_OFFSET, &mut word)?;
        let crp_level = CrpLevel::from_word(LittleEndian::read_u32(&word));
        debug!("CRP: {crp_level}");
        debug!("Wrote {written} bytes ({programmed} bytes of flash)");

        Ok(TransferReport {
            bytes_transferred: written,
            crp_level,
            vector_checksum,
        })
    }

    fn program_sector(&mut self, plan: &SectorPlan, staging: &StagingArea) -> Result<()> {
        let index = plan.index;

        match self.client.blank_check_sectors(index, index)? {
            BlankCheck::Blank => debug!("Sector {index}: blank"),
            BlankCheck::NotBlank { offset, contents } => {
                debug!("Sector {index}: not blank at 0x{offset:08X} (0x{contents:08X})");
                if self.sector_holds(plan)? {
                    debug!("Sector {index}: unchanged, skipping");
                    return Ok(());
                }

                debug!("Sector {index}: erasing");
                self.client.prepare_sectors(index, index)?;
                self.client.erase_sectors(index, index)?;
                if let BlankCheck::NotBlank { offset, contents } =
                    self.client.blank_check_sectors(index, index)?
                {
                    return Err(Error::NotBlankAfterErase { offset, contents });
                }
            },
        }

        debug!("Sector {index}: writing {:?}", plan.chunks);
        let mut offset = 0usize;
        for &size in &plan.chunks {
            let chunk = &plan.payload[offset..offset + size as usize];
            self.client.write_to_ram(staging.address, chunk)?;
            self.client.prepare_sectors(index, index)?;
            self.client.copy_ram_to_flash(
                plan.flash_address + offset as u32,
                staging.address,
                size,
            )?;
            offset += size as usize;
        }

        debug!("Sector {index}: verifying");
        let mut readback = vec![0u8; plan.payload.len()];
        self.client.read_memory(plan.flash_address, &mut readback)?;
        if let Some(i) = readback
            .iter()
            .zip(&plan.payload)
            .position(|(actual, expected)| actual != expected)
        {
            return Err(Error::VerifyFailed {
                address: plan.flash_address + i as u32,
                expected: plan.payload[i],
                actual: readback[i],
            });
        }
        Ok(())
    }

    /// Whether the whole sector already equals the payload followed by
    /// erased bytes, the state an erase and write would leave.
    fn sector_holds(&mut self, plan: &SectorPlan) -> Result<bool> {
        let mut current = vec![0u8; SECTOR_SIZE];
        self.client.read_memory(plan.flash_address, &mut current)?;
        let (head, tail) = current.split_at(plan.payload.len());
        Ok(head == plan.payload.as_slice() && tail.iter().all(|&b| b == 0xFF))
    }

    /// Copy `length` bytes of flash (all of it when `None`) into `out`.
    ///
    /// Connects first if [`connect`](Self::connect) has not been called.
    pub fn upload<W, F>(&mut self, out: &mut W, length: Option<u32>, mut progress: F) -> Result<u32>
    where
        W: Write + ?Sized,
        F: FnMut(u32),
    {
        let profile = self.ensure_connected()?;
        let total = length.unwrap_or(profile.flash_bytes);
        debug!("Reading {total} bytes from 0x{FLASH_ADDRESS:08X}");

        let mut buf = vec![0u8; UPLOAD_CHUNK as usize];
        let mut done = 0u32;
        while done < total {
            if crate::is_interrupted_requested() {
                return Err(Error::Cancelled);
            }

            let want = (total - done).min(UPLOAD_CHUNK);
            // Read Memory only accepts whole words
            let words = want.div_ceil(4) * 4;
            self.client
                .read_memory(FLASH_ADDRESS + done, &mut buf[..words as usize])?;
            out.write_all(&buf[..want as usize])?;

            done += want;
            progress(done);
        }
        out.flush()?;

        debug!("Read {done} bytes");
        Ok(done)
    }

    /// Start user code at `addr` in Thumb mode.
    pub fn go(&mut self, addr: u32) -> Result<()> {
        self.ensure_connected()?;
        self.ensure_unlocked()?;
        info!("Starting user code at 0x{addr:08X}");
        self.client.go(addr)
    }

    /// Close the port and restore its settings.
    pub fn close(&mut self) {
        if let Err(e) = self.client.port_mut().close() {
            warn!("Failed to close {}: {e}", self.client.port().name());
        }
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{ChipConfig, Lpc81xFlasher, Result};
    use crate::port::{NativePort, SerialConfig};

    impl Lpc81xFlasher<NativePort> {
        /// Open `serial` and create a flasher on it.
        pub fn open(serial: &SerialConfig, config: ChipConfig) -> Result<Self> {
            let port = NativePort::open(serial)?;
            Ok(Self::new(port, config))
        }
    }
}

impl<P: Port> crate::target::Flasher for Lpc81xFlasher<P> {
    fn connect(&mut self) -> Result<DeviceInfo> {
        self.connect()
    }

    fn device(&self) -> Option<&DeviceInfo> {
        self.device()
    }

    fn download(
        &mut self,
        image: &mut dyn Read,
        progress: &mut dyn FnMut(u32),
    ) -> Result<TransferReport> {
        self.download(image, |written| progress(written))
    }

    fn upload(
        &mut self,
        out: &mut dyn Write,
        length: Option<u32>,
        progress: &mut dyn FnMut(u32),
    ) -> Result<u32> {
        self.upload(out, length, |read| progress(read))
    }

    fn go(&mut self, addr: u32) -> Result<()> {
        self.go(addr)
    }

    fn close(&mut self) {
        self.close();
    }
}
