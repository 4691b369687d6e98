//! Simulated LPC81x boot ROM for tests.
//!
//! Implements [`Port`] and answers the UART ISP command set against
//! in-memory flash and SRAM. Programming only clears bits, Copy RAM to
//! flash needs Unlock and a matching Prepare, and every command line is
//! recorded for assertions.

use crate::error::Result;
use crate::image::flash::{CHUNK_SIZES, PAGE_SIZE, SECTOR_SIZE, SRAM_ADDRESS};
use crate::port::Port;
use crate::protocol::isp::{ReturnCode, UNLOCK_KEY};
use crate::target::chip::DeviceProfile;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitSync,
    AwaitSyncEcho,
    AwaitFrequency,
    Command,
    RamData { addr: u32, remaining: u32 },
}

#[derive(Debug, Clone, Copy)]
enum Memory {
    Flash(usize),
    Sram(usize),
}

pub(crate) struct SimulatedDevice {
    part_id: u32,
    flash: Vec<u8>,
    sram: Vec<u8>,
    state: State,
    echo: bool,
    unlocked: bool,
    prepared: Option<(u32, u32)>,
    line: Vec<u8>,
    output: VecDeque<u8>,
    silent: bool,
    answer_after: u32,
    sync_requests: u32,
    crystal_khz: Option<u32>,
    forced_code: Option<u32>,
    has_uid: bool,
    stuck: Vec<u32>,
    log: Vec<String>,
    erases: u32,
    started_at: Option<u32>,
    baud_rate: u32,
}

impl SimulatedDevice {
    pub(crate) const UID: [u32; 4] = [0x0102_0304, 0x1122_3344, 0xA5A5_5A5A, 0xDEAD_BEEF];

    /// Freshly erased device with the memory sizes of `part_id`.
    pub(crate) fn new(part_id: u32) -> Self {
        let profile = DeviceProfile::lookup(part_id);
        Self {
            part_id,
            flash: vec![0xFF; profile.flash_bytes as usize],
            sram: vec![0; profile.sram_bytes as usize],
            state: State::AwaitSync,
            echo: true,
            unlocked: false,
            prepared: None,
            line: Vec::new(),
            output: VecDeque::new(),
            silent: false,
            answer_after: 0,
            sync_requests: 0,
            crystal_khz: None,
            forced_code: None,
            has_uid: true,
            stuck: Vec::new(),
            log: Vec::new(),
            erases: 0,
            started_at: None,
            baud_rate: 115_200,
        }
    }

    /// Device that never answers `?`.
    pub(crate) fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new(0x8120)
        }
    }

    /// Ignore the first `count` synchronisation requests.
    pub(crate) fn answer_after(mut self, count: u32) -> Self {
        self.answer_after = count;
        self
    }

    /// Leave `bytes` unread in the receive buffer, as line noise at power-up.
    pub(crate) fn with_stale_input(mut self, bytes: &[u8]) -> Self {
        self.output.extend(bytes);
        self
    }

    /// Answer every command with `code` once synchronised.
    pub(crate) fn with_forced_code(mut self, code: u32) -> Self {
        self.forced_code = Some(code);
        self
    }

    /// ROM revision without the Read UID command.
    pub(crate) fn without_uid(mut self) -> Self {
        self.has_uid = false;
        self
    }

    /// Make the flash byte at `addr` ignore programming.
    pub(crate) fn stick_byte(&mut self, addr: u32) {
        self.stuck.push(addr);
    }

    /// Overwrite flash contents directly.
    pub(crate) fn poke_flash(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
    }

    pub(crate) fn command_log(&self) -> &[String] {
        &self.log
    }

    pub(crate) fn erase_count(&self) -> u32 {
        self.erases
    }

    pub(crate) fn sync_requests(&self) -> u32 {
        self.sync_requests
    }

    pub(crate) fn crystal_khz(&self) -> Option<u32> {
        self.crystal_khz
    }

    pub(crate) fn echo(&self) -> bool {
        self.echo
    }

    pub(crate) fn started_at(&self) -> Option<u32> {
        self.started_at
    }

    /// CRC-32 (IEEE) of a flash or SRAM block.
    pub(crate) fn crc_of(&self, addr: u32, len: u32) -> u32 {
        let data: &[u8] = match self.region(addr, len) {
            Some(region) => self.slice(region, len),
            None => &[],
        };
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
        !crc
    }

    fn region(&self, addr: u32, len: u32) -> Option<Memory> {
        let end = u64::from(addr) + u64::from(len);
        if end <= self.flash.len() as u64 {
            return Some(Memory::Flash(addr as usize));
        }
        let sram_end = u64::from(SRAM_ADDRESS) + self.sram.len() as u64;
        if addr >= SRAM_ADDRESS && end <= sram_end {
            return Some(Memory::Sram((addr - SRAM_ADDRESS) as usize));
        }
        None
    }

    fn slice(&self, region: Memory, len: u32) -> &[u8] {
        match region {
            Memory::Flash(off) => &self.flash[off..off + len as usize],
            Memory::Sram(off) => &self.sram[off..off + len as usize],
        }
    }

    fn respond(&mut self, text: &str) {
        self.output.extend(text.bytes());
    }

    fn code(&mut self, code: ReturnCode) {
        self.respond(&format!("{}\r\n", code.code()));
    }

    fn ok_with(&mut self, values: &[u32]) {
        self.code(ReturnCode::Success);
        for value in values {
            self.respond(&format!("{value}\r\n"));
        }
    }

    fn valid_sectors(&self, start: u32, end: u32) -> bool {
        start <= end && (end as usize) < self.flash.len() / SECTOR_SIZE
    }

    fn is_prepared(&self, first: u32, last: u32) -> bool {
        matches!(self.prepared, Some((s, e)) if s <= first && last <= e)
    }

    fn feed(&mut self, byte: u8) {
        match self.state {
            State::AwaitSync => {
                if byte == b'?' {
                    self.sync_requests += 1;
                    if !self.silent && self.sync_requests > self.answer_after {
                        self.respond("Synchronized\r\n");
                        self.state = State::AwaitSyncEcho;
                    }
                }
            },
            State::RamData { addr, remaining } => {
                if self.echo {
                    self.output.push_back(byte);
                }
                self.sram[(addr - SRAM_ADDRESS) as usize] = byte;
                self.state = if remaining == 1 {
                    State::Command
                } else {
                    State::RamData {
                        addr: addr + 1,
                        remaining: remaining - 1,
                    }
                };
            },
            State::AwaitSyncEcho | State::AwaitFrequency | State::Command => {
                if self.echo {
                    self.output.push_back(byte);
                }
                self.line.push(byte);
                if byte == b'\n' {
                    let line = String::from_utf8_lossy(&std::mem::take(&mut self.line)).into_owned();
                    self.handle_line(&line);
                }
            },
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.state {
            State::AwaitSyncEcho => {
                if line == "Synchronized\r\n" {
                    self.respond("OK\r\n");
                    self.state = State::AwaitFrequency;
                }
            },
            State::AwaitFrequency => {
                self.crystal_khz = line.trim().parse().ok();
                self.respond("OK\r\n");
                self.state = State::Command;
            },
            State::Command => self.command(line.trim_end()),
            State::AwaitSync | State::RamData { .. } => {},
        }
    }

    fn command(&mut self, text: &str) {
        self.log.push(text.to_string());
        if let Some(code) = self.forced_code {
            self.respond(&format!("{code}\r\n"));
            return;
        }

        let mut parts = text.split(' ');
        let verb = parts.next().unwrap_or_default();
        let args: Vec<u32> = parts.filter_map(|p| p.parse().ok()).collect();

        match (verb, args.as_slice()) {
            ("U", &[key]) => {
                if key == UNLOCK_KEY {
                    self.unlocked = true;
                    self.ok_with(&[]);
                } else {
                    self.code(ReturnCode::InvalidCode);
                }
            },
            ("B", &[baud, _]) => {
                self.baud_rate = baud;
                self.ok_with(&[]);
            },
            ("A", &[mode]) => {
                self.ok_with(&[]);
                self.echo = mode != 0;
            },
            ("W", &[addr, bytes]) => self.write_to_ram(addr, bytes),
            ("R", &[addr, bytes]) => self.read_memory(addr, bytes),
            ("P", &[start, end]) => {
                if self.valid_sectors(start, end) {
                    self.prepared = Some((start, end));
                    self.ok_with(&[]);
                } else {
                    self.code(ReturnCode::InvalidSector);
                }
            },
            ("C", &[flash, ram, bytes]) => self.copy_ram_to_flash(flash, ram, bytes),
            ("G", &[addr]) => {
                if self.unlocked {
                    self.started_at = Some(addr);
                    self.ok_with(&[]);
                } else {
                    self.code(ReturnCode::CmdLocked);
                }
            },
            ("E", &[start, end]) => self.erase(start, end),
            ("I", &[start, end]) => self.blank_check(start, end),
            ("J", &[]) => self.ok_with(&[self.part_id]),
            ("K", &[]) => self.ok_with(&[4, 13]),
            ("M", &[addr1, addr2, bytes]) => self.compare(addr1, addr2, bytes),
            ("N", &[]) if self.has_uid => self.ok_with(&Self::UID),
            ("S", &[addr, bytes]) => {
                let crc = self.crc_of(addr, bytes);
                self.ok_with(&[crc]);
            },
            _ => self.code(ReturnCode::InvalidCommand),
        }
    }

    fn write_to_ram(&mut self, addr: u32, bytes: u32) {
        if addr % 4 != 0 {
            return self.code(ReturnCode::DstAddrError);
        }
        if bytes % 4 != 0 {
            return self.code(ReturnCode::CountError);
        }
        if !matches!(self.region(addr, bytes), Some(Memory::Sram(_))) {
            return self.code(ReturnCode::DstAddrNotMapped);
        }
        self.ok_with(&[]);
        if bytes > 0 {
            self.state = State::RamData {
                addr,
                remaining: bytes,
            };
        }
    }

    fn read_memory(&mut self, addr: u32, bytes: u32) {
        if addr % 4 != 0 {
            return self.code(ReturnCode::AddrError);
        }
        if bytes % 4 != 0 {
            return self.code(ReturnCode::CountError);
        }
        let Some(region) = self.region(addr, bytes) else {
            return self.code(ReturnCode::AddrNotMapped);
        };
        let data = self.slice(region, bytes).to_vec();
        self.ok_with(&[]);
        self.output.extend(data);
    }

    fn copy_ram_to_flash(&mut self, flash: u32, ram: u32, bytes: u32) {
        if !self.unlocked {
            return self.code(ReturnCode::CmdLocked);
        }
        if !CHUNK_SIZES.contains(&bytes) {
            return self.code(ReturnCode::CountError);
        }
        if flash as usize % PAGE_SIZE != 0 || (flash + bytes) as usize > self.flash.len() {
            return self.code(ReturnCode::DstAddrError);
        }
        let Some(Memory::Sram(src)) = self.region(ram, bytes).filter(|_| ram % 4 == 0) else {
            return self.code(ReturnCode::SrcAddrError);
        };
        let first = flash / SECTOR_SIZE as u32;
        let last = (flash + bytes - 1) / SECTOR_SIZE as u32;
        if !self.is_prepared(first, last) {
            return self.code(ReturnCode::SectorNotPrepared);
        }
        self.prepared = None;

        for i in 0..bytes {
            let addr = flash + i;
            if !self.stuck.contains(&addr) {
                self.flash[addr as usize] &= self.sram[src + i as usize];
            }
        }
        self.ok_with(&[]);
    }

    fn erase(&mut self, start: u32, end: u32) {
        if !self.unlocked {
            return self.code(ReturnCode::CmdLocked);
        }
        if !self.valid_sectors(start, end) {
            return self.code(ReturnCode::InvalidSector);
        }
        if !self.is_prepared(start, end) {
            return self.code(ReturnCode::SectorNotPrepared);
        }
        self.prepared = None;

        let from = start as usize * SECTOR_SIZE;
        let to = (end as usize + 1) * SECTOR_SIZE;
        self.flash[from..to].fill(0xFF);
        self.erases += 1;
        self.ok_with(&[]);
    }

    fn blank_check(&mut self, start: u32, end: u32) {
        if !self.valid_sectors(start, end) {
            return self.code(ReturnCode::InvalidSector);
        }
        let from = start as usize * SECTOR_SIZE;
        let to = (end as usize + 1) * SECTOR_SIZE;
        let first_used = (from..to).step_by(4).find_map(|addr| {
            let word = u32::from_le_bytes([
                self.flash[addr],
                self.flash[addr + 1],
                self.flash[addr + 2],
                self.flash[addr + 3],
            ]);
            (word != u32::MAX).then_some((addr as u32, word))
        });
        match first_used {
            None => self.ok_with(&[]),
            Some((offset, contents)) => {
                self.code(ReturnCode::SectorNotBlank);
                self.respond(&format!("{offset}\r\n{contents}\r\n"));
            },
        }
    }

    fn compare(&mut self, addr1: u32, addr2: u32, bytes: u32) {
        if addr1 % 4 != 0 || addr2 % 4 != 0 {
            return self.code(ReturnCode::AddrError);
        }
        if bytes % 4 != 0 {
            return self.code(ReturnCode::CountError);
        }
        let (Some(a), Some(b)) = (self.region(addr1, bytes), self.region(addr2, bytes)) else {
            return self.code(ReturnCode::AddrNotMapped);
        };
        let mismatch = self
            .slice(a, bytes)
            .chunks(4)
            .zip(self.slice(b, bytes).chunks(4))
            .position(|(x, y)| x != y);
        match mismatch {
            None => self.ok_with(&[]),
            Some(word) => {
                self.code(ReturnCode::CompareError);
                self.respond(&format!("{}\r\n", word * 4));
            },
        }
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.output.len());
        for (dst, src) in buf.iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.feed(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedDevice {
    fn clear_input(&mut self) -> Result<()> {
        self.output.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        self.output.clear();
        Ok(())
    }
}
