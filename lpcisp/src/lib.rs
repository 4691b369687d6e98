//! # lpcisp
//!
//! A library for programming NXP LPC81x microcontrollers through the UART
//! ISP boot loader.
//!
//! This crate provides:
//!
//! - The ISP command set, with one table-driven command executor
//! - Echo-aware line transport over any `Read + Write` channel
//! - Device profiles for the LPC810, LPC811 and LPC812
//! - Sector-wise download with blank check, conditional erase, SRAM staged
//!   writes and read-back verification
//! - Flash upload (read-back to a file)
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate, with the
//!   terminal settings restored when the port is closed
//! - `serde`: `Serialize` for device and transfer reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use lpcisp::{ChipConfig, ChipFamily, SerialConfig};
//! use std::fs::File;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let serial = SerialConfig::new("/dev/ttyUSB0", 115200);
//!     let mut flasher = ChipFamily::Lpc81x.create_flasher(&serial, ChipConfig::default())?;
//!
//!     let info = flasher.connect()?;
//!     println!("{}", info.profile);
//!
//!     let mut image = File::open("firmware.bin")?;
//!     let report = flasher.download(&mut image, &mut |written| {
//!         println!("{written} bytes");
//!     })?;
//!     println!("CRP: {}", report.crp_level);
//!
//!     flasher.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled between sectors.
///
/// The checker should return `true` when the current transfer should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) static INTERRUPT_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, ErrorClass, Result},
    image::flash::{CrpLevel, SectorPlan, StagingArea},
    port::{Port, SerialConfig},
    protocol::isp::{Command, ReturnCode},
    target::{
        ChipConfig, ChipFamily, DeviceInfo, DeviceProfile, Flasher, TransferReport,
        lpc81x::{BlankCheck, BootVersion, Comparison, IspClient, Lpc81xFlasher},
    },
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::PoisonError;

    #[test]
    fn test_interrupt_checker_default_false() {
        let _guard = INTERRUPT_TEST_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        let _guard = INTERRUPT_TEST_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
