//! Target chip support.

pub mod chip;
pub mod lpc81x;

pub use chip::{
    ChipConfig, ChipFamily, DEVICE_PROFILES, DeviceInfo, DeviceProfile, Flasher, TransferReport,
};
