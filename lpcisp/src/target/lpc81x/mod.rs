//! NXP LPC81x UART ISP support.

pub mod client;
pub mod flasher;

#[cfg(test)]
pub(crate) mod sim;

pub use client::{BlankCheck, BootVersion, Comparison, IspClient};
pub use flasher::Lpc81xFlasher;
