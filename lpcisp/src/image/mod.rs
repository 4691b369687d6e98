//! Firmware image handling.

pub mod flash;

pub use flash::{CrpLevel, SectorPlan, StagingArea};
