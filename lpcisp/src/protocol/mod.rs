//! Protocol implementations.

pub mod isp;
pub mod line;

// Re-export common types
pub use isp::{Command, DataPhase, ReturnCode};
pub use line::LineTransport;
