//! Command implementations.

pub(crate) mod transfer;
