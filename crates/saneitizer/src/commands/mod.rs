//! Command implementations for the saneitize CLI.

pub mod check;
pub mod chunks;
