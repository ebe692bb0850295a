//! Library surface of the Warden CLI: subcommand implementations and the
//! synchronous solc compiler driver.

pub mod commands;
pub mod solc;
