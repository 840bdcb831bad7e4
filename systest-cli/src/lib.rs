//! # systest-cli
//!
//! The `systest` binary: loads `systest.toml`, discovers test packages,
//! runs them and reports. The modules are exposed for integration tests.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
