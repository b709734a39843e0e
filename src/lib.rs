#![forbid(unsafe_code)]

//! Process supervisor and streaming agent session client.
//!
//! One instance owns one working directory. It runs interactive shell
//! processes with multiplexed output, and drives the external agent CLI
//! with a single-retry fallback policy and one-invocation-at-a-time
//! coordination.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod invocation;
pub mod ipc;
pub mod process;
pub mod relaunch;
pub mod state;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
