//! CLI module for the showroom backend
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use config::BackendArgs;
pub use main_impl::{main, Cli, Command};
