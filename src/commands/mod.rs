//! Command implementations for the CLI
//!
//! This module contains the implementation of all CLI commands:
//! - start: Start the inspector server
//! - check: One-shot database status check
//! - config: Configuration display and validation

pub mod check;
pub mod config;
pub mod start;
