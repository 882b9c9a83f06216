//! HTTP handlers: thin wrappers over the database service

pub mod errors;
pub mod logs;
pub mod metrics_handler;
pub mod status;
