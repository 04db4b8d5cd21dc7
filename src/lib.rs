//! Prometheus exporter for Bitbucket Cloud workspaces.

pub mod cancel;
pub mod cli;
pub mod client;
pub mod collectors;
pub mod config;
pub mod error;
pub mod exporter;
