//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the synchronization engine:
//! - Logging and tracing infrastructure
//! - Engine configuration and validation
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other engine crate depends
//! on. It fixes the configuration surface (page sizes, insert chunk sizes,
//! default exclusions, watcher and scan toggles) and the logging conventions
//! used throughout the workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{EngineConfig, EngineConfigBuilder, ScanConfig, WatchConfig};
pub use error::{Error, Result};
