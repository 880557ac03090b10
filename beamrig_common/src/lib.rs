//! Beamrig Common Library
//!
//! This crate provides shared configuration loading, the clock abstraction
//! and the device contracts used by all beamrig workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and the rig configuration
//! - [`consts`] - Protocol and timing defaults
//! - [`clock`] - Injectable time source (system or manual)
//! - [`device`] - Device capability trait and its error type
//! - [`watchdog`] - Supervision vocabulary (device kinds, health, errors)
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust,no_run
//! use beamrig_common::config::{ConfigLoader, RigConfig};
//! use std::path::Path;
//!
//! let config = RigConfig::load(Path::new("rig.toml")).expect("config");
//! println!("controller at {}:{}", config.controller.host, config.controller.port);
//! ```

pub mod clock;
pub mod config;
pub mod consts;
pub mod device;
pub mod prelude;
pub mod watchdog;
