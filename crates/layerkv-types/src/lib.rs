//! # layerkv-types
//!
//! Shared configuration and error types for the layerkv workspace.
//!
//! - [`Settings`]: open-time configuration (data directory, TTL, length
//!   bounds, sweep cadence, engine tuning)
//! - [`SettingsError`]: failures while loading or validating settings
//!
//! ## Usage
//!
//! ```rust
//! use layerkv_types::Settings;
//!
//! let settings = Settings::default();
//! assert!(settings.validate().is_ok());
//! ```

pub mod config;
pub mod error;

pub use config::{Compression, EngineSettings, Settings, KB, MB};
pub use error::SettingsError;
