//! Configuration and settings management.
//!
//! This module provides pipeline settings types and persistence.
//! Settings are stored as JSON and loaded once at startup.

mod settings;

pub use settings::{AmazonSettings, ImageSettings, ImapSettings, Settings, SettingsError};
