//! postwatch - IMAP mail and package notification mining
//!
//! This crate watches one mailbox for carrier and storefront notification
//! mail, derives per-sensor counts, tracking numbers, and order numbers,
//! renders the day's mail-scan digest, and aggregates everything into one
//! flat snapshot per run.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;

pub use domain::{SensorKey, SensorValue, Snapshot};
pub use services::run_pipeline;
