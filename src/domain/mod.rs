//! Domain layer types for the mail mining pipeline.
//!
//! This module contains the core types the pipeline produces and consumes:
//! sensor keys and snapshots, the static carrier rule registry, and
//! per-sensor extraction results.

mod carrier;
mod extraction;
mod sensor;

pub use carrier::{amazon, rule_for, CarrierRule};
pub use extraction::ExtractionResult;
pub use sensor::{SensorKey, SensorValue, Snapshot, UnknownSensorKey};
