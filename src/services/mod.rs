//! Extraction services.
//!
//! Each service owns one slice of the mining run and talks to the mailbox
//! through the [`MailStore`](crate::providers::imap::MailStore) seam:
//!
//! - [`CarrierCounter`]: per-carrier counting and tracking-number harvest
//! - [`AmazonExtractor`]: order, arrival, exception, and hub-code mining
//! - [`ImagePipeline`]: mail-scan digest assembly and artifact naming
//! - [`run_pipeline`]: one full aggregated snapshot over all of the above

mod amazon_service;
mod carrier_service;
mod image_service;
mod snapshot_service;

pub use amazon_service::{parse_arrival_date, AmazonExtractor, DateParseError};
pub use carrier_service::CarrierCounter;
pub use image_service::{DigestOutcome, ImageError, ImagePipeline};
pub use snapshot_service::{run_pipeline, run_with_store};
