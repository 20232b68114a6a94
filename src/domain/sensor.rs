//! Sensor identity and snapshot types.
//!
//! Every value the pipeline produces is keyed by a [`SensorKey`]. The keys
//! form a closed set so extractor dispatch is an exhaustive match instead of
//! string comparison, and the aggregator's evaluation order is an explicit,
//! testable constant rather than an emergent property of recursion.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string does not name a known sensor key.
#[derive(Debug, Error)]
#[error("unknown sensor key: {0}")]
pub struct UnknownSensorKey(pub String);

/// Identity of one pipeline output value.
///
/// Naming follows `<carrier>_<status>` for the parcel carriers, `amazon_*`
/// for the e-commerce extractors, `zpackages_*` for cross-carrier totals,
/// plus a handful of fixed keys for timestamps and image artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKey {
    /// Count of scanned mailpieces in today's informed-delivery digest.
    UspsMail,
    UspsDelivered,
    UspsDelivering,
    UspsPackages,
    UspsTracking,
    UpsDelivered,
    UpsDelivering,
    UpsPackages,
    UpsTracking,
    FedexDelivered,
    FedexDelivering,
    FedexPackages,
    FedexTracking,
    DhlDelivered,
    DhlDelivering,
    DhlPackages,
    DhlTracking,
    CapostDelivered,
    CapostDelivering,
    CapostPackages,
    CapostTracking,
    /// Amazon orders arriving today.
    AmazonPackages,
    /// Order numbers found in the shipped-order window.
    AmazonOrder,
    AmazonDelivered,
    AmazonException,
    AmazonExceptionOrder,
    AmazonHub,
    AmazonHubCode,
    /// Sum of every `*_delivered` value computed this run.
    ZpackagesDelivered,
    /// Sum of every `*_delivering` value computed this run.
    ZpackagesTransit,
    /// ISO-8601 timestamp of the last completed run.
    MailUpdated,
    /// Filename of today's animated mail digest.
    ImageName,
    /// Directory holding the image artifacts.
    ImagePath,
    /// Filename of today's Amazon delivery photo.
    AmazonImage,
}

impl SensorKey {
    /// Base sensors extracted directly from the mailbox, in evaluation
    /// order. Each carrier's `delivered` precedes its `delivering` because
    /// the delivering count subtracts the delivered count, and `delivering`
    /// precedes `tracking` because one extraction populates both.
    pub const BASE: &'static [SensorKey] = &[
        SensorKey::UspsMail,
        SensorKey::UspsDelivered,
        SensorKey::UspsDelivering,
        SensorKey::UspsTracking,
        SensorKey::UpsDelivered,
        SensorKey::UpsDelivering,
        SensorKey::UpsTracking,
        SensorKey::FedexDelivered,
        SensorKey::FedexDelivering,
        SensorKey::FedexTracking,
        SensorKey::DhlDelivered,
        SensorKey::DhlDelivering,
        SensorKey::DhlTracking,
        SensorKey::CapostDelivered,
        SensorKey::CapostDelivering,
        SensorKey::CapostTracking,
        SensorKey::AmazonPackages,
        SensorKey::AmazonOrder,
        SensorKey::AmazonDelivered,
        SensorKey::AmazonException,
        SensorKey::AmazonExceptionOrder,
        SensorKey::AmazonHub,
        SensorKey::AmazonHubCode,
    ];

    /// Derived sensors computed from the completed base map in a second
    /// pass. Nothing here touches the mailbox.
    pub const DERIVED: &'static [SensorKey] = &[
        SensorKey::UspsPackages,
        SensorKey::UpsPackages,
        SensorKey::FedexPackages,
        SensorKey::DhlPackages,
        SensorKey::CapostPackages,
        SensorKey::ZpackagesDelivered,
        SensorKey::ZpackagesTransit,
    ];

    /// Sensors summed into `zpackages_delivered`.
    pub const DELIVERED_KEYS: &'static [SensorKey] = &[
        SensorKey::UspsDelivered,
        SensorKey::UpsDelivered,
        SensorKey::FedexDelivered,
        SensorKey::DhlDelivered,
        SensorKey::CapostDelivered,
        SensorKey::AmazonDelivered,
    ];

    /// Sensors summed into `zpackages_transit`.
    pub const DELIVERING_KEYS: &'static [SensorKey] = &[
        SensorKey::UspsDelivering,
        SensorKey::UpsDelivering,
        SensorKey::FedexDelivering,
        SensorKey::DhlDelivering,
        SensorKey::CapostDelivering,
    ];

    /// Every key, base then derived then fixed.
    pub const ALL: &'static [SensorKey] = &[
        SensorKey::UspsMail,
        SensorKey::UspsDelivered,
        SensorKey::UspsDelivering,
        SensorKey::UspsPackages,
        SensorKey::UspsTracking,
        SensorKey::UpsDelivered,
        SensorKey::UpsDelivering,
        SensorKey::UpsPackages,
        SensorKey::UpsTracking,
        SensorKey::FedexDelivered,
        SensorKey::FedexDelivering,
        SensorKey::FedexPackages,
        SensorKey::FedexTracking,
        SensorKey::DhlDelivered,
        SensorKey::DhlDelivering,
        SensorKey::DhlPackages,
        SensorKey::DhlTracking,
        SensorKey::CapostDelivered,
        SensorKey::CapostDelivering,
        SensorKey::CapostPackages,
        SensorKey::CapostTracking,
        SensorKey::AmazonPackages,
        SensorKey::AmazonOrder,
        SensorKey::AmazonDelivered,
        SensorKey::AmazonException,
        SensorKey::AmazonExceptionOrder,
        SensorKey::AmazonHub,
        SensorKey::AmazonHubCode,
        SensorKey::ZpackagesDelivered,
        SensorKey::ZpackagesTransit,
        SensorKey::MailUpdated,
        SensorKey::ImageName,
        SensorKey::ImagePath,
        SensorKey::AmazonImage,
    ];

    /// Returns the snake_case wire name of this key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKey::UspsMail => "usps_mail",
            SensorKey::UspsDelivered => "usps_delivered",
            SensorKey::UspsDelivering => "usps_delivering",
            SensorKey::UspsPackages => "usps_packages",
            SensorKey::UspsTracking => "usps_tracking",
            SensorKey::UpsDelivered => "ups_delivered",
            SensorKey::UpsDelivering => "ups_delivering",
            SensorKey::UpsPackages => "ups_packages",
            SensorKey::UpsTracking => "ups_tracking",
            SensorKey::FedexDelivered => "fedex_delivered",
            SensorKey::FedexDelivering => "fedex_delivering",
            SensorKey::FedexPackages => "fedex_packages",
            SensorKey::FedexTracking => "fedex_tracking",
            SensorKey::DhlDelivered => "dhl_delivered",
            SensorKey::DhlDelivering => "dhl_delivering",
            SensorKey::DhlPackages => "dhl_packages",
            SensorKey::DhlTracking => "dhl_tracking",
            SensorKey::CapostDelivered => "capost_delivered",
            SensorKey::CapostDelivering => "capost_delivering",
            SensorKey::CapostPackages => "capost_packages",
            SensorKey::CapostTracking => "capost_tracking",
            SensorKey::AmazonPackages => "amazon_packages",
            SensorKey::AmazonOrder => "amazon_order",
            SensorKey::AmazonDelivered => "amazon_delivered",
            SensorKey::AmazonException => "amazon_exception",
            SensorKey::AmazonExceptionOrder => "amazon_exception_order",
            SensorKey::AmazonHub => "amazon_hub",
            SensorKey::AmazonHubCode => "amazon_hub_code",
            SensorKey::ZpackagesDelivered => "zpackages_delivered",
            SensorKey::ZpackagesTransit => "zpackages_transit",
            SensorKey::MailUpdated => "mail_updated",
            SensorKey::ImageName => "image_name",
            SensorKey::ImagePath => "image_path",
            SensorKey::AmazonImage => "amazon_image",
        }
    }

    /// Whether this key is extracted directly from the mailbox.
    pub fn is_base(self) -> bool {
        Self::BASE.contains(&self)
    }

    /// Whether this key is derived from other keys in the same run.
    pub fn is_derived(self) -> bool {
        Self::DERIVED.contains(&self)
    }

    /// For a `*_delivering` key, the `*_delivered` key subtracted from it.
    pub fn delivered_counterpart(self) -> Option<SensorKey> {
        match self {
            SensorKey::UspsDelivering => Some(SensorKey::UspsDelivered),
            SensorKey::UpsDelivering => Some(SensorKey::UpsDelivered),
            SensorKey::FedexDelivering => Some(SensorKey::FedexDelivered),
            SensorKey::DhlDelivering => Some(SensorKey::DhlDelivered),
            SensorKey::CapostDelivering => Some(SensorKey::CapostDelivered),
            _ => None,
        }
    }

    /// For a `*_delivering` key, the `*_tracking` key its extraction also
    /// populates.
    pub fn tracking_counterpart(self) -> Option<SensorKey> {
        match self {
            SensorKey::UspsDelivering => Some(SensorKey::UspsTracking),
            SensorKey::UpsDelivering => Some(SensorKey::UpsTracking),
            SensorKey::FedexDelivering => Some(SensorKey::FedexTracking),
            SensorKey::DhlDelivering => Some(SensorKey::DhlTracking),
            SensorKey::CapostDelivering => Some(SensorKey::CapostTracking),
            _ => None,
        }
    }

    /// For a `*_tracking` key, the `*_delivering` key whose rule drives it.
    pub fn delivering_counterpart(self) -> Option<SensorKey> {
        match self {
            SensorKey::UspsTracking => Some(SensorKey::UspsDelivering),
            SensorKey::UpsTracking => Some(SensorKey::UpsDelivering),
            SensorKey::FedexTracking => Some(SensorKey::FedexDelivering),
            SensorKey::DhlTracking => Some(SensorKey::DhlDelivering),
            SensorKey::CapostTracking => Some(SensorKey::CapostDelivering),
            _ => None,
        }
    }

    /// For a `*_packages` key, the `(delivering, delivered)` pair it sums.
    pub fn packages_components(self) -> Option<(SensorKey, SensorKey)> {
        match self {
            SensorKey::UspsPackages => Some((SensorKey::UspsDelivering, SensorKey::UspsDelivered)),
            SensorKey::UpsPackages => Some((SensorKey::UpsDelivering, SensorKey::UpsDelivered)),
            SensorKey::FedexPackages => {
                Some((SensorKey::FedexDelivering, SensorKey::FedexDelivered))
            }
            SensorKey::DhlPackages => Some((SensorKey::DhlDelivering, SensorKey::DhlDelivered)),
            SensorKey::CapostPackages => {
                Some((SensorKey::CapostDelivering, SensorKey::CapostDelivered))
            }
            _ => None,
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKey {
    type Err = UnknownSensorKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownSensorKey(s.to_string()))
    }
}

/// One value in the snapshot.
///
/// Serialized untagged so the snapshot is the flat mapping consumers expect:
/// counts as numbers, tracking/order/code lists as string arrays, the
/// update marker as an ISO-8601 string, artifacts as filename strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// Non-negative count.
    Count(u32),
    /// Tracking numbers, order numbers, or pickup codes.
    List(Vec<String>),
    /// Last-updated marker.
    Timestamp(DateTime<Utc>),
    /// Image artifact filename or path.
    Filename(String),
}

/// The aggregator's single output record for one run.
///
/// Insertion order is preserved, so a snapshot serializes in evaluation
/// order. The map doubles as the run's memoization table: a key already
/// present is never recomputed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    values: IndexMap<SensorKey, SensorValue>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn insert(&mut self, key: SensorKey, value: SensorValue) {
        self.values.insert(key, value);
    }

    /// Whether a value has been computed for this key.
    pub fn contains(&self, key: SensorKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Returns the value for a key, if computed.
    pub fn get(&self, key: SensorKey) -> Option<&SensorValue> {
        self.values.get(&key)
    }

    /// Returns the count for a key, if computed and a count.
    pub fn count(&self, key: SensorKey) -> Option<u32> {
        match self.values.get(&key) {
            Some(SensorValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns the list for a key, if computed and a list.
    pub fn list(&self, key: SensorKey) -> Option<&[String]> {
        match self.values.get(&key) {
            Some(SensorValue::List(items)) => Some(items),
            _ => None,
        }
    }

    /// Number of computed values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been computed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over computed values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&SensorKey, &SensorValue)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_names_roundtrip() {
        for key in SensorKey::ALL {
            let parsed: SensorKey = key.as_str().parse().unwrap();
            assert_eq!(parsed, *key);
        }
    }

    #[test]
    fn unknown_key_is_an_error() {
        let result: Result<SensorKey, _> = "usps_teleporting".parse();
        assert!(result.is_err());
    }

    #[test]
    fn serde_names_match_as_str() {
        for key in SensorKey::ALL {
            let json = serde_json::to_string(key).unwrap();
            assert_eq!(json, format!("\"{}\"", key.as_str()));
        }
    }

    #[test]
    fn delivered_precedes_delivering_in_base_order() {
        let position = |key: &SensorKey| {
            SensorKey::BASE
                .iter()
                .position(|k| k == key)
                .unwrap_or_else(|| panic!("{key} missing from base order"))
        };

        for delivering in SensorKey::DELIVERING_KEYS {
            let delivered = delivering.delivered_counterpart().unwrap();
            assert!(position(&delivered) < position(delivering));
        }
    }

    #[test]
    fn base_and_derived_are_disjoint() {
        for key in SensorKey::BASE {
            assert!(!key.is_derived(), "{key} in both base and derived");
        }
        for key in SensorKey::DERIVED {
            assert!(!key.is_base(), "{key} in both base and derived");
        }
    }

    #[test]
    fn packages_components_cover_all_parcel_carriers() {
        let packages: Vec<_> = SensorKey::DERIVED
            .iter()
            .filter(|k| k.packages_components().is_some())
            .collect();
        assert_eq!(packages.len(), 5);

        let (delivering, delivered) = SensorKey::UpsPackages.packages_components().unwrap();
        assert_eq!(delivering, SensorKey::UpsDelivering);
        assert_eq!(delivered, SensorKey::UpsDelivered);
    }

    #[test]
    fn snapshot_typed_accessors() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(SensorKey::UpsDelivered, SensorValue::Count(2));
        snapshot.insert(
            SensorKey::UpsTracking,
            SensorValue::List(vec!["1Z999AA10123456784".to_string()]),
        );

        assert_eq!(snapshot.count(SensorKey::UpsDelivered), Some(2));
        assert_eq!(
            snapshot.list(SensorKey::UpsTracking),
            Some(&["1Z999AA10123456784".to_string()][..])
        );
        assert_eq!(snapshot.count(SensorKey::UpsTracking), None);
        assert!(!snapshot.contains(SensorKey::FedexDelivered));
    }

    #[test]
    fn snapshot_serializes_flat_in_insertion_order() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(SensorKey::UspsMail, SensorValue::Count(3));
        snapshot.insert(
            SensorKey::AmazonHubCode,
            SensorValue::List(vec!["123456".to_string()]),
        );
        snapshot.insert(
            SensorKey::ImageName,
            SensorValue::Filename("mail_today.gif".to_string()),
        );

        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            r#"{"usps_mail":3,"amazon_hub_code":["123456"],"image_name":"mail_today.gif"}"#
        );
    }

    #[test]
    fn sensor_value_untagged_roundtrip() {
        let values = vec![
            SensorValue::Count(7),
            SensorValue::List(vec!["a".to_string(), "b".to_string()]),
            SensorValue::Filename("digest.gif".to_string()),
        ];

        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: SensorValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }
}
