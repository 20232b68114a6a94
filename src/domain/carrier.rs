//! Carrier identity registry.
//!
//! Each parcel sensor maps to one [`CarrierRule`]: the sender addresses,
//! subject templates, optional body marker, and optional tracking-number
//! pattern that drive its extraction. The registry is a plain static table
//! resolved at compile time; nothing mutates it at runtime.
//!
//! Template strings mirror the carriers' real notification mail and are
//! heuristic by nature. A carrier changing its wording degrades that
//! sensor to zero rather than breaking the run.

use super::SensorKey;

/// Extraction rule for one carrier/sensor pairing.
#[derive(Debug, Clone, Copy)]
pub struct CarrierRule {
    /// Sensor this rule feeds.
    pub sensor: SensorKey,
    /// Sender addresses, OR-combined in the search query.
    pub senders: &'static [&'static str],
    /// Subject templates, each searched in its own pass.
    pub subjects: &'static [&'static str],
    /// Marker counted across text bodies instead of counting messages.
    pub body_marker: Option<&'static str>,
    /// Tracking-number pattern; the number is capture group 1.
    pub tracking_pattern: Option<&'static str>,
    /// The capture holds a space-delimited pair; the first token is the
    /// tracking number. Only DHL formats numbers this way.
    pub split_tracking_capture: bool,
    /// Extracted tracking numbers supersede the raw message count.
    pub tracking_drives_count: bool,
}

/// Looks up the rule feeding a sensor key, if it has one.
///
/// Amazon and derived sensors have no rule; they are handled by their own
/// extractors.
pub fn rule_for(key: SensorKey) -> Option<&'static CarrierRule> {
    RULES.iter().find(|rule| rule.sensor == key)
}

static RULES: &[CarrierRule] = &[
    // USPS informed-delivery digest; feeds the mail image pipeline.
    CarrierRule {
        sensor: SensorKey::UspsMail,
        senders: &[
            "USPSInformeddelivery@email.informeddelivery.usps.com",
            "USPSInformeddelivery@informeddelivery.usps.com",
            "USPSInformedDelivery@usps.gov",
        ],
        subjects: &["Your Daily Digest"],
        body_marker: None,
        tracking_pattern: None,
        split_tracking_capture: false,
        tracking_drives_count: false,
    },
    CarrierRule {
        sensor: SensorKey::UspsDelivered,
        senders: &["auto-reply@usps.com"],
        subjects: &["Item was delivered"],
        body_marker: None,
        tracking_pattern: None,
        split_tracking_capture: false,
        tracking_drives_count: false,
    },
    CarrierRule {
        sensor: SensorKey::UspsDelivering,
        senders: &["auto-reply@usps.com"],
        subjects: &["Expected Delivery on", "Item is out for delivery"],
        body_marker: None,
        tracking_pattern: Some(r"(9[234]\d{20,24})"),
        split_tracking_capture: false,
        tracking_drives_count: true,
    },
    CarrierRule {
        sensor: SensorKey::UpsDelivered,
        senders: &["mcinfo@ups.com", "pkginfo@ups.com"],
        subjects: &["Your UPS Package was delivered", "Your packages were delivered"],
        body_marker: None,
        tracking_pattern: None,
        split_tracking_capture: false,
        tracking_drives_count: false,
    },
    CarrierRule {
        sensor: SensorKey::UpsDelivering,
        senders: &["mcinfo@ups.com", "pkginfo@ups.com"],
        subjects: &[
            "Your package is scheduled for delivery Today",
            "UPS Update: Package Scheduled for Delivery Today",
            "Your UPS Package is on its way",
        ],
        body_marker: None,
        tracking_pattern: Some(r"(1Z ?[0-9A-Z]{16})"),
        split_tracking_capture: false,
        tracking_drives_count: true,
    },
    CarrierRule {
        sensor: SensorKey::FedexDelivered,
        senders: &["TrackingUpdates@fedex.com", "fedexnotify@fedex.com"],
        subjects: &["Your package has been delivered"],
        body_marker: None,
        tracking_pattern: None,
        split_tracking_capture: false,
        tracking_drives_count: false,
    },
    CarrierRule {
        sensor: SensorKey::FedexDelivering,
        senders: &["TrackingUpdates@fedex.com", "fedexnotify@fedex.com"],
        subjects: &[
            "Delivery scheduled for today",
            "Your package is scheduled for delivery today",
            "Your package is now out for delivery",
        ],
        body_marker: None,
        tracking_pattern: Some(r"(\d{12,20})"),
        split_tracking_capture: false,
        tracking_drives_count: true,
    },
    CarrierRule {
        sensor: SensorKey::DhlDelivered,
        senders: &["NoReply.PaketDE@dhl.de", "noreply@dhl.de", "express@dhl.com"],
        subjects: &["Ihr Paket wurde zugestellt", "Your parcel has been delivered"],
        body_marker: None,
        tracking_pattern: None,
        split_tracking_capture: false,
        tracking_drives_count: false,
    },
    // DHL announces same-day delivery in the body, one line per parcel,
    // so the count comes from marker occurrences rather than messages.
    CarrierRule {
        sensor: SensorKey::DhlDelivering,
        senders: &["NoReply.PaketDE@dhl.de", "noreply@dhl.de", "express@dhl.com"],
        subjects: &["Ihr DHL Paket kommt heute", "DHL On Demand Delivery"],
        body_marker: Some("wird heute zugestellt"),
        tracking_pattern: Some(r"(\d{10,11} ?\d{0,10})"),
        split_tracking_capture: true,
        tracking_drives_count: true,
    },
    CarrierRule {
        sensor: SensorKey::CapostDelivered,
        senders: &["donotreply-nepasrepondre@canadapost.postescanada.ca"],
        subjects: &["Your item has been delivered", "Votre article a été livré"],
        body_marker: None,
        tracking_pattern: None,
        split_tracking_capture: false,
        tracking_drives_count: false,
    },
    CarrierRule {
        sensor: SensorKey::CapostDelivering,
        senders: &["donotreply-nepasrepondre@canadapost.postescanada.ca"],
        subjects: &[
            "Your item is out for delivery",
            "Votre article est en cours de livraison",
        ],
        body_marker: None,
        tracking_pattern: Some(r"(\d{16})"),
        split_tracking_capture: false,
        tracking_drives_count: true,
    },
];

/// Amazon extraction constants.
///
/// Amazon mail does not fit the per-carrier rule shape: order, delivery,
/// exception, and hub notifications each have their own sender matrix and
/// patterns, consumed directly by the Amazon extractor.
pub mod amazon {
    /// Regional storefront domains combined with the shipment sender
    /// local parts.
    pub const DOMAINS: &[&str] = &[
        "amazon.com",
        "amazon.ca",
        "amazon.co.uk",
        "amazon.de",
        "amazon.fr",
        "amazon.it",
        "amazon.es",
        "amazon.nl",
        "amazon.com.au",
        "amazon.in",
    ];

    /// Local parts of shipment-notification senders.
    pub const SHIPMENT_SENDERS: &[&str] = &["shipment-tracking", "order-update", "update"];

    /// Subject templates announcing a completed delivery.
    pub const DELIVERED_SUBJECTS: &[&str] = &[
        "Delivered: Your",
        "Geliefert: Ihre",
        "Consegnato: il tuo",
        "Livré : votre",
    ];

    /// Subject prefix of delivery-exception notices.
    pub const EXCEPTION_SUBJECT: &str = "Delivery update:";

    /// Body phrase confirming an exception notice reports a delay.
    pub const EXCEPTION_BODY: &str = "running late";

    /// Hub locker notification sender.
    pub const HUB_SENDER: &str = "thehub@amazon.com";

    /// Hub locker notification subject.
    pub const HUB_SUBJECT: &str = "is ready for pickup";

    /// Order-number pattern; the number is capture group 1.
    pub const ORDER_PATTERN: &str = r"(\d{3}-\d{7}-\d{7})";

    /// Pickup-code patterns tried in order; the code is capture group 2.
    pub const HUB_CODE_PATTERNS: &[&str] = &[
        r"(verification code is|pickup code is) (\d{6})",
        r"(Verification code|Pickup code)\D{0,40}(\d{6})",
    ];

    /// Delivery-photo URL pattern, restricted to Amazon's image host.
    pub const PHOTO_URL_PATTERN: &str =
        r"(https://[\w.-]*media-amazon\.com/[\w.,@?^=%&:/~+#-]*\.jpe?g)";

    /// Phrases introducing an arrival date in order mail.
    pub const ARRIVAL_PHRASES: &[&str] = &[
        "will arrive:",
        "estimated delivery date is:",
        "guaranteed delivery date is:",
        "Arriving:",
        "arriving:",
    ];

    /// Language tags tried in order when parsing localized arrival dates.
    pub const LOCALES: &[&str] = &["en", "de", "it", "fr", "es", "nl", "pt"];
}
