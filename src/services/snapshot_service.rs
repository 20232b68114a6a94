use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, Utc};
use indexmap::IndexSet;
use tracing::{error, info, warn};

use crate::config::{ImageSettings, Settings};
use crate::domain::{rule_for, SensorKey, SensorValue, Snapshot};
use crate::providers::imap::{ImapStore, MailStore};
use crate::services::amazon_service::AmazonExtractor;
use crate::services::carrier_service::CarrierCounter;
use crate::services::image_service::ImagePipeline;

/// Runs one full mining pass against the configured mailbox.
///
/// Connection, login, or folder failures degrade to an empty snapshot with
/// an error log; the periodic caller simply tries again next cycle.
pub async fn run_pipeline(settings: &Settings) -> Snapshot {
    let today = Local::now().date_naive();
    let mut store = match ImapStore::connect(&settings.imap).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "mailbox connection failed");
            return Snapshot::new();
        }
    };
    let snapshot = run_with_store(settings, &mut store, today).await;
    store.logout().await;
    snapshot
}

/// Aggregates every enabled sensor over an already-connected store.
///
/// Two passes: base keys are extracted in [`SensorKey::BASE`] order (each
/// carrier's `delivered` before its `delivering`, since the delivering
/// count subtracts the delivered one), then derived keys are computed from
/// the completed base values. Extractors that feed several keys store all
/// of them at once; a key already present short-circuits, so no mailbox
/// search runs twice in one pass.
pub async fn run_with_store<S: MailStore>(
    settings: &Settings,
    store: &mut S,
    today: NaiveDate,
) -> Snapshot {
    let enabled = enabled_keys(&settings.sensors);
    let required = expand_required(&enabled);
    let pipeline = ImagePipeline::new(settings.image.clone());
    let forwards = &settings.amazon.forward_addresses;
    let days = settings.amazon.days;
    let mut snapshot = Snapshot::new();

    for &key in SensorKey::BASE {
        if !required.contains(&key) || snapshot.contains(key) {
            continue;
        }
        match key {
            SensorKey::UspsMail => {
                run_digest(&pipeline, store, today, &settings.image, &mut snapshot).await;
            }
            SensorKey::UspsDelivered
            | SensorKey::UpsDelivered
            | SensorKey::FedexDelivered
            | SensorKey::DhlDelivered
            | SensorKey::CapostDelivered => {
                let count = carrier_count(store, today, key).await;
                snapshot.insert(key, SensorValue::Count(count));
            }
            SensorKey::UspsDelivering
            | SensorKey::UpsDelivering
            | SensorKey::FedexDelivering
            | SensorKey::DhlDelivering
            | SensorKey::CapostDelivering => {
                run_delivering(store, today, key, &mut snapshot).await;
            }
            SensorKey::UspsTracking
            | SensorKey::UpsTracking
            | SensorKey::FedexTracking
            | SensorKey::DhlTracking
            | SensorKey::CapostTracking => {
                // Filled by the delivering extraction; an empty list stands
                // in if that never stored one.
                snapshot.insert(key, SensorValue::List(Vec::new()));
            }
            SensorKey::AmazonPackages | SensorKey::AmazonOrder => {
                let result = AmazonExtractor::new(store, today).shipped(days, forwards).await;
                snapshot.insert(SensorKey::AmazonPackages, SensorValue::Count(result.count));
                snapshot.insert(SensorKey::AmazonOrder, SensorValue::List(result.order_list()));
            }
            SensorKey::AmazonDelivered => {
                let photo_target = amazon_photo_target(&pipeline, today, &mut snapshot);
                let count = AmazonExtractor::new(store, today)
                    .delivered(forwards, photo_target)
                    .await;
                snapshot.insert(key, SensorValue::Count(count));
            }
            SensorKey::AmazonException | SensorKey::AmazonExceptionOrder => {
                let result = AmazonExtractor::new(store, today).exception(days, forwards).await;
                snapshot.insert(SensorKey::AmazonException, SensorValue::Count(result.count));
                snapshot.insert(
                    SensorKey::AmazonExceptionOrder,
                    SensorValue::List(result.order_list()),
                );
            }
            SensorKey::AmazonHub | SensorKey::AmazonHubCode => {
                let codes = AmazonExtractor::new(store, today).hub(forwards).await;
                snapshot.insert(SensorKey::AmazonHub, SensorValue::Count(codes.len() as u32));
                snapshot.insert(SensorKey::AmazonHubCode, SensorValue::List(codes));
            }
            // Derived and fixed keys are never extracted in the base pass.
            SensorKey::UspsPackages
            | SensorKey::UpsPackages
            | SensorKey::FedexPackages
            | SensorKey::DhlPackages
            | SensorKey::CapostPackages
            | SensorKey::ZpackagesDelivered
            | SensorKey::ZpackagesTransit
            | SensorKey::MailUpdated
            | SensorKey::ImageName
            | SensorKey::ImagePath
            | SensorKey::AmazonImage => {}
        }
    }

    for &key in SensorKey::DERIVED {
        if !enabled.contains(&key) || snapshot.contains(key) {
            continue;
        }
        if let Some((delivering, delivered)) = key.packages_components() {
            let total =
                snapshot.count(delivering).unwrap_or(0) + snapshot.count(delivered).unwrap_or(0);
            snapshot.insert(key, SensorValue::Count(total));
        } else if key == SensorKey::ZpackagesDelivered {
            let total = total_over(&snapshot, &enabled, SensorKey::DELIVERED_KEYS);
            snapshot.insert(key, SensorValue::Count(total));
        } else if key == SensorKey::ZpackagesTransit {
            let total = total_over(&snapshot, &enabled, SensorKey::DELIVERING_KEYS);
            snapshot.insert(key, SensorValue::Count(total));
        }
    }

    snapshot.insert(SensorKey::MailUpdated, SensorValue::Timestamp(Utc::now()));
    if !snapshot.contains(SensorKey::ImageName) {
        match pipeline.ensure_artifact(false, today) {
            Ok(name) => snapshot.insert(SensorKey::ImageName, SensorValue::Filename(name)),
            Err(e) => warn!(error = %e, "mail artifact could not be resolved"),
        }
    }
    if !snapshot.contains(SensorKey::ImagePath) {
        snapshot.insert(
            SensorKey::ImagePath,
            SensorValue::Filename(settings.image.output_dir.display().to_string()),
        );
    }
    if !snapshot.contains(SensorKey::AmazonImage) {
        match pipeline.ensure_artifact(true, today) {
            Ok(name) => snapshot.insert(SensorKey::AmazonImage, SensorValue::Filename(name)),
            Err(e) => warn!(error = %e, "amazon artifact could not be resolved"),
        }
    }

    info!(sensors = snapshot.len(), "pipeline run complete");
    snapshot
}

/// The configured sensor list; empty means everything.
fn enabled_keys(configured: &[SensorKey]) -> IndexSet<SensorKey> {
    if configured.is_empty() {
        SensorKey::ALL.iter().copied().collect()
    } else {
        configured.iter().copied().collect()
    }
}

/// Closes the enabled set over extraction dependencies: a packages key
/// needs both of its components, a delivering count needs the delivered
/// count it subtracts, and a tracking list needs its delivering extraction.
fn expand_required(enabled: &IndexSet<SensorKey>) -> IndexSet<SensorKey> {
    let mut required = IndexSet::new();
    let mut queue: Vec<SensorKey> = enabled.iter().copied().collect();
    while let Some(key) = queue.pop() {
        if !required.insert(key) {
            continue;
        }
        if let Some((delivering, delivered)) = key.packages_components() {
            queue.push(delivering);
            queue.push(delivered);
        }
        if let Some(delivered) = key.delivered_counterpart() {
            queue.push(delivered);
        }
        if let Some(delivering) = key.delivering_counterpart() {
            queue.push(delivering);
        }
    }
    required
}

fn total_over(snapshot: &Snapshot, enabled: &IndexSet<SensorKey>, keys: &[SensorKey]) -> u32 {
    keys.iter()
        .filter(|key| enabled.contains(*key))
        .filter_map(|&key| snapshot.count(key))
        .sum()
}

async fn carrier_count<S: MailStore>(store: &mut S, today: NaiveDate, key: SensorKey) -> u32 {
    let Some(rule) = rule_for(key) else {
        warn!(sensor = %key, "no carrier rule registered");
        return 0;
    };
    CarrierCounter::new(store, today).extract(rule).await.count
}

async fn run_delivering<S: MailStore>(
    store: &mut S,
    today: NaiveDate,
    key: SensorKey,
    snapshot: &mut Snapshot,
) {
    let Some(rule) = rule_for(key) else {
        warn!(sensor = %key, "no carrier rule registered");
        snapshot.insert(key, SensorValue::Count(0));
        return;
    };
    let result = CarrierCounter::new(store, today).extract(rule).await;
    let delivered = key
        .delivered_counterpart()
        .and_then(|k| snapshot.count(k))
        .unwrap_or(0);
    let delivering = result.count.saturating_sub(delivered);
    if let Some(tracking_key) = key.tracking_counterpart() {
        snapshot.insert(tracking_key, SensorValue::List(result.tracking_list()));
    }
    snapshot.insert(key, SensorValue::Count(delivering));
}

async fn run_digest<S: MailStore>(
    pipeline: &ImagePipeline,
    store: &mut S,
    today: NaiveDate,
    image: &ImageSettings,
    snapshot: &mut Snapshot,
) {
    match pipeline.generate_digest(store, today).await {
        Ok(outcome) => {
            if image.generate_video {
                if let Err(e) = pipeline.transcode_video(&outcome.name).await {
                    warn!(error = %e, "video transcode skipped");
                }
            }
            let clip = Path::new(&outcome.name).with_extension("mp4");
            let mut names = vec![outcome.name.as_str()];
            if let Some(clip_name) = clip.to_str() {
                names.push(clip_name);
            }
            if let Err(e) = pipeline.mirror_to_public(&names) {
                warn!(error = %e, "artifact mirror failed");
            }
            snapshot.insert(SensorKey::UspsMail, SensorValue::Count(outcome.count));
            snapshot.insert(SensorKey::ImageName, SensorValue::Filename(outcome.name));
        }
        Err(e) => {
            warn!(error = %e, "mail digest failed");
            snapshot.insert(SensorKey::UspsMail, SensorValue::Count(0));
        }
    }
}

/// Resolves the amazon artifact slot and records its name, handing the
/// target path to the photo download.
fn amazon_photo_target(
    pipeline: &ImagePipeline,
    today: NaiveDate,
    snapshot: &mut Snapshot,
) -> Option<PathBuf> {
    match pipeline.ensure_artifact(true, today) {
        Ok(name) => {
            let target = pipeline.artifact_dir(true).join(&name);
            snapshot.insert(SensorKey::AmazonImage, SensorValue::Filename(name));
            Some(target)
        }
        Err(e) => {
            warn!(error = %e, "amazon artifact could not be resolved");
            None
        }
    }
}
