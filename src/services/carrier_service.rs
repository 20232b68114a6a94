//! Carrier count and tracking-number extraction.
//!
//! Drives one [`CarrierRule`] against the mailbox: search per subject
//! template, then count messages, count body markers, or harvest tracking
//! numbers as the rule dictates. All faults are absorbed here; the worst
//! outcome of a broken search is a zero count for that sensor.

use chrono::NaiveDate;
use regex::Regex;

use crate::domain::{CarrierRule, ExtractionResult};
use crate::providers::imap::{MailStore, MessageRecord, SearchQuery};

/// Extracts counts and tracking numbers for carrier rules.
pub struct CarrierCounter<'a, S: MailStore> {
    store: &'a mut S,
    today: NaiveDate,
}

impl<'a, S: MailStore> CarrierCounter<'a, S> {
    /// Creates a counter over the given store for one run's date.
    pub fn new(store: &'a mut S, today: NaiveDate) -> Self {
        Self { store, today }
    }

    /// Runs the rule's searches and returns the accumulated result.
    ///
    /// Each subject template is its own search pass; a failed pass
    /// contributes zero while the remaining passes still run. Tracking
    /// numbers are deduplicated across messages and across passes, and
    /// supersede the raw count when the rule is tracking-capable.
    pub async fn extract(&mut self, rule: &CarrierRule) -> ExtractionResult {
        let mut result = ExtractionResult::new();

        let tracking_regex = rule.tracking_pattern.and_then(|pattern| {
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(sensor = %rule.sensor, error = %e, "invalid tracking pattern");
                    None
                }
            }
        });

        for &subject in rule.subjects {
            let query = SearchQuery::build(rule.senders, self.today, Some(subject));
            let uids = match self.store.search(&query).await {
                Ok(uids) => uids,
                Err(e) => {
                    tracing::warn!(sensor = %rule.sensor, subject, error = %e, "search failed");
                    continue;
                }
            };

            if uids.is_empty() {
                continue;
            }

            match (rule.body_marker, &tracking_regex) {
                // Plain message count; no fetch needed.
                (None, None) => result.count += uids.len() as u32,
                // Marker occurrences replace the message count.
                (Some(marker), regex) => {
                    for uid in uids {
                        let Some(raw) = self.fetch_record(rule, uid).await else {
                            continue;
                        };
                        let record = match MessageRecord::parse(&raw) {
                            Some(record) => record,
                            None => {
                                tracing::debug!(sensor = %rule.sensor, uid, "unparseable message skipped");
                                continue;
                            }
                        };
                        result.count += record.occurrences(marker);
                        if let Some(regex) = regex {
                            harvest_tracking(&record, regex, rule.split_tracking_capture, &mut result);
                        }
                    }
                }
                // Raw message count plus tracking harvest.
                (None, Some(regex)) => {
                    result.count += uids.len() as u32;
                    for uid in uids {
                        if let Some(raw) = self.fetch_record(rule, uid).await {
                            match MessageRecord::parse(&raw) {
                                Some(record) => harvest_tracking(
                                    &record,
                                    regex,
                                    rule.split_tracking_capture,
                                    &mut result,
                                ),
                                None => {
                                    tracing::debug!(sensor = %rule.sensor, uid, "unparseable message skipped");
                                }
                            }
                        }
                    }
                }
            }
        }

        if rule.tracking_drives_count {
            result.override_count_from_tracking();
        }

        tracing::debug!(
            sensor = %rule.sensor,
            count = result.count,
            tracking = result.tracking().len(),
            "carrier extraction complete"
        );
        result
    }

    async fn fetch_record(&mut self, rule: &CarrierRule, uid: u32) -> Option<Vec<u8>> {
        match self.store.fetch(uid).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::debug!(sensor = %rule.sensor, uid, error = %e, "fetch failed; message skipped");
                None
            }
        }
    }
}

/// Harvests tracking numbers from one message.
///
/// The subject is scanned first; any subject match short-circuits the body
/// scan so a number appearing in both is never double-counted. The number
/// is capture group 1. A split-capture rule keeps only the first
/// whitespace token of each capture.
fn harvest_tracking(
    record: &MessageRecord<'_>,
    regex: &Regex,
    split_capture: bool,
    result: &mut ExtractionResult,
) {
    let mut found_in_subject = false;
    if let Some(subject) = record.subject() {
        for caps in regex.captures_iter(subject) {
            if let Some(capture) = caps.get(1) {
                push_capture(capture.as_str(), split_capture, result);
                found_in_subject = true;
            }
        }
    }
    if found_in_subject {
        return;
    }

    for body in record.body_parts() {
        for caps in regex.captures_iter(body) {
            if let Some(capture) = caps.get(1) {
                push_capture(capture.as_str(), split_capture, result);
            }
        }
    }
}

fn push_capture(capture: &str, split_capture: bool, result: &mut ExtractionResult) {
    let number = if split_capture {
        capture.split_whitespace().next().unwrap_or(capture)
    } else {
        capture
    };
    result.push_tracking(number.trim());
}
