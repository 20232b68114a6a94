//! Extraction results.
//!
//! One [`ExtractionResult`] accumulates everything a sensor's searches
//! produce: a raw count plus deduplicated tracking and order numbers.

use indexmap::IndexSet;

/// Accumulated output of one sensor's extraction.
///
/// Tracking and order numbers keep first-seen order and are deduplicated
/// across messages and across the multiple subject-template passes a
/// sensor may run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Raw count before any tracking override.
    pub count: u32,
    tracking: IndexSet<String>,
    orders: IndexSet<String>,
}

impl ExtractionResult {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tracking number. Returns false if it was already seen.
    pub fn push_tracking(&mut self, number: impl Into<String>) -> bool {
        self.tracking.insert(number.into())
    }

    /// Records an order number. Returns false if it was already seen.
    pub fn push_order(&mut self, number: impl Into<String>) -> bool {
        self.orders.insert(number.into())
    }

    /// Whether any tracking numbers were extracted.
    pub fn has_tracking(&self) -> bool {
        !self.tracking.is_empty()
    }

    /// Tracking numbers in first-seen order.
    pub fn tracking(&self) -> &IndexSet<String> {
        &self.tracking
    }

    /// Order numbers in first-seen order.
    pub fn orders(&self) -> &IndexSet<String> {
        &self.orders
    }

    /// Tracking numbers as an owned list, for the snapshot.
    pub fn tracking_list(&self) -> Vec<String> {
        self.tracking.iter().cloned().collect()
    }

    /// Order numbers as an owned list, for the snapshot.
    pub fn order_list(&self) -> Vec<String> {
        self.orders.iter().cloned().collect()
    }

    /// Replaces the raw count with the tracking count when at least one
    /// number was extracted. Callers gate this on the rule's
    /// `tracking_drives_count` capability.
    pub fn override_count_from_tracking(&mut self) {
        if !self.tracking.is_empty() {
            self.count = self.tracking.len() as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tracking_dedups_in_first_seen_order() {
        let mut result = ExtractionResult::new();
        assert!(result.push_tracking("1Z999AA10123456784"));
        assert!(result.push_tracking("688888888888"));
        assert!(!result.push_tracking("1Z999AA10123456784"));

        assert_eq!(
            result.tracking_list(),
            vec!["1Z999AA10123456784".to_string(), "688888888888".to_string()]
        );
    }

    #[test]
    fn override_supersedes_raw_count() {
        let mut result = ExtractionResult::new();
        result.count = 5;
        result.push_tracking("9400111899223818218218");
        result.push_tracking("9400111899223818218219");
        result.override_count_from_tracking();
        assert_eq!(result.count, 2);
    }

    #[test]
    fn override_is_a_no_op_without_tracking() {
        let mut result = ExtractionResult::new();
        result.count = 3;
        result.override_count_from_tracking();
        assert_eq!(result.count, 3);
    }

    #[test]
    fn empty_result_is_zeroed() {
        let result = ExtractionResult::new();
        assert_eq!(result.count, 0);
        assert!(!result.has_tracking());
        assert!(result.order_list().is_empty());
    }
}
