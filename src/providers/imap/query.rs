//! IMAP search query construction.
//!
//! Queries combine one or more sender addresses, a date floor, and an
//! optional subject clause. Multiple senders are OR-combined with a
//! parenthesized prefix, which the major IMAP servers all accept.

use chrono::NaiveDate;

/// One IMAP `UID SEARCH` criteria string plus the charset variant needed
/// to issue it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// The subject contains non-ASCII text, so the search must be issued
    /// with an explicit `CHARSET UTF-8`.
    pub utf8: bool,
    /// The criteria string, without the `UID SEARCH` prefix.
    pub criteria: String,
}

impl SearchQuery {
    /// Builds a search for mail from any of `senders`, received on or
    /// after `since`, optionally with `subject` in the subject line.
    ///
    /// The date floor is inclusive; same-day sensors pass today.
    pub fn build(senders: &[impl AsRef<str>], since: NaiveDate, subject: Option<&str>) -> Self {
        let from_clause = senders
            .iter()
            .map(|sender| format!("FROM \"{}\"", sender.as_ref()))
            .collect::<Vec<_>>()
            .join(" ");

        let date = since.format("%d-%b-%Y");
        let mut criteria = match subject {
            Some(subject) => format!("{from_clause} SUBJECT \"{subject}\" SINCE {date}"),
            None => format!("{from_clause} SINCE {date}"),
        };

        // One OR prefix token per extra sender.
        if senders.len() > 1 {
            let prefix = vec!["OR"; senders.len() - 1].join(" ");
            criteria = format!("({prefix}) {criteria}");
        }

        let utf8 = subject.is_some_and(|s| !s.is_ascii());
        Self { utf8, criteria }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()
    }

    #[test]
    fn single_sender_with_subject() {
        let query = SearchQuery::build(
            &["auto-reply@usps.com"],
            day(),
            Some("Expected Delivery on"),
        );
        assert!(!query.utf8);
        assert_eq!(
            query.criteria,
            r#"FROM "auto-reply@usps.com" SUBJECT "Expected Delivery on" SINCE 25-Aug-2026"#
        );
    }

    #[test]
    fn single_sender_without_subject() {
        let query = SearchQuery::build(&["thehub@amazon.com"], day(), None);
        assert_eq!(
            query.criteria,
            r#"FROM "thehub@amazon.com" SINCE 25-Aug-2026"#
        );
    }

    #[test]
    fn multiple_senders_get_one_or_per_extra_sender() {
        let senders = ["mcinfo@ups.com", "pkginfo@ups.com", "other@ups.com"];
        let query = SearchQuery::build(&senders, day(), Some("delivered"));

        let or_count = query.criteria.matches("OR").count();
        assert_eq!(or_count, senders.len() - 1);
        assert_eq!(
            query.criteria,
            r#"(OR OR) FROM "mcinfo@ups.com" FROM "pkginfo@ups.com" FROM "other@ups.com" SUBJECT "delivered" SINCE 25-Aug-2026"#
        );
    }

    #[test]
    fn two_senders_get_single_or() {
        let query = SearchQuery::build(&["mcinfo@ups.com", "pkginfo@ups.com"], day(), None);
        assert_eq!(
            query.criteria,
            r#"(OR) FROM "mcinfo@ups.com" FROM "pkginfo@ups.com" SINCE 25-Aug-2026"#
        );
    }

    #[test]
    fn non_ascii_subject_selects_utf8_form() {
        let query = SearchQuery::build(
            &["donotreply-nepasrepondre@canadapost.postescanada.ca"],
            day(),
            Some("Votre article a été livré"),
        );
        assert!(query.utf8);
        assert!(query.criteria.contains("Votre article a été livré"));
    }

    #[test]
    fn owned_sender_strings_work() {
        let senders = vec!["shipment-tracking@amazon.com".to_string()];
        let query = SearchQuery::build(&senders, day(), None);
        assert!(query.criteria.starts_with(r#"FROM "shipment-tracking@amazon.com""#));
    }
}
