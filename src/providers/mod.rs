//! External service integrations.
//!
//! - [`imap`] - Mailbox access (session, search queries, MIME parsing)

pub mod imap;
