//! IMAP provider: session management, query construction, MIME parsing.
//!
//! The [`MailStore`] trait is the seam between the extractors and the
//! network; [`ImapStore`] implements it for real servers and tests
//! implement it over an in-memory mailbox.

mod message;
mod query;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use message::{MailAttachment, MessageRecord};
pub use query::SearchQuery;
pub use session::{ImapStore, MailStore, SessionError};
