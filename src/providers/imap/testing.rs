//! In-memory mailbox for unit tests.
//!
//! Implements [`MailStore`] over a vector of canned messages and records
//! every query it receives, so extractor tests can assert both results
//! and search behavior without a server.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::{MailStore, SearchQuery, SessionError};

/// One canned message in the fake mailbox.
#[derive(Debug, Clone)]
pub(crate) struct FakeMessage {
    pub uid: u32,
    pub sender: String,
    pub subject: String,
    pub raw: Vec<u8>,
}

impl FakeMessage {
    /// A single-part text/plain message.
    pub fn plain(uid: u32, sender: &str, subject: &str, body: &str) -> Self {
        let raw = format!(
            "From: {sender}\r\n\
             To: user@example.com\r\n\
             Subject: {subject}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             {body}\r\n"
        )
        .into_bytes();
        Self {
            uid,
            sender: sender.to_string(),
            subject: subject.to_string(),
            raw,
        }
    }

    /// A multipart/mixed message with a text body and binary attachments.
    pub fn with_attachments(
        uid: u32,
        sender: &str,
        subject: &str,
        body: &str,
        attachments: &[(&str, &[u8])],
    ) -> Self {
        let mut raw = format!(
            "From: {sender}\r\n\
             To: user@example.com\r\n\
             Subject: {subject}\r\n\
             Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
             \r\n\
             --sep\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             {body}\r\n"
        );
        for (filename, bytes) in attachments {
            raw.push_str(&format!(
                "--sep\r\n\
                 Content-Type: image/jpeg; name=\"{filename}\"\r\n\
                 Content-Disposition: attachment; filename=\"{filename}\"\r\n\
                 Content-Transfer-Encoding: base64\r\n\
                 \r\n\
                 {}\r\n",
                BASE64.encode(bytes)
            ));
        }
        raw.push_str("--sep--\r\n");
        Self {
            uid,
            sender: sender.to_string(),
            subject: subject.to_string(),
            raw: raw.into_bytes(),
        }
    }
}

/// In-memory [`MailStore`].
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    pub messages: Vec<FakeMessage>,
    /// Every query received, in order.
    pub queries: Vec<SearchQuery>,
    /// When set, every search fails with [`SessionError::Search`].
    pub fail_search: bool,
}

impl FakeStore {
    pub fn new(messages: Vec<FakeMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Extracts the quoted values following each occurrence of `keyword`.
    fn quoted_values(criteria: &str, keyword: &str) -> Vec<String> {
        let marker = format!("{keyword} \"");
        criteria
            .split(&marker)
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .map(|s| s.to_string())
            .collect()
    }

    fn matches(criteria: &str, message: &FakeMessage) -> bool {
        let senders = Self::quoted_values(criteria, "FROM");
        let subjects = Self::quoted_values(criteria, "SUBJECT");

        // IMAP FROM and SUBJECT are substring matches.
        let sender = message.sender.to_ascii_lowercase();
        let sender_ok = senders
            .iter()
            .any(|s| sender.contains(&s.to_ascii_lowercase()));
        let subject_ok = subjects.iter().all(|s| message.subject.contains(s));
        sender_ok && subject_ok
    }
}

#[async_trait]
impl MailStore for FakeStore {
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<u32>, SessionError> {
        self.queries.push(query.clone());
        if self.fail_search {
            return Err(SessionError::Search("injected failure".to_string()));
        }
        let mut uids: Vec<u32> = self
            .messages
            .iter()
            .filter(|m| Self::matches(&query.criteria, m))
            .map(|m| m.uid)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, SessionError> {
        self.messages
            .iter()
            .find(|m| m.uid == uid)
            .map(|m| m.raw.clone())
            .ok_or_else(|| SessionError::Fetch(format!("no message with uid {uid}")))
    }
}
