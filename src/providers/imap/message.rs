//! MIME message parsing.
//!
//! Thin wrapper over `mail-parser` exposing exactly what the extractors
//! need: the decoded subject, the text of every text/plain and text/html
//! leaf part, and attachment payloads. Records borrow the fetched bytes
//! and live only for one extraction call.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

/// A parsed MIME message.
pub struct MessageRecord<'a> {
    message: Message<'a>,
}

/// One attachment: the declared filename (if any) and the decoded payload.
pub struct MailAttachment<'a> {
    /// Filename from the part headers.
    pub filename: Option<&'a str>,
    /// Transfer-decoded payload bytes.
    pub bytes: &'a [u8],
}

impl<'a> MessageRecord<'a> {
    /// Parses raw RFC 5322 bytes. Returns `None` for malformed input;
    /// callers skip that message and continue.
    pub fn parse(raw: &'a [u8]) -> Option<Self> {
        MessageParser::default()
            .parse(raw)
            .map(|message| Self { message })
    }

    /// The decoded subject. Encoded-words are decoded charset-aware;
    /// undecodable headers fall back to the raw value.
    pub fn subject(&self) -> Option<&str> {
        self.message.subject()
    }

    /// Text of every text/plain and text/html leaf part, in MIME order.
    pub fn body_parts(&self) -> Vec<&str> {
        self.message
            .parts
            .iter()
            .filter_map(|part| match &part.body {
                PartType::Text(text) => Some(text.as_ref()),
                PartType::Html(html) => Some(html.as_ref()),
                _ => None,
            })
            .collect()
    }

    /// Whether any text part contains `marker`.
    pub fn contains(&self, marker: &str) -> bool {
        self.body_parts().iter().any(|body| body.contains(marker))
    }

    /// Total occurrences of `marker` across all text parts.
    pub fn occurrences(&self, marker: &str) -> u32 {
        self.body_parts()
            .iter()
            .map(|body| body.matches(marker).count() as u32)
            .sum()
    }

    /// Attachment parts with their decoded payloads. Nested messages are
    /// skipped; everything else with an attachment disposition is yielded.
    pub fn attachments(&self) -> Vec<MailAttachment<'_>> {
        self.message
            .attachments()
            .filter(|part| !matches!(part.body, PartType::Message(_)))
            .map(|part| MailAttachment {
                filename: part.attachment_name(),
                bytes: part.contents(),
            })
            .collect()
    }
}
