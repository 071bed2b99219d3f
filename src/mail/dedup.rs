use sha2::{Digest, Sha256};
use std::collections::HashSet;

use super::types::{Attachment, AttachmentBody, ResolvedMessage};

/// Content identity of a message lacking a shared stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub timestamp_ms: i64,
    pub body: String,
    pub attachments: String,
}

impl Fingerprint {
    pub fn of(msg: &ResolvedMessage) -> Self {
        Self {
            timestamp_ms: msg.record.timestamp_ms,
            body: msg.record.body.clone(),
            attachments: attachment_digest(&msg.record.attachments),
        }
    }
}

/// Ordered SHA-256 over filename, content type and content of every attachment.
/// Each field is prefixed with its length so bytes can't shift between fields.
pub fn attachment_digest(attachments: &[Attachment]) -> String {
    fn field(hasher: &mut Sha256, bytes: &[u8]) {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }

    let mut hasher = Sha256::new();
    for att in attachments {
        field(&mut hasher, att.filename.as_bytes());
        field(&mut hasher, att.content_type.as_bytes());
        match &att.body {
            AttachmentBody::Bytes(data) => field(&mut hasher, data),
            AttachmentBody::Digest(digest) => field(&mut hasher, digest.as_bytes()),
        }
    }
    hex::encode(hasher.finalize())
}

/// Drop messages whose stable id was already seen. Returns survivors and the
/// number dropped.
pub fn dedupe_by_id(messages: Vec<ResolvedMessage>) -> (Vec<ResolvedMessage>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let before = messages.len();
    let kept: Vec<ResolvedMessage> = messages
        .into_iter()
        .filter(|m| match m.message_id() {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Drop messages whose (timestamp, body, attachment digest) was already seen.
pub fn dedupe_by_fingerprint(messages: Vec<ResolvedMessage>) -> (Vec<ResolvedMessage>, usize) {
    let mut seen: HashSet<Fingerprint> = HashSet::new();
    let before = messages.len();
    let kept: Vec<ResolvedMessage> = messages
        .into_iter()
        .filter(|m| seen.insert(Fingerprint::of(m)))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Identity pass then fingerprint pass. Every dropped message is counted.
pub fn dedupe_messages(messages: Vec<ResolvedMessage>) -> (Vec<ResolvedMessage>, usize) {
    let (messages, by_id) = dedupe_by_id(messages);
    let (messages, by_fingerprint) = dedupe_by_fingerprint(messages);
    (messages, by_id + by_fingerprint)
}
