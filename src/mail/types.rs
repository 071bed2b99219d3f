use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction hint carried by the export itself (`X-smssync-type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeHint {
    Inbound,
    Outbound,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Attachment payload. Bytes are passed through untouched; a digest may be
/// supplied instead when the producer doesn't want to hold the content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentBody {
    Bytes(Vec<u8>),
    Digest(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub body: AttachmentBody,
}

impl Attachment {
    pub fn size(&self) -> usize {
        match &self.body {
            AttachmentBody::Bytes(data) => data.len(),
            AttachmentBody::Digest(_) => 0,
        }
    }
}

/// One exported message, as produced by the EML reader (or any other
/// upstream parser). Never mutated after construction.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMessageRecord {
    /// Raw `From` header value, e.g. `"Alice" <+14075551234@unknown.email>`
    pub from: Option<String>,
    /// Raw `To` header value
    pub to: Option<String>,
    pub type_hint: Option<TypeHint>,
    /// Counterpart address declared by the exporter (`X-smssync-address`)
    pub counterpart_hint: Option<String>,
    /// Milliseconds since epoch, 0 when unknown
    #[serde(default)]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub message_id: Option<String>,
    /// Folder / label text such as "Sent" or "[Gmail]/Inbox"
    pub folder_hint: Option<String>,
    /// Source file path
    pub source: String,
}

/// A participant observation: whatever name/address pair a header carried,
/// plus the 10-digit phone when one can be derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Identity {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// Identity equality key. Phone digits win over address, address over name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MergeKey {
    Phone(String),
    Address(String),
    Name(String),
}

impl MergeKey {
    pub fn as_str(&self) -> &str {
        match self {
            MergeKey::Phone(s) | MergeKey::Address(s) | MergeKey::Name(s) => s,
        }
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplicated identity attached to a thread.
pub type Participant = Identity;

/// Who wrote a message, taken from the first `From` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Sender {
    pub name: Option<String>,
    pub addr: Option<String>,
    pub phone: Option<String>,
    pub is_self: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    pub record: RawMessageRecord,
    pub direction: Direction,
    pub counterpart: Identity,
    pub self_identity: Option<Identity>,
    /// Non-self identities seen in From/To, used for group detection
    pub participants: Vec<Identity>,
    pub sender: Sender,
}

impl ResolvedMessage {
    pub fn message_id(&self) -> Option<&str> {
        self.record
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.record.timestamp_ms
    }
}

/// Bucket key for a thread. One-to-one threads use the counterpart's merge
/// key, groups the sorted `_`-joined merge keys of every non-self participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ThreadKey(pub String);

impl ThreadKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    OneToOne,
    Group,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenderAttribution {
    pub name: Option<String>,
    pub addr: Option<String>,
    pub phone: Option<String>,
    pub is_self: bool,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreadMessage {
    pub message_id: Option<String>,
    pub direction: Direction,
    pub timestamp_ms: i64,
    pub timestamp_iso: String,
    pub body: String,
    pub sender: SenderAttribution,
    pub source: String,
    pub attachments: Vec<Attachment>,
}

/// A thread that survived the skip policy, ready for the output layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinishedThread {
    pub thread_key: ThreadKey,
    /// Key of the bucket the messages were accumulated under
    pub bucket_key: ThreadKey,
    pub thread_label: String,
    pub kind: ThreadKind,
    pub person_name: Option<String>,
    pub person_address: Option<String>,
    pub self_address: Option<String>,
    pub participants: Vec<Participant>,
    pub messages: Vec<ThreadMessage>,
    pub deduplicated_messages_removed: usize,
}

impl FinishedThread {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
