use anyhow::Result;
use base64::Engine;
use chrono::Utc;
use mail_builder::MessageBuilder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::mail::identity::sanitize_digits;
use crate::mail::{
    AttachmentBody, Direction, FinishedThread, Participant, ReconcileReport, SenderAttribution, ThreadKey,
    ThreadKind,
};

pub const REPORT_FILE: &str = "summary_report.json";

/// Replace anything outside `[A-Za-z0-9._@+-]` with single underscores.
pub fn safe_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '+' | '-') {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_');
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out.to_string()
    }
}

/// Cap a file name at `max_len` characters by truncating the stem and
/// appending `_<5 hex chars>` of its hash, keeping the extension.
pub fn enforce_max_filename(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    let hash = hex::encode(Sha256::digest(stem.as_bytes()));
    let hash = &hash[..5];
    let keep = max_len.saturating_sub(ext.chars().count() + 1 + hash.len()).max(1);
    let truncated: String = stem.chars().take(keep).collect();
    format!("{}_{}{}", truncated, hash, ext)
}

/// File stem for a thread: `Group_<keys>` for groups, the person otherwise
pub fn thread_file_stem(thread: &FinishedThread) -> String {
    match thread.kind {
        ThreadKind::Group => {
            let mut labels: Vec<String> = thread
                .participants
                .iter()
                .map(|p| {
                    safe_filename(
                        p.phone
                            .as_deref()
                            .or(p.address.as_deref())
                            .or(p.name.as_deref())
                            .unwrap_or("unknown"),
                    )
                })
                .collect();
            labels.sort();
            format!("Group_{}", labels.join("_"))
        }
        ThreadKind::OneToOne => {
            let label = thread
                .person_name
                .clone()
                .or_else(|| thread.person_address.as_deref().and_then(sanitize_digits))
                .or_else(|| thread.person_address.clone())
                .unwrap_or_else(|| thread.thread_key.to_string());
            safe_filename(&label)
        }
    }
}

#[derive(Serialize)]
struct AttachmentJson<'a> {
    filename: &'a str,
    content_type: &'a str,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<&'a str>,
}

#[derive(Serialize)]
struct MessageJson<'a> {
    message_id: Option<&'a str>,
    direction: Direction,
    timestamp_ms: i64,
    timestamp_iso: &'a str,
    body: &'a str,
    sender: &'a SenderAttribution,
    source_eml: &'a str,
    attachments: Vec<AttachmentJson<'a>>,
}

#[derive(Serialize)]
struct ThreadJson<'a> {
    thread_key: &'a ThreadKey,
    thread_label: &'a str,
    kind: ThreadKind,
    person_name: Option<&'a str>,
    person_address: Option<&'a str>,
    self_address: Option<&'a str>,
    message_count: usize,
    participants: &'a [Participant],
    messages: Vec<MessageJson<'a>>,
    deduplicated_messages_removed: usize,
}

impl<'a> ThreadJson<'a> {
    fn new(thread: &'a FinishedThread) -> Self {
        let engine = base64::engine::general_purpose::STANDARD;
        let messages = thread
            .messages
            .iter()
            .map(|m| MessageJson {
                message_id: m.message_id.as_deref(),
                direction: m.direction,
                timestamp_ms: m.timestamp_ms,
                timestamp_iso: &m.timestamp_iso,
                body: &m.body,
                sender: &m.sender,
                source_eml: &m.source,
                attachments: m
                    .attachments
                    .iter()
                    .map(|a| {
                        let (data_b64, digest) = match &a.body {
                            AttachmentBody::Bytes(data) => (Some(engine.encode(data)), None),
                            AttachmentBody::Digest(d) => (None, Some(d.as_str())),
                        };
                        AttachmentJson {
                            filename: &a.filename,
                            content_type: &a.content_type,
                            size: a.size(),
                            data_b64,
                            digest,
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            thread_key: &thread.thread_key,
            thread_label: &thread.thread_label,
            kind: thread.kind,
            person_name: thread.person_name.as_deref(),
            person_address: thread.person_address.as_deref(),
            self_address: thread.self_address.as_deref(),
            message_count: thread.message_count(),
            participants: &thread.participants,
            messages,
            deduplicated_messages_removed: thread.deduplicated_messages_removed,
        }
    }
}

fn is_eml_source(source: &str) -> bool {
    Path::new(source)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("eml"))
        .unwrap_or(false)
}

/// One message bundling every source `.eml` of a thread as a `message/rfc822`
/// attachment, in thread order. `None` when no source file could be read
/// (threads built from XML backups have none).
pub fn combined_eml(thread: &FinishedThread) -> Result<Option<Vec<u8>>> {
    let mut parts = Vec::new();
    for (idx, msg) in thread.messages.iter().enumerate() {
        if !is_eml_source(&msg.source) {
            continue;
        }
        match fs::read(&msg.source) {
            Ok(raw) => {
                let id = safe_filename(msg.message_id.as_deref().unwrap_or("message"));
                parts.push((format!("{:04}_{}.eml", idx + 1, id), raw));
            }
            Err(e) => warn!("Cannot re-read {}: {}", msg.source, e),
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }

    let recipients: Vec<(String, String)> = match thread.kind {
        ThreadKind::Group => thread
            .participants
            .iter()
            .map(|p| {
                (
                    p.best_label().unwrap_or("unknown").to_string(),
                    p.address.clone().unwrap_or_else(|| "unknown@local".to_string()),
                )
            })
            .collect(),
        ThreadKind::OneToOne => vec![(
            thread.thread_label.clone(),
            thread
                .person_address
                .clone()
                .unwrap_or_else(|| "unknown@local".to_string()),
        )],
    };
    let to: Vec<(&str, &str)> = recipients.iter().map(|(n, a)| (n.as_str(), a.as_str())).collect();

    let count = thread.message_count();
    let subject = format!("Combined SMS with {} ({} messages)", thread.thread_label, count);
    let summary = format!(
        "Combined {} messages in chronological order.\nThread: {}\nKey: {}\n",
        count, thread.thread_label, thread.thread_key
    );

    let mut builder = MessageBuilder::new()
        .from(thread.self_address.as_deref().unwrap_or("me@local"))
        .to(to)
        .subject(subject.as_str())
        .text_body(summary);
    for (filename, raw) in parts {
        builder = builder.attachment("message/rfc822", filename, raw);
    }
    Ok(Some(builder.write_to_vec()?))
}

fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    fs::write(path, json)?;
    Ok(())
}

/// Where one thread was written
#[derive(Debug, Clone, Serialize)]
pub struct WrittenFile {
    pub thread_key: ThreadKey,
    pub json: PathBuf,
    pub eml: Option<PathBuf>,
}

/// Writes finished threads and the run report into one directory.
pub struct ThreadWriter {
    dir: PathBuf,
    max_filename_len: usize,
    pretty: bool,
    eml: bool,
    used_stems: HashSet<String>,
    written: Vec<WrittenFile>,
}

impl ThreadWriter {
    pub fn new(dir: &Path, max_filename_len: usize, pretty: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            max_filename_len,
            pretty,
            eml: true,
            used_stems: HashSet::new(),
            written: Vec::new(),
        })
    }

    /// Toggle the combined `.eml` next to each JSON file
    pub fn with_eml(mut self, eml: bool) -> Self {
        self.eml = eml;
        self
    }

    /// Threads whose labels collide (two numbers aliased to one name) get a
    /// numeric suffix instead of overwriting each other.
    fn unique_stem(&mut self, stem: &str) -> String {
        let mut candidate = stem.to_string();
        let mut n = 2;
        while !self.used_stems.insert(candidate.clone()) {
            candidate = format!("{}_{}", stem, n);
            n += 1;
        }
        candidate
    }

    fn file_path(&self, stem: &str, ext: &str) -> PathBuf {
        self.dir
            .join(enforce_max_filename(&format!("{}_combined.{}", stem, ext), self.max_filename_len))
    }

    /// Write the thread's JSON file, and its combined `.eml` when enabled and
    /// any source message is an `.eml` file. Returns the JSON path.
    pub fn write_thread(&mut self, thread: &FinishedThread) -> Result<PathBuf> {
        let stem = self.unique_stem(&thread_file_stem(thread));
        let json = self.file_path(&stem, "json");
        write_json(&json, &ThreadJson::new(thread), self.pretty)?;

        let mut eml = None;
        if self.eml {
            if let Some(bytes) = combined_eml(thread)? {
                let path = self.file_path(&stem, "eml");
                fs::write(&path, bytes)?;
                eml = Some(path);
            }
        }

        self.written.push(WrittenFile {
            thread_key: thread.thread_key.clone(),
            json: json.clone(),
            eml,
        });
        Ok(json)
    }

    pub fn written(&self) -> &[WrittenFile] {
        &self.written
    }

    /// Write `summary_report.json` next to the threads.
    pub fn write_report(&self, report: &ReconcileReport, files_input: usize) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct Summary<'a> {
            generated_at: String,
            output_dir: &'a Path,
            files_input: usize,
            files: &'a [WrittenFile],
            #[serde(flatten)]
            report: &'a ReconcileReport,
        }

        let path = self.dir.join(REPORT_FILE);
        let summary = Summary {
            generated_at: Utc::now().to_rfc3339(),
            output_dir: &self.dir,
            files_input,
            files: &self.written,
            report,
        };
        write_json(&path, &summary, self.pretty)?;
        Ok(path)
    }
}
