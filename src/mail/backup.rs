//! Reader for "SMS Backup & Restore" XML exports.
//!
//! Each `<sms>` element becomes one [`RawMessageRecord`] carrying an explicit
//! type hint, so these records never need self-set inference. Counterpart
//! numbers are written as `+1<digits>@unknown.email`, the same convention the
//! EML exporter uses, which lets XML and EML copies of one conversation land
//! in the same thread. MMS elements are counted and skipped.

use anyhow::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::identity::{UNKNOWN_EMAIL_SUFFIX, sanitize_digits};
use super::types::{RawMessageRecord, TypeHint};

/// Records read from one backup file, plus what was passed over.
#[derive(Debug, Default)]
pub struct BackupScan {
    pub records: Vec<RawMessageRecord>,
    /// `<mms>` elements (not decoded)
    pub mms_skipped: usize,
    /// `<sms>` elements whose type is neither received (1) nor sent (2):
    /// drafts, outbox, failed, queued
    pub untyped_skipped: usize,
}

/// Address for a number as the exporters write it
fn synthesized_address(raw: &str) -> String {
    match sanitize_digits(raw) {
        Some(digits) if digits.len() == 10 => format!("+1{}{}", digits, UNKNOWN_EMAIL_SUFFIX),
        Some(digits) if !digits.is_empty() => format!("{}{}", digits, UNKNOWN_EMAIL_SUFFIX),
        _ => raw.trim().to_string(),
    }
}

/// Id that stays the same across runs for the same message, so re-imports
/// of one backup dedupe by id.
fn stable_message_id(direction: &str, counterpart: &str, timestamp_ms: i64, body: &str) -> String {
    let body = body.split_whitespace().collect::<Vec<_>>().join(" ");
    let key = format!("xml|{}|{}|{}|{}", direction, counterpart, timestamp_ms, body);
    hex::encode(Sha1::digest(key.as_bytes()))
}

fn mailbox(name: Option<&str>, addr: &str) -> String {
    match name {
        Some(name) => format!("\"{}\" <{}>", name.replace('"', ""), addr),
        None => addr.to_string(),
    }
}

fn sms_record(
    element: &BytesStart,
    source: String,
    self_address: Option<&str>,
) -> Result<Option<RawMessageRecord>> {
    let mut address = String::new();
    let mut name = None;
    let mut date = String::new();
    let mut body = String::new();
    let mut kind = String::new();

    for attr in element.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"address" => address = value,
            // `contact_name` in SMS Backup & Restore, `name` in older schemas
            b"contact_name" | b"name" => {
                if name.is_none() && !value.trim().is_empty() && value != "(Unknown)" {
                    name = Some(value.trim().to_string());
                }
            }
            b"date" => date = value,
            b"body" => body = value,
            b"type" => kind = value,
            _ => {}
        }
    }

    let (type_hint, direction) = match kind.trim() {
        "1" => (TypeHint::Inbound, "in"),
        "2" => (TypeHint::Outbound, "out"),
        _ => return Ok(None),
    };

    let counterpart = synthesized_address(&address);
    let contact = mailbox(name.as_deref(), &counterpart);
    let (from, to) = match type_hint {
        TypeHint::Outbound => (self_address.map(str::to_string), Some(contact)),
        _ => (Some(contact), self_address.map(str::to_string)),
    };
    let timestamp_ms = date.trim().parse::<i64>().unwrap_or(0);
    let body = body.trim().to_string();
    let key = sanitize_digits(&address).unwrap_or_else(|| counterpart.clone());

    Ok(Some(RawMessageRecord {
        from,
        to,
        type_hint: Some(type_hint),
        counterpart_hint: Some(counterpart).filter(|c| !c.is_empty()),
        timestamp_ms,
        message_id: Some(stable_message_id(direction, &key, timestamp_ms, &body)),
        body,
        attachments: Vec::new(),
        folder_hint: None,
        source,
    }))
}

/// Read every `<sms>` element of a backup. `self_address` fills the self side
/// of From/To when known.
pub fn parse_sms_backup<R: BufRead>(input: R, source: &str, self_address: Option<&str>) -> Result<BackupScan> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut scan = BackupScan::default();
    let mut index = 0;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                let tag = e.local_name();
                if tag.as_ref().eq_ignore_ascii_case(b"sms") {
                    index += 1;
                    let source = format!("{}#{}", source, index);
                    match sms_record(&e, source, self_address)? {
                        Some(record) => scan.records.push(record),
                        None => scan.untyped_skipped += 1,
                    }
                } else if tag.as_ref().eq_ignore_ascii_case(b"mms") {
                    scan.mms_skipped += 1;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(scan)
}

pub fn parse_sms_backup_file(path: &Path, self_address: Option<&str>) -> Result<BackupScan> {
    let file = File::open(path)?;
    parse_sms_backup(BufReader::new(file), &path.to_string_lossy(), self_address)
}
