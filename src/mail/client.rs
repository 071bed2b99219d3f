use anyhow::Result;
use base64::Engine;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use walkdir::WalkDir;

use super::types::{Attachment, AttachmentBody, RawMessageRecord, TypeHint};

/// Headers that may carry a folder or label name
const FOLDER_HEADERS: [&str; 5] = ["X-Gmail-Labels", "X-Labels", "X-Folder", "Folder", "X-Mozilla-Status2"];

/// A file that could not be turned into a record.
#[derive(Debug)]
pub struct ScanFailure {
    pub source: PathBuf,
    pub error: anyhow::Error,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Expand files and directories (recursively) into a sorted list of paths
/// with the given extension. Missing inputs are ignored.
fn collect_paths(inputs: &[PathBuf], ext: &str) -> Vec<PathBuf> {
    let mut file_paths: Vec<PathBuf> = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).into_iter().flatten() {
                let path = entry.path();
                if entry.file_type().is_file() && has_extension(path, ext) {
                    file_paths.push(path.to_path_buf());
                }
            }
        } else if input.is_file() && has_extension(input, ext) {
            file_paths.push(input.clone());
        }
    }

    file_paths.sort();
    file_paths.dedup();
    file_paths
}

pub fn collect_eml_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
    collect_paths(inputs, "eml")
}

/// SMS Backup & Restore exports
pub fn collect_xml_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
    collect_paths(inputs, "xml")
}

/// Parse every file in parallel. Output order matches `paths`, so feeding the
/// results to a reconciler in order is deterministic.
pub fn scan_eml_files<F>(paths: &[PathBuf], progress: F) -> Vec<Result<RawMessageRecord, ScanFailure>>
where
    F: Fn(usize, usize) + Sync, // (current, total)
{
    let total = paths.len();
    let processed = AtomicUsize::new(0);

    paths
        .par_iter()
        .map(|path| {
            let result = parse_eml_file(path).map_err(|error| ScanFailure {
                source: path.clone(),
                error,
            });

            let current = processed.fetch_add(1, Ordering::Relaxed) + 1;
            progress(current, total);

            result
        })
        .collect()
}

pub fn parse_eml_file(path: &Path) -> Result<RawMessageRecord> {
    let raw = std::fs::read(path)?;
    parse_eml_bytes(&raw, &path.to_string_lossy())
}

/// Turn one exported message into a record.
pub fn parse_eml_bytes(raw: &[u8], source: &str) -> Result<RawMessageRecord> {
    let message = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse message"))?;

    if message.headers().is_empty() {
        anyhow::bail!("No headers found");
    }

    let header = |name: &str| header_values(&message, raw, name);
    let first = |name: &str| header(name).into_iter().next();

    let from = Some(header("From").join(", ")).filter(|s| !s.is_empty());
    let to = Some(header("To").join(", ")).filter(|s| !s.is_empty());

    let type_hint = first("X-smssync-type").map(|t| match t.trim() {
        "1" => TypeHint::Inbound,
        "2" => TypeHint::Outbound,
        _ => TypeHint::Unknown,
    });
    let counterpart_hint = first("X-smssync-address").filter(|s| !s.is_empty());

    let timestamp_ms = first("X-smssync-date")
        .and_then(|d| d.trim().parse::<i64>().ok())
        .and_then(to_ms)
        .or_else(|| message.date().and_then(|d| d.to_timestamp().checked_mul(1000)))
        .unwrap_or(0);

    let folder_hint = FOLDER_HEADERS
        .into_iter()
        .flat_map(|h| header(h))
        .collect::<Vec<_>>()
        .join(" ");
    let folder_hint = Some(folder_hint).filter(|s| !s.trim().is_empty());

    let body = message
        .body_text(0)
        .map(|text| text.trim().to_string())
        .unwrap_or_default();

    Ok(RawMessageRecord {
        from,
        to,
        type_hint,
        counterpart_hint,
        timestamp_ms,
        body,
        attachments: extract_attachments(&message),
        message_id: message.message_id().map(str::to_string),
        folder_hint,
        source: source.to_string(),
    })
}

/// Normalize an epoch number in seconds, milliseconds or microseconds to ms.
/// `None` when the value is out of range.
fn to_ms(n: i64) -> Option<i64> {
    if n > 100_000_000_000_000 {
        Some(n / 1000)
    } else if n < 1_000_000_000_000 {
        n.checked_mul(1000)
    } else {
        Some(n)
    }
}

/// Raw text of every top-level header called `name`, unfolded and with
/// RFC 2047 encoded words decoded.
fn header_values(message: &mail_parser::Message, raw: &[u8], name: &str) -> Vec<String> {
    message
        .headers()
        .iter()
        .filter(|h| h.name().eq_ignore_ascii_case(name))
        .filter_map(|h| raw.get(h.offset_start as usize..h.offset_end as usize))
        .map(|bytes| {
            let text = String::from_utf8_lossy(bytes);
            let unfolded = text.split_whitespace().collect::<Vec<_>>().join(" ");
            decode_header_value(&unfolded)
        })
        .filter(|v| !v.is_empty())
        .collect()
}

/// Non-body parts: declared attachments and images. Unnamed parts get an
/// `attachment.<subtype>` filename.
fn extract_attachments(message: &mail_parser::Message) -> Vec<Attachment> {
    use mail_parser::MimeHeaders;

    let mut attachments = Vec::new();

    for part in message.attachments() {
        let (ctype, subtype) = part
            .content_type()
            .map(|ct| (ct.ctype().to_lowercase(), ct.subtype().unwrap_or("octet-stream").to_lowercase()))
            .unwrap_or_else(|| ("application".to_string(), "octet-stream".to_string()));

        let data: Vec<u8> = match &part.body {
            mail_parser::PartType::Binary(data) | mail_parser::PartType::InlineBinary(data) => data.to_vec(),
            mail_parser::PartType::Text(text) => text.as_bytes().to_vec(),
            mail_parser::PartType::Html(html) => html.as_bytes().to_vec(),
            mail_parser::PartType::Message(msg) => msg.raw_message.to_vec(),
            mail_parser::PartType::Multipart(_) => continue,
        };

        let filename = part
            .attachment_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("attachment.{}", subtype));

        attachments.push(Attachment {
            filename,
            content_type: format!("{}/{}", ctype, subtype),
            body: AttachmentBody::Bytes(data),
        });
    }

    attachments
}

/// Decode RFC 2047 encoded words (=?charset?Q?...?= or =?charset?B?...?=).
/// Charsets other than UTF-8 are decoded lossily.
fn decode_header_value(s: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    let mut last_encoded = false;

    while let Some(start) = rest.find("=?") {
        let prefix = &rest[..start];
        match decode_encoded_word(&rest[start + 2..]) {
            Some((decoded, used)) => {
                // whitespace between adjacent encoded words is dropped
                if !(last_encoded && prefix.trim().is_empty()) {
                    result.push_str(prefix);
                }
                result.push_str(&decoded);
                last_encoded = true;
                rest = &rest[start + 2 + used..];
            }
            None => {
                result.push_str(&rest[..start + 2]);
                last_encoded = false;
                rest = &rest[start + 2..];
            }
        }
    }

    result.push_str(rest);
    result
}

/// Decode `charset?enc?text?=` (the part after "=?"). Returns the decoded
/// text and the number of bytes consumed.
fn decode_encoded_word(s: &str) -> Option<(String, usize)> {
    let enc_start = s.find('?')? + 1;
    let enc_end = enc_start + s[enc_start..].find('?')?;
    let text_start = enc_end + 1;
    let text_end = text_start + s[text_start..].find("?=")?;
    let text = &s[text_start..text_end];

    let decoded = match s[enc_start..enc_end].to_ascii_uppercase().as_str() {
        "Q" => decode_q(text),
        "B" => {
            let bytes = base64::engine::general_purpose::STANDARD.decode(text).ok()?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        _ => return None,
    };

    Some((decoded, text_end + 2))
}

fn decode_q(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const INBOUND: &str = "From: \"Alice\" <+14075551234@unknown.email>\r\n\
To: +19412660605@unknown.email\r\n\
Subject: SMS with Alice\r\n\
Message-ID: <abc123@sms>\r\n\
X-smssync-type: 1\r\n\
X-smssync-address: +14075551234\r\n\
X-smssync-date: 1300000000\r\n\
Date: Sun, 13 Mar 2011 07:06:40 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
hi there\r\n";

    #[test]
    fn test_parse_smssync_headers() {
        let rec = parse_eml_bytes(INBOUND.as_bytes(), "a.eml").unwrap();
        assert_eq!(rec.from.as_deref(), Some("\"Alice\" <+14075551234@unknown.email>"));
        assert_eq!(rec.to.as_deref(), Some("+19412660605@unknown.email"));
        assert_eq!(rec.type_hint, Some(TypeHint::Inbound));
        assert_eq!(rec.counterpart_hint.as_deref(), Some("+14075551234"));
        assert_eq!(rec.timestamp_ms, 1_300_000_000_000);
        assert_eq!(rec.body, "hi there");
        assert_eq!(rec.message_id.as_deref(), Some("abc123@sms"));
        assert_eq!(rec.source, "a.eml");
        assert!(rec.attachments.is_empty());
        assert!(rec.folder_hint.is_none());
    }

    #[test]
    fn test_date_header_fallback_and_labels() {
        let eml = "From: me@example.com\r\n\
To: bob@example.com\r\n\
X-Gmail-Labels: Sent,SMS\r\n\
Date: Sun, 13 Mar 2011 07:06:40 +0000\r\n\
\r\n\
yo\r\n";
        let rec = parse_eml_bytes(eml.as_bytes(), "b.eml").unwrap();
        assert_eq!(rec.timestamp_ms, 1_300_000_000_000);
        assert_eq!(rec.folder_hint.as_deref(), Some("Sent,SMS"));
        assert_eq!(rec.type_hint, None);
    }

    #[test]
    fn test_image_part_becomes_attachment() {
        let eml = "From: +14075551234@unknown.email\r\n\
To: +19412660605@unknown.email\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
look\r\n\
--XX\r\n\
Content-Type: image/png\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
aGVsbG8=\r\n\
--XX--\r\n";
        let rec = parse_eml_bytes(eml.as_bytes(), "c.eml").unwrap();
        assert_eq!(rec.body, "look");
        assert_eq!(rec.attachments.len(), 1);
        let att = &rec.attachments[0];
        assert_eq!(att.content_type, "image/png");
        assert_eq!(att.filename, "attachment.png");
        assert_eq!(att.body, AttachmentBody::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn test_decode_header_value() {
        assert_eq!(decode_header_value("=?UTF-8?Q?Caf=C3=A9_Bob?= <b@x.com>"), "Café Bob <b@x.com>");
        assert_eq!(decode_header_value("=?UTF-8?B?QWxpY2U=?= <a@x.com>"), "Alice <a@x.com>");
        assert_eq!(decode_header_value("=?UTF-8?Q?A?= =?UTF-8?Q?B?="), "AB");
        assert_eq!(decode_header_value("plain_name@x.com"), "plain_name@x.com");
    }

    #[test]
    fn test_to_ms() {
        assert_eq!(to_ms(1_300_000_000), Some(1_300_000_000_000));
        assert_eq!(to_ms(1_300_000_000_000), Some(1_300_000_000_000));
        assert_eq!(to_ms(1_300_000_000_000_000), Some(1_300_000_000_000));
        assert_eq!(to_ms(-9_000_000_000_000_000_000), None);
    }

    #[test]
    fn test_out_of_range_smssync_date_falls_back() {
        let eml = "From: +14075551234@unknown.email\r\n\
To: +19412660605@unknown.email\r\n\
X-smssync-date: -9000000000000000000\r\n\
\r\n\
hi";
        let rec = parse_eml_bytes(eml.as_bytes(), "d.eml").unwrap();
        assert_eq!(rec.timestamp_ms, 0);
        assert_eq!(rec.body, "hi");

        let with_date = eml.replace(
            "X-smssync-date: -9000000000000000000\r\n",
            "X-smssync-date: -9000000000000000000\r\nDate: Sun, 13 Mar 2011 07:06:40 +0000\r\n",
        );
        let rec = parse_eml_bytes(with_date.as_bytes(), "d.eml").unwrap();
        assert_eq!(rec.timestamp_ms, 1_300_000_000_000);
    }

    #[test]
    fn test_collect_and_scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2011");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("b.EML"), INBOUND).unwrap();
        fs::write(dir.path().join("a.eml"), INBOUND).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("empty.eml"), "").unwrap();
        fs::write(nested.join("sms-backup.XML"), "<smses/>").unwrap();

        let paths = collect_eml_paths(&[dir.path().to_path_buf()]);
        assert_eq!(paths.len(), 3);
        let xml = collect_xml_paths(&[dir.path().to_path_buf()]);
        assert_eq!(xml, vec![nested.join("sms-backup.XML")]);
        assert!(paths.windows(2).all(|w| w[0] <= w[1]));

        let seen = AtomicUsize::new(0);
        let results = scan_eml_files(&paths, |_, total| {
            assert_eq!(total, 3);
            seen.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(seen.load(Ordering::Relaxed), 3);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(failure.source.ends_with("empty.eml"));
    }
}
