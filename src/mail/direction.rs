//! Inbound/outbound inference for a single record.
//!
//! Evidence is consulted in a fixed order and the first rule that fires
//! decides: the exporter's type hint, the exporter's counterpart address,
//! self-set membership of From/To, and finally folder labels and a
//! non-self fallback. Reaching the last stage produces an
//! [`AmbiguityWarning`] that the caller collects into the run report.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::{Normalizer, normalize_address, normalize_name, parse_address_list, phone_digits};
use super::types::{Direction, Identity, RawMessageRecord, ResolvedMessage, Sender, TypeHint};

/// Which rule decided the direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    TypeHint,
    CounterpartHint,
    SelfSet,
    FolderHint,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AmbiguityWarning {
    pub message_id: Option<String>,
    pub source: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub resolved: Direction,
}

impl fmt::Display for AmbiguityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ambiguous self detection for {} ({}): From={} To={}, resolved {}",
            self.message_id.as_deref().unwrap_or("no-id"),
            self.source,
            self.from.as_deref().unwrap_or("-"),
            self.to.as_deref().unwrap_or("-"),
            self.resolved,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub message: ResolvedMessage,
    pub evidence: Evidence,
    pub warning: Option<AmbiguityWarning>,
}

struct Decision {
    direction: Direction,
    evidence: Evidence,
    counterpart: Identity,
    self_identity: Identity,
}

impl Decision {
    fn inbound(evidence: Evidence, from: &Identity, to: &Identity) -> Self {
        Self {
            direction: Direction::Inbound,
            evidence,
            counterpart: from.clone(),
            self_identity: to.clone(),
        }
    }

    fn outbound(evidence: Evidence, from: &Identity, to: &Identity) -> Self {
        Self {
            direction: Direction::Outbound,
            evidence,
            counterpart: to.clone(),
            self_identity: from.clone(),
        }
    }
}

/// Folder/label text to a direction: "sent" wins over "inbox"/"received".
pub fn folder_hint_direction(hint: &str) -> Option<Direction> {
    let hint = hint.to_lowercase();
    if hint.contains("sent") {
        Some(Direction::Outbound)
    } else if hint.contains("inbox") || hint.contains("received") {
        Some(Direction::Inbound)
    } else {
        None
    }
}

/// Counterpart identity with its address replaced by `addr` when the side
/// had none of its own.
fn with_fallback_address(side: &Identity, addr: Option<&str>) -> Identity {
    if side.address.is_some() {
        return side.clone();
    }
    match addr {
        Some(addr) => Identity::observe(side.name.as_deref(), Some(addr)),
        None => side.clone(),
    }
}

fn matches_hint(side: &Identity, hint: &str, hint_phone: Option<&str>) -> bool {
    let Some(addr) = side.address.as_deref() else {
        return false;
    };
    if addr.contains(hint) {
        return true;
    }
    match hint_phone {
        Some(hint_phone) => phone_digits(addr).as_deref() == Some(hint_phone),
        None => false,
    }
}

/// Resolve direction, counterpart and participants for one record.
pub fn resolve_direction(record: RawMessageRecord, normalizer: &Normalizer) -> Resolution {
    let from_list = record.from.as_deref().map(parse_address_list).unwrap_or_default();
    let to_list = record.to.as_deref().map(parse_address_list).unwrap_or_default();
    let from = from_list.first().cloned().unwrap_or_default();
    let to = to_list.first().cloned().unwrap_or_default();
    let hint = record
        .counterpart_hint
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty());

    let mut warning = None;
    let decision = 'decide: {
        // 1. explicit type
        match record.type_hint {
            Some(TypeHint::Inbound) => break 'decide Decision::inbound(Evidence::TypeHint, &from, &to),
            Some(TypeHint::Outbound) => break 'decide Decision::outbound(Evidence::TypeHint, &from, &to),
            Some(TypeHint::Unknown) | None => {}
        }

        // 2. exporter-declared counterpart
        if let Some(hint) = hint {
            let hint_phone = phone_digits(hint);
            if matches_hint(&from, hint, hint_phone.as_deref()) {
                let counterpart = Identity::observe(from.name.as_deref(), Some(hint));
                break 'decide Decision::inbound(Evidence::CounterpartHint, &counterpart, &to);
            }
            if matches_hint(&to, hint, hint_phone.as_deref()) {
                let counterpart = Identity::observe(to.name.as_deref(), Some(hint));
                break 'decide Decision::outbound(Evidence::CounterpartHint, &from, &counterpart);
            }
        }

        // 3. exactly one side is self
        let from_self = normalizer.is_self_identity(&from);
        let to_self = normalizer.is_self_identity(&to);
        if from_self && !to_self {
            break 'decide Decision::outbound(Evidence::SelfSet, &from, &with_fallback_address(&to, hint));
        }
        if to_self && !from_self {
            break 'decide Decision::inbound(Evidence::SelfSet, &with_fallback_address(&from, hint), &to);
        }

        // 4. ambiguous: both or neither side is self
        let decision = match record.folder_hint.as_deref().and_then(folder_hint_direction) {
            Some(Direction::Inbound) => {
                Decision::inbound(Evidence::FolderHint, &with_fallback_address(&from, hint), &to)
            }
            Some(Direction::Outbound) => {
                Decision::outbound(Evidence::FolderHint, &from, &with_fallback_address(&to, hint))
            }
            None if !from_self && !from.is_empty() => {
                Decision::inbound(Evidence::Fallback, &with_fallback_address(&from, hint), &to)
            }
            None if !to_self && !to.is_empty() => {
                Decision::outbound(Evidence::Fallback, &from, &with_fallback_address(&to, hint))
            }
            None => {
                let counterpart = if to.is_empty() { &from } else { &to };
                let mut decision =
                    Decision::outbound(Evidence::Fallback, &from, &with_fallback_address(counterpart, hint));
                if to.is_empty() {
                    decision.self_identity = Identity::default();
                }
                decision
            }
        };
        warning = Some(AmbiguityWarning {
            message_id: record.message_id.clone(),
            source: record.source.clone(),
            from: from.address.clone(),
            to: to.address.clone(),
            resolved: decision.direction,
        });
        decision
    };

    let Decision {
        direction,
        evidence,
        mut counterpart,
        self_identity,
    } = decision;

    if counterpart.name.is_none() {
        if let Some(addr) = counterpart.address.as_deref().map(normalize_address) {
            counterpart.name = to_list
                .iter()
                .chain(from_list.iter())
                .filter(|id| id.address.as_deref().map(normalize_address).as_deref() == Some(addr.as_str()))
                .find_map(|id| id.name.clone());
        }
    }

    let participants = collect_participants(&from_list, &to_list, normalizer);
    let sender = Sender {
        name: from.name.clone(),
        addr: from.address.clone(),
        phone: from.phone.clone(),
        is_self: normalizer.is_self_identity(&from),
    };

    Resolution {
        message: ResolvedMessage {
            record,
            direction,
            counterpart,
            self_identity: Some(self_identity).filter(|id| !id.is_empty()),
            participants,
            sender,
        },
        evidence,
        warning,
    }
}

/// Non-self From/To entries that carry an address, unique by (name, address).
/// Cc/Bcc never get here, which keeps broadcast copies from looking like groups.
fn collect_participants(from: &[Identity], to: &[Identity], normalizer: &Normalizer) -> Vec<Identity> {
    let mut seen = std::collections::HashSet::new();
    from.iter()
        .chain(to.iter())
        .filter(|id| id.address.is_some() && !normalizer.is_self_identity(id))
        .filter(|id| {
            let key = (
                id.name.as_deref().map(normalize_name).unwrap_or_default(),
                id.address.as_deref().map(normalize_address).unwrap_or_default(),
            );
            seen.insert(key)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SELF_PHONE: &str = "9412660605";

    fn normalizer() -> Normalizer {
        Normalizer::new(&[SELF_PHONE, "me@example.com"], &HashMap::new()).unwrap()
    }

    fn record(from: &str, to: &str) -> RawMessageRecord {
        RawMessageRecord {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            message_id: Some("m1".into()),
            source: "m1.eml".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_self_set_decides_direction() {
        let n = normalizer();
        let forms = ["9412660605", "+19412660605@unknown.email", "19412660605", "me@example.com"];
        for self_form in forms {
            let r = resolve_direction(record("+14075551234@unknown.email", self_form), &n);
            assert_eq!(r.message.direction, Direction::Inbound, "{self_form}");
            assert_eq!(r.evidence, Evidence::SelfSet);
            assert!(r.warning.is_none());

            let r = resolve_direction(record(self_form, "Alice <+14075551234@unknown.email>"), &n);
            assert_eq!(r.message.direction, Direction::Outbound, "{self_form}");
            assert_eq!(r.message.counterpart.phone.as_deref(), Some("4075551234"));
            assert_eq!(r.message.counterpart.name.as_deref(), Some("Alice"));
        }
    }

    #[test]
    fn test_type_hint_wins() {
        let n = normalizer();
        let mut rec = record("+19412660605@unknown.email", "+14075551234@unknown.email");
        rec.type_hint = Some(TypeHint::Inbound);
        let r = resolve_direction(rec, &n);
        assert_eq!(r.message.direction, Direction::Inbound);
        assert_eq!(r.evidence, Evidence::TypeHint);
        assert_eq!(r.message.counterpart.phone.as_deref(), Some(SELF_PHONE));
    }

    #[test]
    fn test_unknown_type_hint_falls_through() {
        let n = normalizer();
        let mut rec = record("+19412660605@unknown.email", "+14075551234@unknown.email");
        rec.type_hint = Some(TypeHint::Unknown);
        let r = resolve_direction(rec, &n);
        assert_eq!(r.evidence, Evidence::SelfSet);
        assert_eq!(r.message.direction, Direction::Outbound);
    }

    #[test]
    fn test_counterpart_hint_by_phone() {
        let n = normalizer();
        let mut rec = record("Bob <bob@x.com>", "+1 (407) 555-1234");
        rec.counterpart_hint = Some("4075551234".into());
        let r = resolve_direction(rec, &n);
        assert_eq!(r.evidence, Evidence::CounterpartHint);
        assert_eq!(r.message.direction, Direction::Outbound);
        assert_eq!(r.message.counterpart.address.as_deref(), Some("4075551234"));
        assert_eq!(r.message.counterpart.phone.as_deref(), Some("4075551234"));
    }

    #[test]
    fn test_ambiguous_uses_folder_hint_and_warns() {
        let n = normalizer();
        let mut rec = record("alice@x.com", "bob@x.com");
        rec.folder_hint = Some("[Gmail]/Sent Mail".into());
        let r = resolve_direction(rec, &n);
        assert_eq!(r.evidence, Evidence::FolderHint);
        assert_eq!(r.message.direction, Direction::Outbound);
        assert_eq!(r.message.counterpart.address.as_deref(), Some("bob@x.com"));
        let warning = r.warning.unwrap();
        assert_eq!(warning.message_id.as_deref(), Some("m1"));
        assert_eq!(warning.from.as_deref(), Some("alice@x.com"));
    }

    #[test]
    fn test_inbox_and_received_folders_mean_inbound() {
        let n = normalizer();
        for folder in ["INBOX", "SMS/Received"] {
            let mut rec = record("alice@x.com", "bob@x.com");
            rec.folder_hint = Some(folder.into());
            let r = resolve_direction(rec, &n);
            assert_eq!(r.evidence, Evidence::FolderHint, "{folder}");
            assert_eq!(r.message.direction, Direction::Inbound, "{folder}");
            assert_eq!(r.message.counterpart.address.as_deref(), Some("alice@x.com"));
            assert!(r.warning.is_some());
        }
        assert_eq!(folder_hint_direction("Sent/Received"), Some(Direction::Outbound));
        assert_eq!(folder_hint_direction("Archive"), None);
    }

    #[test]
    fn test_counterpart_hint_contained_in_from() {
        let n = normalizer();
        let mut rec = record("Alice <+14075551234@unknown.email>", "me@example.com");
        rec.counterpart_hint = Some("+14075551234".into());
        let r = resolve_direction(rec, &n);
        assert_eq!(r.evidence, Evidence::CounterpartHint);
        assert_eq!(r.message.direction, Direction::Inbound);
        assert_eq!(r.message.counterpart.phone.as_deref(), Some("4075551234"));
        assert_eq!(r.message.counterpart.name.as_deref(), Some("Alice"));
        assert!(r.warning.is_none());
    }

    #[test]
    fn test_counterpart_hint_beats_self_set() {
        let n = normalizer();
        // self-set alone would call this outbound
        let mut rec = record("+19412660605@unknown.email", "Bob <bob@x.com>");
        let r = resolve_direction(rec.clone(), &n);
        assert_eq!(r.evidence, Evidence::SelfSet);
        assert_eq!(r.message.direction, Direction::Outbound);

        rec.counterpart_hint = Some("+19412660605".into());
        let r = resolve_direction(rec, &n);
        assert_eq!(r.evidence, Evidence::CounterpartHint);
        assert_eq!(r.message.direction, Direction::Inbound);
        assert_eq!(r.message.counterpart.phone.as_deref(), Some(SELF_PHONE));
    }

    #[test]
    fn test_ambiguous_fallback_prefers_non_self_sender() {
        let n = normalizer();
        let r = resolve_direction(record("alice@x.com", "bob@x.com"), &n);
        assert_eq!(r.evidence, Evidence::Fallback);
        assert_eq!(r.message.direction, Direction::Inbound);
        assert_eq!(r.message.counterpart.address.as_deref(), Some("alice@x.com"));
        assert!(r.warning.is_some());
    }

    #[test]
    fn test_self_to_self_defaults_outbound() {
        let n = normalizer();
        let r = resolve_direction(record("me@example.com", "9412660605"), &n);
        assert_eq!(r.evidence, Evidence::Fallback);
        assert_eq!(r.message.direction, Direction::Outbound);
        assert!(r.message.participants.is_empty());
        assert!(r.warning.is_some());
    }

    #[test]
    fn test_participants_skip_self_and_duplicates() {
        let n = normalizer();
        let rec = record(
            "Alice <a@x.com>",
            "me@example.com, Bob <b@x.com>, Alice <a@x.com>",
        );
        let r = resolve_direction(rec, &n);
        let addrs: Vec<_> = r
            .message
            .participants
            .iter()
            .filter_map(|p| p.address.as_deref())
            .collect();
        assert_eq!(addrs, vec!["a@x.com", "b@x.com"]);
        assert!(!r.message.sender.is_self);
        assert_eq!(r.message.sender.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_counterpart_name_backfilled_from_headers() {
        let n = normalizer();
        let r = resolve_direction(record("+19412660605@unknown.email", "a@x.com, Alice <A@x.com>"), &n);
        assert_eq!(r.message.counterpart.address.as_deref(), Some("a@x.com"));
        assert_eq!(r.message.counterpart.name.as_deref(), Some("Alice"));
    }
}
