use std::collections::{HashMap, HashSet};

use crate::error::ReconcileError;

use super::types::{Identity, MergeKey};

/// Domain SMS exporters glue onto bare phone numbers to make them look like
/// email addresses.
pub const UNKNOWN_EMAIL_SUFFIX: &str = "@unknown.email";

/// Part before the first '@' (the whole string when there is none)
fn local_part(s: &str) -> &str {
    s.split('@').next().unwrap_or(s).trim()
}

/// A string is phone-shaped when its local part carries digits and no
/// letters: "+1 (407) 555-1234", "4075551234@unknown.email", "58988".
pub fn is_phone_shaped(s: &str) -> bool {
    let local = local_part(s);
    local.chars().any(|c| c.is_ascii_digit()) && !local.chars().any(char::is_alphabetic)
}

/// Digits of a phone-shaped string with the NANP trunk "1" removed from
/// 11-digit numbers. Any length is returned; see `phone_digits` for the
/// validated form.
pub fn sanitize_digits(s: &str) -> Option<String> {
    if !is_phone_shaped(s) {
        return None;
    }
    let mut digits: String = local_part(s).chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits.remove(0);
    }
    Some(digits)
}

/// Canonical 10-digit phone for a phone-shaped string, if it has one.
pub fn phone_digits(s: &str) -> Option<String> {
    sanitize_digits(s).filter(|d| d.len() == 10)
}

/// True for labels that are really a number ("4075551234", "+1 407-555-1234").
pub fn looks_like_phone_label(s: &str) -> bool {
    s.chars().filter(|c| c.is_ascii_digit()).count() >= 7
}

/// Phone-shaped counterpart that doesn't reduce to 10 digits: short codes,
/// truncated numbers, international numbers outside NANP.
pub fn is_improper_counterpart(s: &str) -> bool {
    match sanitize_digits(s) {
        Some(digits) => digits.len() != 10,
        None => false,
    }
}

pub fn normalize_address(s: &str) -> String {
    s.trim().to_lowercase()
}

pub fn normalize_name(s: &str) -> String {
    let stripped: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// "(407) 555-1234" for a 10-digit string, the input otherwise
pub fn format_phone(digits: &str) -> String {
    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return digits.to_string();
    }
    format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..])
}

/// Every written form an exporter might use for the same 10-digit number.
pub fn phone_variants(digits: &str) -> Vec<String> {
    let bare = [digits.to_string(), format!("1{}", digits), format!("+1{}", digits)];
    let mut variants: Vec<String> = bare.to_vec();
    variants.extend(bare.iter().map(|v| format!("{}{}", v, UNKNOWN_EMAIL_SUFFIX)));
    variants
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl Identity {
    /// Build an identity from a header observation. The phone comes from the
    /// address, or from the name when no address was given.
    pub fn observe(name: Option<&str>, address: Option<&str>) -> Self {
        let name = non_empty(name.map(|n| n.trim_matches('"')));
        let address = non_empty(address);
        let phone = match &address {
            Some(addr) => phone_digits(addr),
            None => name.as_deref().and_then(phone_digits),
        };
        Self { name, address, phone }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.address.is_none() && self.phone.is_none()
    }

    pub fn merge_key(&self) -> Option<MergeKey> {
        if let Some(phone) = &self.phone {
            return Some(MergeKey::Phone(phone.clone()));
        }
        if let Some(addr) = self.address.as_deref().map(normalize_address) {
            if !addr.is_empty() {
                return Some(MergeKey::Address(addr));
            }
        }
        self.name
            .as_deref()
            .map(normalize_name)
            .filter(|n| !n.is_empty())
            .map(MergeKey::Name)
    }

    /// Most human-readable field available
    pub fn best_label(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.phone.as_deref())
            .or(self.address.as_deref())
    }
}

/// Split a raw `From`/`To` header value into identities.
///
/// Handles `Name <addr>`, bare addresses, quoted names containing commas and
/// bare names. Entries that are empty after trimming are dropped. A header
/// with an unterminated quote or angle bracket is split on every separator.
pub fn parse_address_list(header: &str) -> Vec<Identity> {
    let entries = split_quoted(header)
        .unwrap_or_else(|| header.split([',', ';']).map(str::to_string).collect());

    entries
        .iter()
        .map(|entry| parse_address(entry))
        .filter(|id| !id.is_empty())
        .collect()
}

/// Split on `,`/`;` outside quotes and angle brackets. `None` when a quote or
/// bracket is left open at the end.
fn split_quoted(header: &str) -> Option<Vec<String>> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in header.chars() {
        match c {
            '"' if !in_angle => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' | ';' if !in_quotes && !in_angle => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    if in_quotes || in_angle { None } else { Some(entries) }
}

/// Parse one "Name <addr>" or "addr" entry
fn parse_address(s: &str) -> Identity {
    let s = s.trim();

    if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
        if start < end {
            let addr = s[start + 1..end].trim();
            let name = s[..start].trim().trim_matches('"').trim();
            return Identity::observe(Some(name), Some(addr));
        }
    }

    if s.contains('@') || is_phone_shaped(s) {
        Identity::observe(None, Some(s))
    } else {
        Identity::observe(Some(s), None)
    }
}

/// Identity configuration for one reconciliation run: who "self" is, and the
/// preferred display names for known counterparts.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    self_set: HashSet<String>,
    self_phones: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl Normalizer {
    /// Expand the self identifiers into every written form and index the
    /// alias table. A phone-shaped self identifier that isn't a 10-digit
    /// number is rejected, since direction inference can't work without it.
    pub fn new<S: AsRef<str>>(
        self_identifiers: &[S],
        aliases: &HashMap<String, String>,
    ) -> Result<Self, ReconcileError> {
        let mut self_set = HashSet::new();
        let mut self_phones = HashSet::new();

        for raw in self_identifiers {
            let ident = normalize_address(raw.as_ref());
            if ident.is_empty() {
                continue;
            }
            if is_phone_shaped(&ident) {
                let digits = phone_digits(&ident)
                    .ok_or_else(|| ReconcileError::InvalidSelfIdentifier(raw.as_ref().to_string()))?;
                self_set.extend(phone_variants(&digits));
                self_phones.insert(digits);
            }
            self_set.insert(ident);
        }

        let mut alias_map = HashMap::new();
        for (key, label) in aliases {
            let label = label.trim();
            if label.is_empty() {
                continue;
            }
            if let Some(digits) = phone_digits(key) {
                alias_map.insert(digits, label.to_string());
                continue;
            }
            let addr = normalize_address(key);
            let name = normalize_name(key);
            if addr.is_empty() && name.is_empty() {
                return Err(ReconcileError::InvalidAlias(key.clone()));
            }
            if !name.is_empty() {
                alias_map.insert(name, label.to_string());
            }
            if !addr.is_empty() {
                alias_map.insert(addr, label.to_string());
            }
        }

        Ok(Self {
            self_set,
            self_phones,
            aliases: alias_map,
        })
    }

    pub fn self_set(&self) -> &HashSet<String> {
        &self.self_set
    }

    /// `+1<digits>@unknown.email` for the lowest self phone, the form
    /// exporters use when they synthesize addresses.
    pub fn self_phone_address(&self) -> Option<String> {
        self.self_phones
            .iter()
            .min()
            .map(|digits| format!("+1{}{}", digits, UNKNOWN_EMAIL_SUFFIX))
    }

    /// Exact match against the expanded self-set, then phone-digit equality.
    pub fn is_self(&self, addr: Option<&str>) -> bool {
        let Some(addr) = addr else {
            return false;
        };
        let normalized = normalize_address(addr);
        if normalized.is_empty() {
            return false;
        }
        if self.self_set.contains(&normalized) {
            return true;
        }
        phone_digits(&normalized)
            .map(|digits| self.self_phones.contains(&digits))
            .unwrap_or(false)
    }

    pub fn is_self_identity(&self, identity: &Identity) -> bool {
        self.is_self(identity.address.as_deref())
    }

    pub fn alias(&self, s: &str) -> Option<&str> {
        if let Some(digits) = phone_digits(s) {
            if let Some(label) = self.aliases.get(&digits) {
                return Some(label);
            }
        }
        self.aliases
            .get(&normalize_address(s))
            .or_else(|| self.aliases.get(&normalize_name(s)))
            .map(String::as_str)
    }

    /// Preferred display label: alias, then formatted phone, then the input.
    pub fn canonical_name(&self, s: &str) -> String {
        if let Some(label) = self.alias(s) {
            return label.to_string();
        }
        match phone_digits(s) {
            Some(digits) => format_phone(&digits),
            None => s.trim().to_string(),
        }
    }
}
