use std::collections::HashMap;

use super::identity::looks_like_phone_label;
use super::types::{Identity, MergeKey, Participant};

/// Prefer a human name over a numeric/phone-like label.
pub fn is_better_name(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => looks_like_phone_label(old) && !looks_like_phone_label(new),
    }
}

/// Merge participant observations into one entry per merge key.
///
/// Names only ever improve toward something human-readable and address /
/// phone fields are back-filled from later observations, never dropped.
/// The result is sorted by (phone, address, name) so callers can build keys
/// and labels without caring about arrival order.
pub fn dedupe_participants<'a, I>(observations: I) -> Vec<Participant>
where
    I: IntoIterator<Item = &'a Identity>,
{
    let mut index: HashMap<MergeKey, usize> = HashMap::new();
    let mut merged: Vec<Participant> = Vec::new();

    for obs in observations {
        let Some(key) = obs.merge_key() else {
            continue;
        };
        match index.get(&key) {
            None => {
                index.insert(key, merged.len());
                merged.push(obs.clone());
            }
            Some(&i) => {
                let cur = &mut merged[i];
                if is_better_name(cur.name.as_deref(), obs.name.as_deref()) {
                    cur.name = obs.name.clone();
                }
                if cur.address.is_none() {
                    cur.address = obs.address.clone();
                }
                if cur.phone.is_none() {
                    cur.phone = obs.phone.clone();
                }
            }
        }
    }

    merged.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    merged
}

fn sort_key(p: &Participant) -> (&str, &str, &str) {
    (
        p.phone.as_deref().unwrap_or(""),
        p.address.as_deref().unwrap_or(""),
        p.name.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(name: Option<&str>, addr: &str) -> Identity {
        Identity::observe(name, Some(addr))
    }

    #[test]
    fn test_human_name_replaces_phone_label() {
        let input = vec![
            obs(Some("4075551234"), "+14075551234@unknown.email"),
            obs(Some("Alice"), "4075551234"),
            obs(Some("Alicia"), "14075551234"),
        ];
        let parts = dedupe_participants(&input);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name.as_deref(), Some("Alice"));
        assert_eq!(parts[0].address.as_deref(), Some("+14075551234@unknown.email"));
        assert_eq!(parts[0].phone.as_deref(), Some("4075551234"));
    }

    #[test]
    fn test_fields_backfilled() {
        let mut first = Identity::observe(None, Some("4075551234"));
        first.address = None;
        let input = vec![first, obs(Some("Alice"), "+14075551234@unknown.email")];
        let parts = dedupe_participants(&input);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name.as_deref(), Some("Alice"));
        assert_eq!(parts[0].address.as_deref(), Some("+14075551234@unknown.email"));
    }

    #[test]
    fn test_sorted_and_order_independent() {
        let a = obs(Some("B"), "b@x.com");
        let b = obs(Some("A"), "a@x.com");
        let c = obs(None, "3215550000");
        let one = dedupe_participants([&a, &b, &c]);
        let two = dedupe_participants([&c, &b, &a]);
        assert_eq!(one, two);
        // rows without a phone sort first (empty string)
        assert_eq!(one[0].address.as_deref(), Some("a@x.com"));
        assert_eq!(one[2].phone.as_deref(), Some("3215550000"));
    }

    #[test]
    fn test_never_grows() {
        let input = vec![
            obs(None, "a@x.com"),
            obs(None, "A@X.com "),
            obs(Some("Bob"), "b@x.com"),
        ];
        let parts = dedupe_participants(&input);
        assert!(parts.len() <= input.len());
        assert_eq!(parts.len(), 2);
        // idempotent on its own output
        assert_eq!(dedupe_participants(&parts), parts);
    }

    #[test]
    fn test_is_better_name() {
        assert!(is_better_name(None, Some("Alice")));
        assert!(is_better_name(Some("+1 407 555 1234"), Some("Alice")));
        assert!(!is_better_name(Some("Alice"), Some("Alicia")));
        assert!(!is_better_name(Some("Alice"), None));
        assert!(!is_better_name(Some("4075551234"), Some("3215550000")));
    }
}
