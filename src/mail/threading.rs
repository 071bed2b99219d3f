use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::dedup::dedupe_messages;
use super::identity::{Normalizer, is_improper_counterpart};
use super::participants::dedupe_participants;
use super::report::{SkipReason, SkippedThread};
use super::types::{
    FinishedThread, Identity, MergeKey, Participant, ResolvedMessage, SenderAttribution, ThreadKey,
    ThreadKind, ThreadMessage,
};

/// Messages accumulated under one key, not yet deduplicated or sorted.
#[derive(Debug, Clone)]
pub struct Thread {
    pub key: ThreadKey,
    pub messages: Vec<ResolvedMessage>,
}

impl Thread {
    fn new(key: ThreadKey) -> Self {
        Self {
            key,
            messages: Vec::new(),
        }
    }
}

fn join_keys<I: IntoIterator<Item = MergeKey>>(keys: I) -> String {
    let mut keys: Vec<String> = keys.into_iter().map(|k| k.as_str().to_string()).collect();
    keys.sort();
    keys.dedup();
    keys.join("_")
}

/// Bucket key for a message, computed from what this message alone shows.
/// One non-self participant gives a one-to-one key, two or more a group key.
/// Messages without non-self participants (notes to self, headers with no
/// address) fall back to the counterpart.
pub fn provisional_key(msg: &ResolvedMessage) -> ThreadKey {
    let participants = dedupe_participants(&msg.participants);
    let keys: Vec<MergeKey> = participants.iter().filter_map(Identity::merge_key).collect();

    match keys.len() {
        0 => match msg.counterpart.merge_key() {
            Some(key) => ThreadKey(key.as_str().to_string()),
            None => ThreadKey(format!("unknown_{}_{}", msg.direction, msg.timestamp_ms())),
        },
        1 => ThreadKey(keys[0].as_str().to_string()),
        _ => ThreadKey(join_keys(keys)),
    }
}

/// Single-writer accumulator of thread buckets.
#[derive(Debug, Default)]
pub struct ThreadGrouper {
    threads: HashMap<ThreadKey, Thread>,
    message_count: usize,
}

impl ThreadGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its bucket, creating the bucket on first use.
    pub fn push(&mut self, msg: ResolvedMessage) -> ThreadKey {
        let key = provisional_key(&msg);
        self.threads
            .entry(key.clone())
            .or_insert_with(|| Thread::new(key.clone()))
            .messages
            .push(msg);
        self.message_count += 1;
        key
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn get(&self, key: &ThreadKey) -> Option<&Thread> {
        self.threads.get(key)
    }

    /// All buckets, sorted by key
    pub fn into_threads(self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self.threads.into_values().collect();
        threads.sort_by(|a, b| a.key.cmp(&b.key));
        threads
    }
}

#[derive(Debug, Clone)]
pub enum ThreadOutcome {
    Written(FinishedThread),
    Skipped(SkippedThread),
}

/// Name seen most often, ties going to the one seen first
fn most_common_name<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for name in names {
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, c)) => *c += 1,
            None => counts.push((name, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((name, count));
        }
    }
    best.map(|(name, _)| name)
}

fn iso_from_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn thread_message(msg: ResolvedMessage, normalizer: &Normalizer) -> ThreadMessage {
    let sender = &msg.sender;
    let label_source = sender
        .name
        .as_deref()
        .or(sender.phone.as_deref())
        .or(sender.addr.as_deref())
        .unwrap_or("unknown");
    let sender = SenderAttribution {
        name: sender.name.clone(),
        addr: sender.addr.clone(),
        phone: sender.phone.clone(),
        is_self: sender.is_self,
        label: normalizer.canonical_name(label_source),
    };
    let record = msg.record;

    ThreadMessage {
        message_id: record.message_id,
        direction: msg.direction,
        timestamp_ms: record.timestamp_ms,
        timestamp_iso: iso_from_ms(record.timestamp_ms),
        body: record.body,
        sender,
        source: record.source,
        attachments: record.attachments,
    }
}

/// Finalize one bucket: merge participants, drop duplicates, sort, classify
/// and apply the skip policy.
///
/// Classification happens here and only here, from the deduplicated
/// participant set, so a bucket that began one-to-one becomes a group if
/// later messages revealed more participants under the same key.
pub fn finalize_thread(thread: Thread, normalizer: &Normalizer) -> ThreadOutcome {
    let Thread { key: bucket_key, messages } = thread;

    let participants: Vec<Participant> =
        dedupe_participants(messages.iter().flat_map(|m| m.participants.iter()));
    let (mut messages, removed) = dedupe_messages(messages);
    messages.sort_by(|a, b| {
        a.timestamp_ms()
            .cmp(&b.timestamp_ms())
            .then_with(|| a.message_id().unwrap_or("").cmp(b.message_id().unwrap_or("")))
    });

    let kind = if participants.len() >= 2 {
        ThreadKind::Group
    } else {
        ThreadKind::OneToOne
    };

    let skip = |reason: SkipReason, count: usize| {
        ThreadOutcome::Skipped(SkippedThread {
            thread_key: bucket_key.clone(),
            reason,
            message_count: count,
            deduplicated_messages_removed: removed,
        })
    };

    if messages.len() <= 1 {
        return skip(SkipReason::SingleMessageThread, messages.len());
    }

    let (thread_key, thread_label, person_name, person_address) = match kind {
        ThreadKind::Group => {
            let mut labels: Vec<String> = participants
                .iter()
                .map(|p| normalizer.canonical_name(p.best_label().unwrap_or("unknown")))
                .collect();
            labels.sort();
            let key = ThreadKey(join_keys(participants.iter().filter_map(Identity::merge_key)));
            (key, format!("Group: {}", labels.join(", ")), None, None)
        }
        ThreadKind::OneToOne => {
            let counterpart = participants
                .first()
                .cloned()
                .unwrap_or_else(|| messages[0].counterpart.clone());
            let common = most_common_name(messages.iter().filter_map(|m| m.counterpart.name.as_deref()));
            let name = common
                .or(counterpart.name.as_deref())
                .or(counterpart.phone.as_deref())
                .or(counterpart.address.as_deref())
                .map(|n| normalizer.canonical_name(n));
            let addr = counterpart.address.clone();

            let check = addr
                .as_deref()
                .or(name.as_deref())
                .unwrap_or(bucket_key.as_str());
            if is_improper_counterpart(check) {
                return skip(SkipReason::ImproperCounterpart, messages.len());
            }

            let key = counterpart
                .merge_key()
                .map(|k| ThreadKey(k.as_str().to_string()))
                .unwrap_or_else(|| bucket_key.clone());
            let label = name
                .clone()
                .or_else(|| addr.clone())
                .unwrap_or_else(|| bucket_key.to_string());
            (key, label, name, addr)
        }
    };

    let self_address = messages
        .iter()
        .filter_map(|m| m.self_identity.as_ref())
        .find_map(|id| id.address.clone());

    let messages: Vec<ThreadMessage> = messages
        .into_iter()
        .map(|m| thread_message(m, normalizer))
        .collect();

    ThreadOutcome::Written(FinishedThread {
        thread_key,
        bucket_key,
        thread_label,
        kind,
        person_name,
        person_address,
        self_address,
        participants,
        messages,
        deduplicated_messages_removed: removed,
    })
}
