use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::direction::AmbiguityWarning;
use super::types::{FinishedThread, ThreadKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    SingleMessageThread,
    ImproperCounterpart,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SingleMessageThread => f.write_str("single-message-thread"),
            SkipReason::ImproperCounterpart => f.write_str("improper-counterpart"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SkippedThread {
    pub thread_key: ThreadKey,
    pub reason: SkipReason,
    /// Messages left after dedup, all of which are excluded from output
    pub message_count: usize,
    pub deduplicated_messages_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WrittenThread {
    pub thread_key: ThreadKey,
    pub thread_label: String,
    pub message_count: usize,
    pub deduplicated_messages_removed: usize,
}

/// Process-wide accounting for one reconciliation run.
///
/// Every record seen ends up in exactly one of: `records_unparsable`,
/// `messages_written`, `messages_skipped`, `duplicates_removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconcileReport {
    pub records_seen: usize,
    pub records_unparsable: usize,
    pub unparsable_sources: Vec<String>,
    pub threads_total: usize,
    pub threads_written: usize,
    pub threads_skipped: usize,
    pub threads_skipped_by_reason: BTreeMap<SkipReason, usize>,
    /// Messages that reached a thread bucket (records minus unparsable)
    pub messages_total: usize,
    pub messages_written: usize,
    pub messages_skipped: usize,
    pub messages_skipped_by_reason: BTreeMap<SkipReason, usize>,
    pub duplicates_removed: usize,
    pub written: Vec<WrittenThread>,
    pub skipped: Vec<SkippedThread>,
    pub warnings: Vec<AmbiguityWarning>,
}

impl ReconcileReport {
    pub fn record_written(&mut self, thread: &FinishedThread) {
        self.threads_total += 1;
        self.threads_written += 1;
        self.messages_written += thread.message_count();
        self.duplicates_removed += thread.deduplicated_messages_removed;
        self.written.push(WrittenThread {
            thread_key: thread.thread_key.clone(),
            thread_label: thread.thread_label.clone(),
            message_count: thread.message_count(),
            deduplicated_messages_removed: thread.deduplicated_messages_removed,
        });
    }

    pub fn record_skipped(&mut self, skipped: SkippedThread) {
        self.threads_total += 1;
        self.threads_skipped += 1;
        *self.threads_skipped_by_reason.entry(skipped.reason).or_default() += 1;
        self.messages_skipped += skipped.message_count;
        *self.messages_skipped_by_reason.entry(skipped.reason).or_default() += skipped.message_count;
        self.duplicates_removed += skipped.deduplicated_messages_removed;
        self.skipped.push(skipped);
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.threads_skipped_by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// True when every bucketed message is accounted for.
    pub fn is_balanced(&self) -> bool {
        self.messages_total == self.messages_written + self.messages_skipped + self.duplicates_removed
    }
}
