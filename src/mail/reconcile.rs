use rayon::prelude::*;
use tracing::{debug, warn};

use super::direction::resolve_direction;
use super::identity::Normalizer;
use super::report::ReconcileReport;
use super::threading::{ThreadGrouper, ThreadOutcome, finalize_thread};
use super::types::{FinishedThread, RawMessageRecord, ThreadKey};

/// Finished threads (sorted by key) and the run report.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub threads: Vec<FinishedThread>,
    pub report: ReconcileReport,
}

/// Feeds records one at a time into thread buckets, then finalizes them all.
pub struct Reconciler {
    normalizer: Normalizer,
    grouper: ThreadGrouper,
    report: ReconcileReport,
}

impl Reconciler {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            grouper: ThreadGrouper::new(),
            report: ReconcileReport::default(),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Resolve one record and add it to its bucket. Returns the bucket key.
    pub fn ingest(&mut self, record: RawMessageRecord) -> ThreadKey {
        self.report.records_seen += 1;
        let resolution = resolve_direction(record, &self.normalizer);
        if let Some(warning) = resolution.warning {
            warn!("{}", warning);
            self.report.warnings.push(warning);
        }
        self.grouper.push(resolution.message)
    }

    /// Count a record the upstream parser could not decode.
    pub fn ingest_unparsable(&mut self, source: &str, error: &str) {
        warn!("Failed to parse {}: {}", source, error);
        self.report.records_seen += 1;
        self.report.records_unparsable += 1;
        self.report.unparsable_sources.push(source.to_string());
    }

    /// Finalize every bucket. Buckets are independent at this point, so they
    /// are processed in parallel and re-sorted by key afterwards.
    pub fn finish(self) -> Reconciliation {
        let Self {
            normalizer,
            grouper,
            mut report,
        } = self;

        report.messages_total = grouper.message_count();

        let outcomes: Vec<ThreadOutcome> = grouper
            .into_threads()
            .into_par_iter()
            .map(|thread| finalize_thread(thread, &normalizer))
            .collect();

        let mut threads = Vec::new();
        for outcome in outcomes {
            match outcome {
                ThreadOutcome::Written(thread) => {
                    report.record_written(&thread);
                    threads.push(thread);
                }
                ThreadOutcome::Skipped(skipped) => {
                    debug!(
                        "Skipped {} -> {} ({} msg)",
                        skipped.thread_key, skipped.reason, skipped.message_count
                    );
                    report.record_skipped(skipped);
                }
            }
        }

        threads.sort_by(|a, b| a.thread_key.cmp(&b.thread_key).then_with(|| a.bucket_key.cmp(&b.bucket_key)));

        Reconciliation { threads, report }
    }
}

/// Reconcile a complete batch of records.
pub fn reconcile<I>(records: I, normalizer: Normalizer) -> Reconciliation
where
    I: IntoIterator<Item = RawMessageRecord>,
{
    let mut reconciler = Reconciler::new(normalizer);
    for record in records {
        reconciler.ingest(record);
    }
    reconciler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::report::SkipReason;
    use crate::mail::types::{Direction, ThreadKind, TypeHint};
    use std::collections::HashMap;

    fn normalizer() -> Normalizer {
        Normalizer::new(&["9412660605"], &HashMap::new()).unwrap()
    }

    fn record(from: &str, to: &str, id: Option<&str>, ts: i64, body: &str) -> RawMessageRecord {
        RawMessageRecord {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            message_id: id.map(str::to_string),
            timestamp_ms: ts,
            body: body.to_string(),
            source: format!("{}-{}.eml", ts, body),
            ..Default::default()
        }
    }

    #[test]
    fn test_resend_collapses_to_one_inbound_message() {
        let a = record(
            "+14075551234@unknown.email",
            "+19412660605@unknown.email",
            None,
            1000,
            "hi",
        );
        let b = a.clone();
        let mut reconciler = Reconciler::new(normalizer());
        assert_eq!(reconciler.ingest(a).as_str(), "4075551234");
        assert_eq!(reconciler.ingest(b).as_str(), "4075551234");
        let result = reconciler.finish();

        // one surviving message means the thread is excluded, but the
        // bucket itself held exactly that one inbound message
        assert!(result.threads.is_empty());
        assert_eq!(result.report.duplicates_removed, 1);
        let skipped = &result.report.skipped[0];
        assert_eq!(skipped.thread_key.as_str(), "4075551234");
        assert_eq!(skipped.message_count, 1);
        assert_eq!(skipped.reason, SkipReason::SingleMessageThread);
        assert!(result.report.is_balanced());
    }

    #[test]
    fn test_resend_with_reply_keeps_one_inbound() {
        let a = record(
            "+14075551234@unknown.email",
            "+19412660605@unknown.email",
            None,
            1000,
            "hi",
        );
        let reply = record(
            "+19412660605@unknown.email",
            "+14075551234@unknown.email",
            None,
            2000,
            "hey",
        );
        let result = reconcile(vec![a.clone(), a, reply], normalizer());
        assert_eq!(result.threads.len(), 1);
        let thread = &result.threads[0];
        assert_eq!(thread.thread_key.as_str(), "4075551234");
        let inbound: Vec<_> = thread
            .messages
            .iter()
            .filter(|m| m.direction == Direction::Inbound)
            .collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].body, "hi");
        assert_eq!(thread.deduplicated_messages_removed, 1);
    }

    #[test]
    fn test_three_party_thread_is_group() {
        let records = vec![
            record("A@x.com", "9412660605, B@x.com", Some("1"), 1, "one"),
            record("B@x.com", "A@x.com, 9412660605", Some("2"), 2, "two"),
            record("9412660605", "A@x.com, B@x.com", Some("3"), 3, "three"),
        ];
        let result = reconcile(records, normalizer());
        assert_eq!(result.threads.len(), 1);
        let thread = &result.threads[0];
        assert_eq!(thread.thread_key.as_str(), "a@x.com_b@x.com");
        assert_eq!(thread.participants.len(), 2);
        assert_eq!(thread.kind, ThreadKind::Group);
        assert_eq!(thread.messages.len(), 3);
    }

    #[test]
    fn test_short_code_thread_skipped_entirely() {
        let records: Vec<_> = (0..5)
            .map(|i| {
                let mut r = record("5898@unknown.email", "9412660605", Some(&i.to_string()), i, "code");
                r.type_hint = Some(TypeHint::Inbound);
                r
            })
            .collect();
        let mut valid = vec![
            record("4075551234", "9412660605", Some("x"), 10, "a"),
            record("9412660605", "4075551234", Some("y"), 11, "b"),
        ];
        valid.extend(records);

        let result = reconcile(valid, normalizer());
        assert_eq!(result.threads.len(), 1);
        assert_eq!(result.report.skipped_for(SkipReason::ImproperCounterpart), 1);
        assert_eq!(result.report.messages_skipped, 5);
        assert_eq!(result.report.messages_skipped_by_reason[&SkipReason::ImproperCounterpart], 5);
        assert_eq!(result.report.threads_written, 1);
        assert_eq!(result.report.messages_written, 2);
        assert!(result.report.is_balanced());
    }

    #[test]
    fn test_ambiguous_records_warn_but_continue() {
        let records = vec![
            record("a@x.com", "b@x.com", Some("1"), 1, "x"),
            record("b@x.com", "a@x.com", Some("2"), 2, "y"),
        ];
        let result = reconcile(records, normalizer());
        assert_eq!(result.report.warnings.len(), 2);
        assert_eq!(result.report.records_seen, 2);
        assert_eq!(result.threads.len(), 1);
    }

    #[test]
    fn test_unparsable_records_counted() {
        let mut reconciler = Reconciler::new(normalizer());
        reconciler.ingest_unparsable("broken.eml", "not a message");
        reconciler.ingest(record("4075551234", "9412660605", Some("1"), 1, "x"));
        let result = reconciler.finish();
        assert_eq!(result.report.records_seen, 2);
        assert_eq!(result.report.records_unparsable, 1);
        assert_eq!(result.report.unparsable_sources, vec!["broken.eml".to_string()]);
        assert_eq!(result.report.messages_total, 1);
    }
}
