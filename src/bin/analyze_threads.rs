use std::collections::HashMap;
use std::path::PathBuf;

use smsthreads::config::Config;
use smsthreads::mail::{Reconciler, ThreadKind, collect_eml_paths, scan_eml_files};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(dir) = args.next() else {
        eprintln!("usage: analyze_threads <eml dir> [self identifier...]");
        std::process::exit(2);
    };
    let self_ids: Vec<String> = args.collect();

    let mut config = Config::load();
    config.merge_cli(&self_ids, &[])?;
    let normalizer = config.normalizer()?;

    let dir = PathBuf::from(shellexpand::tilde(&dir).into_owned());
    println!("Scanning...");
    let paths = collect_eml_paths(&[dir]);
    let results = scan_eml_files(&paths, |_, _| {});
    println!("Total files: {}", paths.len());

    let mut reconciler = Reconciler::new(normalizer);
    let mut message_ids: HashMap<String, usize> = HashMap::new();
    let mut no_mid = 0;
    for result in results {
        match result {
            Ok(record) => {
                match record.message_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
                    Some(mid) => *message_ids.entry(mid.to_string()).or_default() += 1,
                    None => no_mid += 1,
                }
                reconciler.ingest(record);
            }
            Err(failure) => {
                reconciler.ingest_unparsable(&failure.source.to_string_lossy(), &failure.error.to_string())
            }
        }
    }
    let reconciliation = reconciler.finish();
    let report = &reconciliation.report;

    println!("\nThreaded results:");
    println!("  Messages bucketed: {}", report.messages_total);
    println!("  Threads: {}", report.threads_total);
    println!("  Written: {}", report.threads_written);
    println!(
        "  Groups: {}",
        reconciliation
            .threads
            .iter()
            .filter(|t| t.kind == ThreadKind::Group)
            .count()
    );

    let mut thread_sizes: Vec<(usize, &str)> = reconciliation
        .threads
        .iter()
        .map(|t| (t.message_count(), t.thread_label.as_str()))
        .collect();
    thread_sizes.sort_by(|a, b| b.0.cmp(&a.0));

    println!("\nThread size distribution (written threads):");
    println!(
        "  2-5 messages: {}",
        thread_sizes.iter().filter(|(s, _)| (2..=5).contains(s)).count()
    );
    println!(
        "  6-10 messages: {}",
        thread_sizes.iter().filter(|(s, _)| (6..=10).contains(s)).count()
    );
    println!(
        "  11-50 messages: {}",
        thread_sizes.iter().filter(|(s, _)| (11..=50).contains(s)).count()
    );
    println!("  50+ messages: {}", thread_sizes.iter().filter(|(s, _)| *s > 50).count());

    println!("\nTop 20 largest threads:");
    for (i, (size, label)) in thread_sizes.iter().take(20).enumerate() {
        let truncated: String = label.chars().take(50).collect();
        println!("  {:2}. {:4} msgs - {}", i + 1, size, truncated);
    }

    println!("\n--- Checking for issues ---");
    for (reason, count) in &report.threads_skipped_by_reason {
        println!(
            "Skipped ({}): {} threads, {} messages",
            reason,
            count,
            report.messages_skipped_by_reason.get(reason).copied().unwrap_or(0)
        );
    }
    println!("Duplicates removed: {}", report.duplicates_removed);

    let duplicates: Vec<_> = message_ids.iter().filter(|&(_, count)| *count > 1).collect();
    println!("Repeated message-ids: {}", duplicates.len());
    for (mid, count) in duplicates.iter().take(5) {
        let short: String = mid.chars().take(60).collect();
        println!("  {} appears {} times", short, count);
    }
    println!("Messages without message-id: {}", no_mid);
    println!("Unparsable files: {}", report.records_unparsable);
    println!("Direction warnings: {}", report.warnings.len());
    for warning in report.warnings.iter().take(5) {
        println!("  {}", warning);
    }

    Ok(())
}
