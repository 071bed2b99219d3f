use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smsthreads::config::Config;
use smsthreads::mail::{Reconciler, collect_eml_paths, collect_xml_paths, parse_sms_backup_file, scan_eml_files};
use smsthreads::output::ThreadWriter;

#[derive(Parser)]
#[command(name = "smsthreads")]
#[command(version, about = "Combine exported SMS/MMS messages into one file per conversation")]
struct Cli {
    /// .eml files, SMS Backup & Restore .xml files, or directories to scan (recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory (default: smsthreads_<YYMMDD_HHMMSS>)
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// One of your own phone numbers or addresses (repeatable)
    #[arg(long = "self", value_name = "IDENT")]
    self_identifiers: Vec<String>,

    /// Display name for a number or address, as NUMBER=NAME (repeatable)
    #[arg(long = "alias", value_name = "NUMBER=NAME")]
    aliases: Vec<String>,

    /// Write only JSON, no combined .eml per thread
    #[arg(long)]
    no_eml: bool,

    /// Config file (default: ~/.config/smsthreads/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load(),
    };
    config.merge_cli(&cli.self_identifiers, &cli.aliases)?;
    if config.self_identifiers.is_empty() {
        warn!("No self identifiers given; direction falls back to export hints only");
    }
    let normalizer = config.normalizer()?;

    let paths = collect_eml_paths(&cli.inputs);
    let backups = collect_xml_paths(&cli.inputs);
    if paths.is_empty() && backups.is_empty() {
        bail!("No .eml or .xml files found in the given inputs");
    }
    let files_input = paths.len() + backups.len();
    info!("Scanning {} .eml files and {} backups", paths.len(), backups.len());

    let every = config.scan.progress_every.max(1);
    let results = scan_eml_files(&paths, |current, total| {
        if current % every == 0 || current == total {
            info!("Parsed {}/{}", current, total);
        }
    });

    let mut reconciler = Reconciler::new(normalizer);
    let self_address = reconciler.normalizer().self_phone_address();
    for path in &backups {
        match parse_sms_backup_file(path, self_address.as_deref()) {
            Ok(scan) => {
                info!(
                    "{}: {} messages ({} MMS and {} drafts/failed skipped)",
                    path.display(),
                    scan.records.len(),
                    scan.mms_skipped,
                    scan.untyped_skipped
                );
                for record in scan.records {
                    reconciler.ingest(record);
                }
            }
            Err(e) => reconciler.ingest_unparsable(&path.to_string_lossy(), &format!("{:#}", e)),
        }
    }
    for result in results {
        match result {
            Ok(record) => {
                reconciler.ingest(record);
            }
            Err(failure) => {
                reconciler.ingest_unparsable(&failure.source.to_string_lossy(), &format!("{:#}", failure.error))
            }
        }
    }
    let reconciliation = reconciler.finish();

    let outdir = cli
        .outdir
        .or_else(|| config.output_dir())
        .unwrap_or_else(|| PathBuf::from(format!("smsthreads_{}", Local::now().format("%y%m%d_%H%M%S"))));

    let mut writer = ThreadWriter::new(&outdir, config.output.max_filename_len, config.output.pretty)
        .with_context(|| format!("creating {}", outdir.display()))?
        .with_eml(config.output.eml && !cli.no_eml);
    for thread in &reconciliation.threads {
        writer.write_thread(thread)?;
    }
    let report_path = writer.write_report(&reconciliation.report, files_input)?;

    let report = &reconciliation.report;
    if !report.is_balanced() {
        warn!(
            "Message accounting mismatch: {} total vs {} written + {} skipped + {} duplicates",
            report.messages_total, report.messages_written, report.messages_skipped, report.duplicates_removed
        );
    }

    println!("Input files:          {}", files_input);
    println!("Unparsable:           {}", report.records_unparsable);
    println!("Threads written:      {}", report.threads_written);
    println!("Threads skipped:      {}", report.threads_skipped);
    for (reason, count) in &report.threads_skipped_by_reason {
        println!("  {:<20}{}", reason.to_string(), count);
    }
    println!("Messages written:     {}", report.messages_written);
    println!("Duplicates removed:   {}", report.duplicates_removed);
    println!("Direction warnings:   {}", report.warnings.len());
    println!(
        "Files written:        {} JSON, {} EML",
        writer.written().len(),
        writer.written().iter().filter(|f| f.eml.is_some()).count()
    );
    println!("Output:               {}", outdir.display());
    println!("Report:               {}", report_path.display());

    Ok(())
}
