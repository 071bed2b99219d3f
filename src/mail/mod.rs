pub mod backup;
pub mod client;
pub mod dedup;
pub mod direction;
pub mod identity;
pub mod participants;
pub mod reconcile;
pub mod report;
pub mod threading;
pub mod types;

pub use backup::{BackupScan, parse_sms_backup, parse_sms_backup_file};
pub use client::{ScanFailure, collect_eml_paths, collect_xml_paths, parse_eml_bytes, parse_eml_file, scan_eml_files};
pub use direction::{AmbiguityWarning, Evidence, Resolution, resolve_direction};
pub use identity::Normalizer;
pub use reconcile::{Reconciler, Reconciliation, reconcile};
pub use report::{ReconcileReport, SkipReason, SkippedThread, WrittenThread};
pub use threading::{Thread, ThreadGrouper, ThreadOutcome, finalize_thread, provisional_key};
pub use types::*;
