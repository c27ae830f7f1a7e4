pub mod backup;
pub mod bundle;
pub mod init;
pub mod reconcile;
pub mod run;
pub mod scan;
pub mod status;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::error::{MailroomError, Result};
use crate::models::AggregateKey;
use crate::settings::{self, PipelineConfig, ScanConfig, Settings};

#[derive(Parser)]
#[command(
    name = "mailroom",
    about = "Reconcile invoices, statements and a client roster into per-client delivery bundles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Source-location flags shared by the commands that read the three inputs.
/// Anything not given falls back to the saved settings.
#[derive(Args, Clone, Default)]
pub struct SourceOverrides {
    /// Data directory containing mailroom.db
    #[arg(long = "data-dir")]
    pub data_dir: Option<String>,
    /// Client directory file (.csv or .xlsx)
    #[arg(long)]
    pub roster: Option<String>,
    /// Folder scanned for invoice documents
    #[arg(long = "invoice-root")]
    pub invoice_root: Option<String>,
    /// Folder scanned for statement-of-account documents
    #[arg(long = "soa-root")]
    pub soa_root: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save source locations and initialize the ledger database.
    Init {
        /// Data directory for the ledger (default: ~/Documents/mailroom)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Client directory file (.csv or .xlsx)
        #[arg(long)]
        roster: Option<String>,
        /// Folder scanned for invoice documents
        #[arg(long = "invoice-root")]
        invoice_root: Option<String>,
        /// Folder scanned for statement-of-account documents
        #[arg(long = "soa-root")]
        soa_root: Option<String>,
    },
    /// Rebuild the ledger from the roster and both document folders.
    Scan {
        #[command(flatten)]
        sources: SourceOverrides,
    },
    /// Preview per-client matches for a billing period.
    Reconcile {
        /// Billing period: YYYY-MM
        #[arg(long)]
        period: String,
        /// Grouping: head_office or customer_number
        #[arg(long = "aggregate-by")]
        aggregate_by: Option<String>,
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Reconcile a period and write one zip archive per client group.
    Bundle {
        /// Billing period: YYYY-MM
        #[arg(long)]
        period: String,
        /// Grouping: head_office or customer_number
        #[arg(long = "aggregate-by")]
        aggregate_by: Option<String>,
        /// Output directory for archives (default: <data_dir>/bundles)
        #[arg(long)]
        output: Option<String>,
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Full pipeline: scan, reconcile, bundle and hand shipments to the
    /// dispatcher (dry run; nothing is sent).
    Run {
        /// Billing period: YYYY-MM
        #[arg(long)]
        period: String,
        /// Grouping: head_office or customer_number
        #[arg(long = "aggregate-by")]
        aggregate_by: Option<String>,
        /// Output directory for archives (default: <data_dir>/bundles)
        #[arg(long)]
        output: Option<String>,
        #[command(flatten)]
        sources: SourceOverrides,
    },
    /// Show ledger location and row counts.
    Status {
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Back up the ledger database.
    Backup {
        /// Output path (default: <data_dir>/backups/mailroom-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
}

pub(crate) fn print_warnings<T: std::fmt::Display>(warnings: &[T]) {
    for warning in warnings {
        eprintln!("{} {warning}", "warning:".yellow());
    }
}

pub(crate) fn resolve_data_dir(flag: Option<&str>, settings: &Settings) -> PathBuf {
    PathBuf::from(flag.map(|d| d.to_string()).unwrap_or_else(|| settings.data_dir.clone()))
}

pub(crate) fn resolve_aggregate(flag: Option<&str>, settings: &Settings) -> Result<AggregateKey> {
    let raw = flag.map(|a| a.to_string()).unwrap_or_else(|| settings.aggregate_by.clone());
    AggregateKey::parse(&raw).ok_or_else(|| {
        MailroomError::Settings(format!(
            "invalid aggregate key {raw:?}: expected head_office or customer_number"
        ))
    })
}

fn required_path(flag: Option<&str>, saved: &str, what: &str, hint: &str) -> Result<PathBuf> {
    let raw = flag.map(|p| p.to_string()).unwrap_or_else(|| saved.to_string());
    if raw.trim().is_empty() {
        return Err(MailroomError::Settings(format!(
            "{what} is not configured; pass {hint} or run mailroom init"
        )));
    }
    Ok(PathBuf::from(raw))
}

pub(crate) fn resolve_scan_config(sources: &SourceOverrides) -> Result<ScanConfig> {
    let settings = settings::load_settings();
    let data_dir = resolve_data_dir(sources.data_dir.as_deref(), &settings);
    Ok(ScanConfig {
        db_path: settings::db_path(&data_dir),
        roster_path: required_path(
            sources.roster.as_deref(),
            &settings.roster_path,
            "roster file",
            "--roster",
        )?,
        invoice_root: required_path(
            sources.invoice_root.as_deref(),
            &settings.invoice_root,
            "invoice folder",
            "--invoice-root",
        )?,
        soa_root: required_path(
            sources.soa_root.as_deref(),
            &settings.soa_root,
            "statement folder",
            "--soa-root",
        )?,
        invoice_pattern: settings.patterns.invoice_file.clone(),
        soa_pattern: settings.patterns.soa_file.clone(),
        date_patterns: settings.patterns.dates.clone(),
        extraction: settings.extraction.clone(),
    })
}

pub(crate) fn resolve_bundle_dir(
    flag: Option<&str>,
    settings: &Settings,
    data_dir: &std::path::Path,
) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if !settings.bundle_dir.trim().is_empty() {
        return PathBuf::from(&settings.bundle_dir);
    }
    data_dir.join("bundles")
}

pub(crate) fn resolve_pipeline_config(
    sources: &SourceOverrides,
    period: &str,
    aggregate_by: Option<&str>,
    output: Option<&str>,
) -> Result<PipelineConfig> {
    let settings = settings::load_settings();
    let data_dir = resolve_data_dir(sources.data_dir.as_deref(), &settings);
    Ok(PipelineConfig {
        scan: resolve_scan_config(sources)?,
        bundle_dir: resolve_bundle_dir(output, &settings, &data_dir),
        period: settings::parse_period(period)?,
        aggregate_by: resolve_aggregate(aggregate_by, &settings)?,
    })
}
