use std::path::{Path, PathBuf};

use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use walkdir::WalkDir;

use crate::error::Result;
use crate::extract::{ExtractionStrategy, INVOICE_DATE_FIELD, SOA_DATE_FIELD};
use crate::models::{period_of, Invoice, Soa};

/// Row- and file-level faults the scan recovers from locally.
#[derive(Debug, Clone)]
pub enum ScanWarning {
    PatternMismatch {
        path: PathBuf,
    },
    ExtractionFailure {
        path: PathBuf,
        field: &'static str,
        message: String,
    },
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PatternMismatch { path } => {
                write!(f, "{}: file name matches no configured pattern", path.display())
            }
            Self::ExtractionFailure { path, field, message } => {
                write!(f, "{}: could not extract {field}: {message}", path.display())
            }
        }
    }
}

/// Compiled per-document-class filename patterns. Matching is anchored by the
/// pattern itself and always case-insensitive.
pub struct FilePatterns {
    pub invoice: Regex,
    pub soa: Regex,
}

impl FilePatterns {
    pub fn compile(invoice: &str, soa: &str) -> Result<Self> {
        Ok(Self {
            invoice: RegexBuilder::new(invoice).case_insensitive(true).build()?,
            soa: RegexBuilder::new(soa).case_insensitive(true).build()?,
        })
    }
}

pub struct ScanOutcome<T> {
    pub records: Vec<T>,
    pub warnings: Vec<ScanWarning>,
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "scan root is not a directory");
        return Vec::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Discover invoice documents under `root`. One unreadable or misnamed file
/// never aborts the batch: it becomes a warning and the scan continues.
pub fn scan_invoices(
    root: &Path,
    pattern: &Regex,
    extraction: &ExtractionStrategy,
) -> ScanOutcome<Invoice> {
    let mut warnings = Vec::new();
    let mut matched = Vec::new();

    for path in walk_files(root) {
        let name = file_name_of(&path);
        let caps = match pattern.captures(&name) {
            Some(caps) => caps,
            None => {
                warnings.push(ScanWarning::PatternMismatch { path });
                continue;
            }
        };
        match (caps.name("customer"), caps.name("invoice_no"), caps.name("ship")) {
            (Some(customer), Some(invoice_no), Some(ship)) => {
                matched.push((
                    path.clone(),
                    customer.as_str().to_string(),
                    invoice_no.as_str().to_string(),
                    ship.as_str().to_string(),
                ));
            }
            _ => warnings.push(ScanWarning::PatternMismatch { path }),
        }
    }

    let extracted: Vec<(Invoice, Option<ScanWarning>)> = matched
        .into_par_iter()
        .map(|(path, customer_number, invoice_no, ship_name)| {
            let (date, failure) = extraction.date_for(&path, INVOICE_DATE_FIELD);
            let warning = failure.map(|message| {
                tracing::warn!(path = %path.display(), %message, "invoice date extraction failed");
                ScanWarning::ExtractionFailure {
                    path: path.clone(),
                    field: INVOICE_DATE_FIELD,
                    message,
                }
            });
            let invoice = Invoice {
                invoice_no,
                customer_number,
                ship_name,
                file_path: path.to_string_lossy().into_owned(),
                invoice_date: date,
                period: date.map(period_of),
                sent: false,
            };
            (invoice, warning)
        })
        .collect();

    let mut records = Vec::with_capacity(extracted.len());
    for (invoice, warning) in extracted {
        records.push(invoice);
        if let Some(warning) = warning {
            warnings.push(warning);
        }
    }
    ScanOutcome { records, warnings }
}

/// Discover statement-of-account documents under `root`.
pub fn scan_soa(root: &Path, pattern: &Regex, extraction: &ExtractionStrategy) -> ScanOutcome<Soa> {
    let mut warnings = Vec::new();
    let mut matched = Vec::new();

    for path in walk_files(root) {
        let name = file_name_of(&path);
        let caps = match pattern.captures(&name) {
            Some(caps) => caps,
            None => {
                warnings.push(ScanWarning::PatternMismatch { path });
                continue;
            }
        };
        match caps.name("head_office") {
            Some(head_office) => {
                let head_office_name = caps
                    .name("name")
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty());
                matched.push((path.clone(), head_office.as_str().to_string(), head_office_name));
            }
            None => warnings.push(ScanWarning::PatternMismatch { path }),
        }
    }

    let extracted: Vec<(Soa, Option<ScanWarning>)> = matched
        .into_par_iter()
        .map(|(path, head_office, head_office_name)| {
            let (date, failure) = extraction.date_for(&path, SOA_DATE_FIELD);
            let warning = failure.map(|message| {
                tracing::warn!(path = %path.display(), %message, "statement date extraction failed");
                ScanWarning::ExtractionFailure {
                    path: path.clone(),
                    field: SOA_DATE_FIELD,
                    message,
                }
            });
            let soa = Soa {
                head_office,
                head_office_name,
                file_path: path.to_string_lossy().into_owned(),
                soa_date: date,
                period: date.map(period_of),
                sent: false,
            };
            (soa, warning)
        })
        .collect();

    let mut records = Vec::with_capacity(extracted.len());
    for (soa, warning) in extracted {
        records.push(soa);
        if let Some(warning) = warning {
            warnings.push(warning);
        }
    }
    ScanOutcome { records, warnings }
}
