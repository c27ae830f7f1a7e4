use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

use crate::error::{MailroomError, Result};
use crate::settings::ExtractionSettings;

/// Metadata field requested for invoice documents.
pub const INVOICE_DATE_FIELD: &str = "inv_date";
/// Metadata field requested for statement-of-account documents.
pub const SOA_DATE_FIELD: &str = "soa_date";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExtractError(pub String);

/// Boundary to the document-metadata collaborator. Implementations read one
/// named field from one document; how they do it is their business.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path, field: &str) -> std::result::Result<NaiveDate, ExtractError>;
}

// ---------------------------------------------------------------------------
// Date recognition
// ---------------------------------------------------------------------------

/// Compiled date-matching patterns. The first candidate that parses to a real
/// calendar date wins; ambiguous numeric dates are read day-first.
#[derive(Debug, Clone)]
pub struct DatePatterns {
    patterns: Vec<Regex>,
}

impl DatePatterns {
    pub fn compile(raw: &[String]) -> Result<Self> {
        let mut patterns = Vec::new();
        for pattern in raw {
            match Regex::new(pattern) {
                Ok(re) => patterns.push(re),
                Err(err) => {
                    tracing::warn!(pattern = %pattern, %err, "skipping invalid date pattern");
                }
            }
        }
        if patterns.is_empty() {
            return Err(MailroomError::Settings(
                "no usable date patterns configured".to_string(),
            ));
        }
        Ok(Self { patterns })
    }

    pub fn find_first(&self, text: &str) -> Option<NaiveDate> {
        for pattern in &self.patterns {
            for m in pattern.find_iter(text) {
                if let Some(date) = parse_candidate(m.as_str()) {
                    return Some(date);
                }
            }
        }
        None
    }
}

fn parse_candidate(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.trim().split(['-', '/']).collect();
    if parts.len() != 3 {
        return None;
    }
    let nums: Vec<i64> = parts
        .iter()
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    let (y, m, d) = if parts[0].len() == 4 {
        (nums[0] as i32, nums[1] as u32, nums[2] as u32)
    } else {
        // day-first for 05/04/2024-style candidates
        let mut year = nums[2] as i32;
        if parts[2].len() == 2 {
            year += 2000;
        }
        (year, nums[1] as u32, nums[0] as u32)
    };
    NaiveDate::from_ymd_opt(y, m, d)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Reads the text layer of one page of a PDF and scans it for a date.
pub struct PdfTextExtractor {
    patterns: DatePatterns,
    page_index: usize,
}

impl PdfTextExtractor {
    pub fn new(patterns: DatePatterns, page_index: usize) -> Self {
        Self { patterns, page_index }
    }
}

impl MetadataExtractor for PdfTextExtractor {
    fn extract(&self, path: &Path, field: &str) -> std::result::Result<NaiveDate, ExtractError> {
        let doc = lopdf::Document::load(path)
            .map_err(|e| ExtractError(format!("cannot read {}: {e}", path.display())))?;
        let page_no = (self.page_index + 1) as u32;
        let text = doc
            .extract_text(&[page_no])
            .map_err(|e| ExtractError(format!("no text on page {page_no} of {}: {e}", path.display())))?;
        self.patterns.find_first(&text).ok_or_else(|| {
            ExtractError(format!("no {field} found on page {page_no} of {}", path.display()))
        })
    }
}

/// Scans the file name itself for a date. Used as the fallback when the
/// document text yields nothing, and as the primary strategy for feeds whose
/// filenames are the authoritative source.
pub struct FilenameDateExtractor {
    patterns: DatePatterns,
}

impl FilenameDateExtractor {
    pub fn new(patterns: DatePatterns) -> Self {
        Self { patterns }
    }
}

impl MetadataExtractor for FilenameDateExtractor {
    fn extract(&self, path: &Path, field: &str) -> std::result::Result<NaiveDate, ExtractError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.patterns
            .find_first(&name)
            .ok_or_else(|| ExtractError(format!("no {field} in file name {name:?}")))
    }
}

fn strategy_by_name(
    name: &str,
    patterns: &DatePatterns,
    page_index: usize,
) -> Result<Option<Box<dyn MetadataExtractor>>> {
    match name.trim() {
        "pdf_text" => Ok(Some(Box::new(PdfTextExtractor::new(patterns.clone(), page_index)))),
        "filename" => Ok(Some(Box::new(FilenameDateExtractor::new(patterns.clone())))),
        "none" | "" => Ok(None),
        other => Err(MailroomError::Settings(format!(
            "unknown extraction strategy {other:?}"
        ))),
    }
}

/// Primary strategy plus at most one fallback attempt, as configured.
pub struct ExtractionStrategy {
    primary: Box<dyn MetadataExtractor>,
    fallback: Option<Box<dyn MetadataExtractor>>,
}

impl ExtractionStrategy {
    pub fn new(
        primary: Box<dyn MetadataExtractor>,
        fallback: Option<Box<dyn MetadataExtractor>>,
    ) -> Self {
        Self { primary, fallback }
    }

    pub fn from_settings(settings: &ExtractionSettings, patterns: &DatePatterns) -> Result<Self> {
        let primary = strategy_by_name(&settings.primary, patterns, settings.page_index)?
            .ok_or_else(|| {
                MailroomError::Settings("primary extraction strategy cannot be \"none\"".to_string())
            })?;
        let fallback = strategy_by_name(&settings.fallback, patterns, settings.page_index)?;
        Ok(Self { primary, fallback })
    }

    /// Extract a date, trying the fallback once on primary failure. A total
    /// failure yields `(None, Some(reason))` — the caller keeps the row.
    pub fn date_for(&self, path: &Path, field: &str) -> (Option<NaiveDate>, Option<String>) {
        let primary_err = match self.primary.extract(path, field) {
            Ok(date) => return (Some(date), None),
            Err(err) => err,
        };
        if let Some(fallback) = &self.fallback {
            match fallback.extract(path, field) {
                Ok(date) => return (Some(date), None),
                Err(fallback_err) => {
                    return (None, Some(format!("{primary_err}; fallback: {fallback_err}")));
                }
            }
        }
        (None, Some(primary_err.to_string()))
    }
}
