use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MailroomError, Result};
use crate::models::AggregateKey;

pub const DB_FILENAME: &str = "mailroom.db";

// Invoice filenames look like "C1 invoice 100 shipA.pdf", statements like
// "Statement H1 Acme.pdf". Both are matched case-insensitively.
fn default_invoice_pattern() -> String {
    r"^(?P<customer>\S+)\s+invoice\s+(?P<invoice_no>\S+)\s+(?P<ship>.+)\.pdf$".to_string()
}

fn default_soa_pattern() -> String {
    r"^statement\s+(?P<head_office>\S+)\s+(?P<name>.+)\.pdf$".to_string()
}

fn default_date_patterns() -> Vec<String> {
    vec![
        r"\b\d{4}[-/]\d{1,2}[-/]\d{1,2}\b".to_string(),
        r"\b\d{1,2}[-/]\d{1,2}[-/](?:\d{2}|\d{4})\b".to_string(),
    ]
}

fn default_aggregate_by() -> String {
    "head_office".to_string()
}

fn default_primary_strategy() -> String {
    "pdf_text".to_string()
}

fn default_fallback_strategy() -> String {
    "filename".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patterns {
    #[serde(default = "default_invoice_pattern")]
    pub invoice_file: String,
    #[serde(default = "default_soa_pattern")]
    pub soa_file: String,
    #[serde(default = "default_date_patterns")]
    pub dates: Vec<String>,
}

impl Default for Patterns {
    fn default() -> Self {
        Self {
            invoice_file: default_invoice_pattern(),
            soa_file: default_soa_pattern(),
            dates: default_date_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Strategy name: "pdf_text" or "filename".
    #[serde(default = "default_primary_strategy")]
    pub primary: String,
    /// Strategy name, or "none" to disable the fallback attempt.
    #[serde(default = "default_fallback_strategy")]
    pub fallback: String,
    /// Zero-based page the date is read from.
    #[serde(default)]
    pub page_index: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            primary: default_primary_strategy(),
            fallback: default_fallback_strategy(),
            page_index: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default)]
    pub roster_path: String,
    #[serde(default)]
    pub invoice_root: String,
    #[serde(default)]
    pub soa_root: String,
    /// Where archives are written; defaults to `<data_dir>/bundles`.
    #[serde(default)]
    pub bundle_dir: String,
    #[serde(default = "default_aggregate_by")]
    pub aggregate_by: String,
    #[serde(default)]
    pub patterns: Patterns,
    #[serde(default)]
    pub extraction: ExtractionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            roster_path: String::new(),
            invoice_root: String::new(),
            soa_root: String::new(),
            bundle_dir: String::new(),
            aggregate_by: default_aggregate_by(),
            patterns: Patterns::default(),
            extraction: ExtractionSettings::default(),
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("mailroom")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("mailroom")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| MailroomError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn get_data_dir() -> PathBuf {
    PathBuf::from(&load_settings().data_dir)
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILENAME)
}

/// Everything a ledger refresh needs: where the sources live and how to
/// read them. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub db_path: PathBuf,
    pub roster_path: PathBuf,
    pub invoice_root: PathBuf,
    pub soa_root: PathBuf,
    pub invoice_pattern: String,
    pub soa_pattern: String,
    pub date_patterns: Vec<String>,
    pub extraction: ExtractionSettings,
}

/// A full pipeline run: ledger refresh plus the reconciliation target.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scan: ScanConfig,
    pub bundle_dir: PathBuf,
    /// `YYYY-MM`.
    pub period: String,
    pub aggregate_by: AggregateKey,
}

/// Validate and normalize a `YYYY-MM` period argument.
pub fn parse_period(raw: &str) -> Result<String> {
    let parts: Vec<&str> = raw.trim().split('-').collect();
    if parts.len() == 2 {
        if let (Ok(year), Ok(month)) = (parts[0].parse::<i32>(), parts[1].parse::<u32>()) {
            if (1..=12).contains(&month) && parts[0].len() == 4 {
                return Ok(format!("{year}-{month:02}"));
            }
        }
    }
    Err(MailroomError::Settings(format!(
        "invalid period {raw:?}: expected YYYY-MM"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings {
            data_dir: "/tmp/mailroom".to_string(),
            roster_path: "/tmp/clients.xlsx".to_string(),
            aggregate_by: "customer_number".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let loaded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/mailroom");
        assert_eq!(loaded.roster_path, "/tmp/clients.xlsx");
        assert_eq!(loaded.aggregate_by, "customer_number");
        assert_eq!(loaded.patterns.dates.len(), 2);
    }

    #[test]
    fn test_partial_settings_merge_with_defaults() {
        let json = r#"{"data_dir": "/tmp/x"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.aggregate_by, "head_office");
        assert!(s.patterns.invoice_file.contains("invoice"));
        assert_eq!(s.extraction.primary, "pdf_text");
        assert_eq!(s.extraction.fallback, "filename");
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("2024-05").unwrap(), "2024-05");
        assert_eq!(parse_period("2024-5").unwrap(), "2024-05");
        assert!(parse_period("2024-13").is_err());
        assert!(parse_period("24-05").is_err());
        assert!(parse_period("May 2024").is_err());
    }
}
