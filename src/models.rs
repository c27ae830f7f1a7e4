use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum number of recipient addresses carried per client row.
pub const MAX_RECIPIENTS: usize = 5;

/// Derive the billing period string (`YYYY-MM`) from a document date.
pub fn period_of(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRow {
    pub customer_number: String,
    pub head_office: String,
    pub head_office_name: Option<String>,
    /// Non-empty, deduplicated, order-preserving; at most [`MAX_RECIPIENTS`].
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub invoice_no: String,
    pub customer_number: String,
    pub ship_name: String,
    pub file_path: String,
    pub invoice_date: Option<NaiveDate>,
    /// `YYYY-MM`, derived from `invoice_date`; None when extraction failed.
    pub period: Option<String>,
    pub sent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Soa {
    pub head_office: String,
    pub head_office_name: Option<String>,
    pub file_path: String,
    pub soa_date: Option<NaiveDate>,
    pub period: Option<String>,
    pub sent: bool,
}

/// Grouping dimension for reconciliation and bundling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKey {
    HeadOffice,
    CustomerNumber,
}

impl AggregateKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "head_office" => Some(Self::HeadOffice),
            "customer_number" => Some(Self::CustomerNumber),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeadOffice => "head_office",
            Self::CustomerNumber => "customer_number",
        }
    }
}

/// One reconciled group for a billing period: the invoices to deliver,
/// the statement of account (if any), and who receives them.
#[derive(Debug, Clone)]
pub struct ClientBundleMatch {
    pub aggregate_key: String,
    pub head_office: String,
    pub head_office_name: String,
    pub period: String,
    pub invoices: Vec<Invoice>,
    pub soa: Option<Soa>,
    pub recipients: Vec<String>,
}

/// Output unit handed to the mailing collaborator: one archive per aggregate.
#[derive(Debug, Clone)]
pub struct ShipmentRecord {
    pub aggregate_key: String,
    pub archive_path: PathBuf,
    pub recipients: Vec<String>,
    pub head_office_name: String,
    pub period: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityDiff {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed == 0
    }
}

/// Summary of a ledger rebuild: per-entity row movement plus how many
/// imported rows overwrote an earlier row with the same unique key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub clients: EntityDiff,
    pub invoices: EntityDiff,
    pub soa: EntityDiff,
    pub duplicate_upserts: usize,
}

impl ChangeReport {
    pub fn is_unchanged(&self) -> bool {
        self.clients.is_empty() && self.invoices.is_empty() && self.soa.is_empty()
    }

    pub fn render(&self) -> String {
        let line = |name: &str, d: &EntityDiff| {
            format!("{name}: {} added, {} removed, {} changed", d.added, d.removed, d.changed)
        };
        let mut out = vec![
            line("clients", &self.clients),
            line("invoices", &self.invoices),
            line("soa", &self.soa),
        ];
        if self.duplicate_upserts > 0 {
            out.push(format!("{} duplicate key(s) overwritten on import", self.duplicate_upserts));
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_of() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 12).unwrap();
        assert_eq!(period_of(date), "2024-05");
        let date = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert_eq!(period_of(date), "2025-11");
    }

    #[test]
    fn test_aggregate_key_parse() {
        assert_eq!(AggregateKey::parse("head_office"), Some(AggregateKey::HeadOffice));
        assert_eq!(AggregateKey::parse(" CUSTOMER_NUMBER "), Some(AggregateKey::CustomerNumber));
        assert_eq!(AggregateKey::parse("ship_name"), None);
    }

    #[test]
    fn test_change_report_unchanged() {
        let report = ChangeReport::default();
        assert!(report.is_unchanged());
        let report = ChangeReport {
            invoices: EntityDiff { added: 1, removed: 0, changed: 0 },
            ..Default::default()
        };
        assert!(!report.is_unchanged());
    }

    #[test]
    fn test_change_report_render_mentions_duplicates() {
        let report = ChangeReport { duplicate_upserts: 2, ..Default::default() };
        assert!(report.render().contains("2 duplicate key(s)"));
    }
}
