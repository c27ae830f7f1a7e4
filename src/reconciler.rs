use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use rusqlite::Connection;

use crate::error::Result;
use crate::ledger;
use crate::models::{AggregateKey, ClientBundleMatch, ClientRow, Invoice, Soa};

/// Recoverable anomalies observed while matching. Reported, never fatal.
#[derive(Debug, Clone)]
pub enum ReconcileWarning {
    /// More than one statement matched a group/period; the most recently
    /// dated one was kept.
    AmbiguousSoaMatch {
        head_office: String,
        period: String,
        kept: String,
        discarded: usize,
    },
    /// Invoice whose customer number has no roster row.
    OrphanInvoice {
        invoice_no: String,
        customer_number: String,
    },
}

impl std::fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AmbiguousSoaMatch { head_office, period, kept, discarded } => write!(
                f,
                "head office {head_office}: {discarded} extra statement(s) for {period}, kept {kept}"
            ),
            Self::OrphanInvoice { invoice_no, customer_number } => write!(
                f,
                "invoice {invoice_no}: customer {customer_number} is not in the roster"
            ),
        }
    }
}

pub struct ReconcileOutcome {
    pub matches: Vec<ClientBundleMatch>,
    pub warnings: Vec<ReconcileWarning>,
}

/// Select the period's invoices and group them into per-client bundle
/// matches, joining at most one statement of account per group.
///
/// Matching is by exact period string; rows without a period never qualify.
/// The result is ordered by aggregate key so repeated runs over an unchanged
/// ledger produce identical output.
pub fn reconcile(
    conn: &Connection,
    period: &str,
    aggregate_by: AggregateKey,
) -> Result<ReconcileOutcome> {
    let invoices = ledger::invoices_for_period(conn, period)?;
    let clients = ledger::all_clients(conn)?;
    let by_customer: HashMap<String, &ClientRow> = clients
        .iter()
        .map(|c| (c.customer_number.trim().to_string(), c))
        .collect();

    let mut warnings = Vec::new();
    let mut groups: BTreeMap<String, Vec<Invoice>> = BTreeMap::new();

    for invoice in invoices {
        let customer = invoice.customer_number.trim().to_string();
        let client = by_customer.get(&customer);
        if client.is_none() {
            warnings.push(ReconcileWarning::OrphanInvoice {
                invoice_no: invoice.invoice_no.clone(),
                customer_number: customer.clone(),
            });
            tracing::warn!(invoice_no = %invoice.invoice_no, customer = %customer, "orphan invoice");
        }
        let key = match aggregate_by {
            AggregateKey::CustomerNumber => customer,
            AggregateKey::HeadOffice => match client {
                Some(client) => client.head_office.trim().to_string(),
                // No roster row means no derivable head office; skip.
                None => continue,
            },
        };
        groups.entry(key).or_default().push(invoice);
    }

    let mut matches = Vec::with_capacity(groups.len());
    for (key, mut group_invoices) in groups {
        group_invoices.sort_by(|a, b| a.invoice_no.cmp(&b.invoice_no));

        let group_clients = ledger::clients_by_aggregate_key(conn, aggregate_by, &key)?;
        let head_office = match aggregate_by {
            AggregateKey::HeadOffice => key.clone(),
            AggregateKey::CustomerNumber => group_clients
                .first()
                .map(|c| c.head_office.trim().to_string())
                .unwrap_or_default(),
        };

        let mut recipients: IndexSet<String> = IndexSet::new();
        for client in &group_clients {
            for email in &client.emails {
                recipients.insert(email.clone());
            }
        }

        let soa = if head_office.is_empty() {
            None
        } else {
            let candidates = ledger::soa_for_head_office(conn, &head_office, Some(period))?;
            pick_soa(candidates, &head_office, period, &mut warnings)
        };

        let head_office_name = group_clients
            .iter()
            .find_map(|c| c.head_office_name.clone())
            .or_else(|| soa.as_ref().and_then(|s| s.head_office_name.clone()))
            .unwrap_or_else(|| if head_office.is_empty() { key.clone() } else { head_office.clone() });

        matches.push(ClientBundleMatch {
            aggregate_key: key,
            head_office,
            head_office_name,
            period: period.to_string(),
            invoices: group_invoices,
            soa,
            recipients: recipients.into_iter().collect(),
        });
    }

    Ok(ReconcileOutcome { matches, warnings })
}

/// At most one statement per group: latest extracted date wins, file path
/// breaks remaining ties deterministically.
fn pick_soa(
    mut candidates: Vec<Soa>,
    head_office: &str,
    period: &str,
    warnings: &mut Vec<ReconcileWarning>,
) -> Option<Soa> {
    if candidates.len() > 1 {
        candidates.sort_by(|a, b| {
            b.soa_date
                .cmp(&a.soa_date)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        let kept = candidates[0].file_path.clone();
        let discarded = candidates.len() - 1;
        tracing::warn!(head_office, period, %kept, discarded, "duplicate statements for period");
        warnings.push(ReconcileWarning::AmbiguousSoaMatch {
            head_office: head_office.to_string(),
            period: period.to_string(),
            kept,
            discarded,
        });
    }
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{ClientRow, Invoice, Soa};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn client(customer: &str, head_office: &str, name: Option<&str>, emails: &[&str]) -> ClientRow {
        ClientRow {
            customer_number: customer.to_string(),
            head_office: head_office.to_string(),
            head_office_name: name.map(|n| n.to_string()),
            emails: emails.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn invoice(no: &str, customer: &str, path: &str, period: &str) -> Invoice {
        Invoice {
            invoice_no: no.to_string(),
            customer_number: customer.to_string(),
            ship_name: "SHIP".to_string(),
            file_path: path.to_string(),
            invoice_date: NaiveDate::parse_from_str(&format!("{period}-10"), "%Y-%m-%d").ok(),
            period: Some(period.to_string()),
            sent: false,
        }
    }

    fn soa_dated(head_office: &str, path: &str, period: &str, day: u32) -> Soa {
        Soa {
            head_office: head_office.to_string(),
            head_office_name: Some("Acme".to_string()),
            file_path: path.to_string(),
            soa_date: NaiveDate::parse_from_str(&format!("{period}-{day:02}"), "%Y-%m-%d").ok(),
            period: Some(period.to_string()),
            sent: false,
        }
    }

    fn build_ledger(
        clients: &[ClientRow],
        invoices: &[Invoice],
        soas: &[Soa],
    ) -> (tempfile::TempDir, rusqlite::Connection, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        crate::ledger::rebuild(&db_path, clients, invoices, soas).unwrap();
        let conn = db::get_connection(&db_path).unwrap();
        (dir, conn, db_path)
    }

    #[test]
    fn test_groups_by_head_office_with_soa_and_recipients() {
        let (_dir, conn, _) = build_ledger(
            &[client("C1", "H1", Some("Acme"), &["c1@x.com"])],
            &[invoice("100", "C1", "/inv/a.pdf", "2024-05")],
            &[soa_dated("H1", "/soa/h1.pdf", "2024-05", 28)],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!(m.aggregate_key, "H1");
        assert_eq!(m.head_office_name, "Acme");
        assert_eq!(m.invoices.len(), 1);
        assert_eq!(m.soa.as_ref().unwrap().file_path, "/soa/h1.pdf");
        assert_eq!(m.recipients, vec!["c1@x.com"]);
    }

    #[test]
    fn test_period_exactness() {
        let (_dir, conn, _) = build_ledger(
            &[client("C1", "H1", None, &["c1@x.com"])],
            &[invoice("100", "C1", "/inv/a.pdf", "2024-05")],
            &[],
        );
        let outcome = reconcile(&conn, "2024-06", AggregateKey::HeadOffice).unwrap();
        assert!(outcome.matches.is_empty());
    }

    #[test]
    fn test_customers_under_same_head_office_merge() {
        let (_dir, conn, _) = build_ledger(
            &[
                client("C1", "H1", Some("Acme"), &["a@x.com", "shared@x.com"]),
                client("C2", "H1", Some("Acme"), &["shared@x.com", "b@x.com"]),
            ],
            &[
                invoice("100", "C1", "/inv/a.pdf", "2024-05"),
                invoice("101", "C2", "/inv/b.pdf", "2024-05"),
            ],
            &[],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!(m.invoices.len(), 2);
        // deduplicated, order of first appearance preserved
        assert_eq!(m.recipients, vec!["a@x.com", "shared@x.com", "b@x.com"]);
    }

    #[test]
    fn test_customer_number_grouping_splits_head_office() {
        let (_dir, conn, _) = build_ledger(
            &[
                client("C1", "H1", Some("Acme"), &["a@x.com"]),
                client("C2", "H1", Some("Acme"), &["b@x.com"]),
            ],
            &[
                invoice("100", "C1", "/inv/a.pdf", "2024-05"),
                invoice("101", "C2", "/inv/b.pdf", "2024-05"),
            ],
            &[soa_dated("H1", "/soa/h1.pdf", "2024-05", 28)],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::CustomerNumber).unwrap();
        assert_eq!(outcome.matches.len(), 2);
        // both groups share the head office statement
        for m in &outcome.matches {
            assert_eq!(m.soa.as_ref().unwrap().file_path, "/soa/h1.pdf");
        }
        assert_eq!(outcome.matches[0].aggregate_key, "C1");
        assert_eq!(outcome.matches[0].recipients, vec!["a@x.com"]);
    }

    #[test]
    fn test_ambiguous_soa_keeps_most_recent() {
        let (_dir, conn, _) = build_ledger(
            &[client("C1", "H1", None, &["a@x.com"])],
            &[invoice("100", "C1", "/inv/a.pdf", "2024-05")],
            &[
                soa_dated("H1", "/soa/early.pdf", "2024-05", 5),
                soa_dated("H1", "/soa/late.pdf", "2024-05", 28),
            ],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].soa.as_ref().unwrap().file_path, "/soa/late.pdf");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(
            outcome.warnings[0],
            ReconcileWarning::AmbiguousSoaMatch { discarded: 1, .. }
        ));
    }

    #[test]
    fn test_soa_from_other_period_not_joined() {
        let (_dir, conn, _) = build_ledger(
            &[client("C1", "H1", None, &["a@x.com"])],
            &[invoice("100", "C1", "/inv/a.pdf", "2024-05")],
            &[soa_dated("H1", "/soa/h1.pdf", "2024-04", 28)],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        assert!(outcome.matches[0].soa.is_none());
    }

    #[test]
    fn test_orphan_invoice_skipped_under_head_office_grouping() {
        let (_dir, conn, _) = build_ledger(
            &[client("C1", "H1", None, &["a@x.com"])],
            &[
                invoice("100", "C1", "/inv/a.pdf", "2024-05"),
                invoice("200", "GHOST", "/inv/g.pdf", "2024-05"),
            ],
            &[],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].aggregate_key, "H1");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(outcome.warnings[0], ReconcileWarning::OrphanInvoice { .. }));
    }

    #[test]
    fn test_orphan_invoice_kept_under_customer_grouping() {
        let (_dir, conn, _) = build_ledger(
            &[],
            &[invoice("200", "GHOST", "/inv/g.pdf", "2024-05")],
            &[],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::CustomerNumber).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].aggregate_key, "GHOST");
        assert!(outcome.matches[0].recipients.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_null_period_rows_never_match() {
        let undated = Invoice {
            invoice_no: "300".to_string(),
            customer_number: "C1".to_string(),
            ship_name: "SHIP".to_string(),
            file_path: "/inv/undated.pdf".to_string(),
            invoice_date: None,
            period: None,
            sent: false,
        };
        let (_dir, conn, _) = build_ledger(
            &[client("C1", "H1", None, &["a@x.com"])],
            &[undated],
            &[],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        assert!(outcome.matches.is_empty());
    }

    #[test]
    fn test_output_order_is_deterministic() {
        let (_dir, conn, _) = build_ledger(
            &[
                client("C1", "H2", None, &["a@x.com"]),
                client("C2", "H1", None, &["b@x.com"]),
            ],
            &[
                invoice("100", "C1", "/inv/a.pdf", "2024-05"),
                invoice("101", "C2", "/inv/b.pdf", "2024-05"),
            ],
            &[],
        );
        let outcome = reconcile(&conn, "2024-05", AggregateKey::HeadOffice).unwrap();
        let keys: Vec<&str> = outcome.matches.iter().map(|m| m.aggregate_key.as_str()).collect();
        assert_eq!(keys, vec!["H1", "H2"]);
    }
}
