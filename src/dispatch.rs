use crate::models::ShipmentRecord;

/// Per-shipment outcome reported back by the mailing collaborator.
#[derive(Debug, Clone)]
pub struct ShipmentStatus {
    pub aggregate_key: String,
    pub delivered: bool,
    pub detail: Option<String>,
}

/// Boundary to the mailing collaborator. The core hands over shipment
/// records and records the statuses that come back; transport, retries and
/// templating live on the other side.
pub trait Dispatcher {
    fn dispatch(&self, shipments: &[ShipmentRecord]) -> Vec<ShipmentStatus>;
}

/// Logs what would be sent and delivers nothing. The default for `run` until
/// a real transport is wired up by the caller.
pub struct DryRunDispatcher;

impl Dispatcher for DryRunDispatcher {
    fn dispatch(&self, shipments: &[ShipmentRecord]) -> Vec<ShipmentStatus> {
        shipments
            .iter()
            .map(|s| {
                tracing::info!(
                    aggregate_key = %s.aggregate_key,
                    archive = %s.archive_path.display(),
                    recipients = s.recipients.len(),
                    "dry run: shipment prepared, not sent"
                );
                ShipmentStatus {
                    aggregate_key: s.aggregate_key.clone(),
                    delivered: false,
                    detail: None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_dry_run_delivers_nothing() {
        let shipment = ShipmentRecord {
            aggregate_key: "H1".to_string(),
            archive_path: PathBuf::from("/tmp/H1.zip"),
            recipients: vec!["a@x.com".to_string()],
            head_office_name: "Acme".to_string(),
            period: "2024-05".to_string(),
        };
        let statuses = DryRunDispatcher.dispatch(&[shipment]);
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].delivered);
        assert!(statuses[0].detail.is_none());
    }
}
