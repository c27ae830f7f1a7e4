use crate::bundler::{self, BundleFailure};
use crate::db;
use crate::dispatch::{Dispatcher, ShipmentStatus};
use crate::error::Result;
use crate::extract::{DatePatterns, ExtractionStrategy};
use crate::ledger;
use crate::models::{ChangeReport, ClientBundleMatch, ShipmentRecord};
use crate::reconciler::{self, ReconcileWarning};
use crate::roster::{self, RosterWarning};
use crate::scanner::{self, FilePatterns, ScanWarning};
use crate::settings::{PipelineConfig, ScanConfig};

/// Result of refreshing the ledger from the three sources of truth.
pub struct RefreshOutcome {
    pub change_report: ChangeReport,
    pub roster_warnings: Vec<RosterWarning>,
    pub scan_warnings: Vec<ScanWarning>,
}

/// Everything one full run produced, for display and for the caller's report.
pub struct PipelineReport {
    pub change_report: ChangeReport,
    pub roster_warnings: Vec<RosterWarning>,
    pub scan_warnings: Vec<ScanWarning>,
    pub reconcile_warnings: Vec<ReconcileWarning>,
    pub matches: Vec<ClientBundleMatch>,
    pub shipments: Vec<ShipmentRecord>,
    pub bundle_failures: Vec<BundleFailure>,
    pub statuses: Vec<ShipmentStatus>,
}

/// Rebuild the ledger from the roster and both document folders.
///
/// Discovery tolerates bad rows and files (warnings); the rebuild itself is
/// all-or-nothing and restores the previous store on failure.
pub fn refresh_ledger(config: &ScanConfig) -> Result<RefreshOutcome> {
    let (clients, roster_warnings) = roster::read_roster(&config.roster_path)?;
    tracing::info!(
        clients = clients.len(),
        skipped = roster_warnings.len(),
        roster = %config.roster_path.display(),
        "roster loaded"
    );

    let date_patterns = DatePatterns::compile(&config.date_patterns)?;
    let extraction = ExtractionStrategy::from_settings(&config.extraction, &date_patterns)?;
    let file_patterns = FilePatterns::compile(&config.invoice_pattern, &config.soa_pattern)?;

    let invoice_scan = scanner::scan_invoices(&config.invoice_root, &file_patterns.invoice, &extraction);
    let soa_scan = scanner::scan_soa(&config.soa_root, &file_patterns.soa, &extraction);
    tracing::info!(
        invoices = invoice_scan.records.len(),
        soa = soa_scan.records.len(),
        "discovery complete"
    );

    let change_report = ledger::rebuild(
        &config.db_path,
        &clients,
        &invoice_scan.records,
        &soa_scan.records,
    )?;

    let mut scan_warnings = invoice_scan.warnings;
    scan_warnings.extend(soa_scan.warnings);

    Ok(RefreshOutcome {
        change_report,
        roster_warnings,
        scan_warnings,
    })
}

/// The full pipeline: refresh, reconcile the target period, bundle each
/// match, hand the shipments to the dispatcher and record the outcomes.
pub fn run(config: &PipelineConfig, dispatcher: &dyn Dispatcher) -> Result<PipelineReport> {
    let refresh = refresh_ledger(&config.scan)?;

    let conn = db::get_connection(&config.scan.db_path)?;
    let outcome = reconciler::reconcile(&conn, &config.period, config.aggregate_by)?;
    tracing::info!(
        period = %config.period,
        matches = outcome.matches.len(),
        "reconciliation complete"
    );

    let bundles = bundler::bundle(&outcome.matches, &config.bundle_dir)?;
    let statuses = dispatcher.dispatch(&bundles.shipments);

    let sent_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    for status in &statuses {
        let Some(bundle_match) = outcome
            .matches
            .iter()
            .find(|m| m.aggregate_key == status.aggregate_key)
        else {
            continue;
        };
        if status.delivered {
            ledger::mark_match_sent(&conn, bundle_match, &sent_at, None)?;
        } else if let Some(detail) = &status.detail {
            ledger::mark_match_sent(&conn, bundle_match, &sent_at, Some(detail))?;
        }
    }

    Ok(PipelineReport {
        change_report: refresh.change_report,
        roster_warnings: refresh.roster_warnings,
        scan_warnings: refresh.scan_warnings,
        reconcile_warnings: outcome.warnings,
        matches: outcome.matches,
        shipments: bundles.shipments,
        bundle_failures: bundles.failures,
        statuses,
    })
}
