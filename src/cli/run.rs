use crate::cli::scan::change_report_table;
use crate::cli::{print_warnings, resolve_pipeline_config, SourceOverrides};
use crate::dispatch::DryRunDispatcher;
use crate::error::Result;
use crate::pipeline;

pub fn run(
    period: &str,
    aggregate_by: Option<&str>,
    output: Option<&str>,
    sources: &SourceOverrides,
) -> Result<()> {
    let config = resolve_pipeline_config(sources, period, aggregate_by, output)?;
    let report = pipeline::run(&config, &DryRunDispatcher)?;

    print_warnings(&report.roster_warnings);
    print_warnings(&report.scan_warnings);
    print_warnings(&report.reconcile_warnings);
    print_warnings(&report.bundle_failures);

    if report.change_report.is_unchanged() {
        println!("Ledger rebuilt; no changes since the last scan.");
    } else {
        println!("Ledger rebuilt.\n{}", change_report_table(&report.change_report));
    }

    if report.shipments.is_empty() {
        println!("No shipments for {}.", config.period);
        return Ok(());
    }

    println!(
        "{} shipment(s) prepared for {} (dry run, nothing sent):",
        report.shipments.len(),
        config.period
    );
    for shipment in &report.shipments {
        println!(
            "  {} -> {} ({} recipient(s))",
            shipment.aggregate_key,
            shipment.archive_path.display(),
            shipment.recipients.len()
        );
    }
    if !report.bundle_failures.is_empty() {
        println!("{} group(s) failed to bundle.", report.bundle_failures.len());
    }
    Ok(())
}
