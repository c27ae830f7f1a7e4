use comfy_table::{Cell, Table};

use crate::cli::{print_warnings, resolve_scan_config, SourceOverrides};
use crate::error::Result;
use crate::models::ChangeReport;
use crate::pipeline;

pub(crate) fn change_report_table(report: &ChangeReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Entity", "Added", "Removed", "Changed"]);
    for (name, diff) in [
        ("clients", report.clients),
        ("invoices", report.invoices),
        ("soa", report.soa),
    ] {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(diff.added),
            Cell::new(diff.removed),
            Cell::new(diff.changed),
        ]);
    }
    table
}

pub fn run(sources: &SourceOverrides) -> Result<()> {
    let config = resolve_scan_config(sources)?;
    let outcome = pipeline::refresh_ledger(&config)?;

    print_warnings(&outcome.roster_warnings);
    print_warnings(&outcome.scan_warnings);

    if outcome.change_report.is_unchanged() {
        println!("Ledger rebuilt; no changes since the last scan.");
    } else {
        println!("Ledger rebuilt.\n{}", change_report_table(&outcome.change_report));
    }
    if outcome.change_report.duplicate_upserts > 0 {
        println!(
            "{} row(s) overwrote an earlier row with the same key (last scan wins).",
            outcome.change_report.duplicate_upserts
        );
    }
    Ok(())
}
