use comfy_table::{Cell, Table};

use crate::bundler;
use crate::cli::{print_warnings, resolve_aggregate, resolve_bundle_dir, resolve_data_dir};
use crate::db;
use crate::error::Result;
use crate::reconciler;
use crate::settings;

pub fn run(
    period: &str,
    aggregate_by: Option<&str>,
    output: Option<&str>,
    data_dir: Option<&str>,
) -> Result<()> {
    let settings = settings::load_settings();
    let period = settings::parse_period(period)?;
    let aggregate = resolve_aggregate(aggregate_by, &settings)?;
    let data_dir = resolve_data_dir(data_dir, &settings);
    let bundle_dir = resolve_bundle_dir(output, &settings, &data_dir);

    let conn = db::get_connection(&settings::db_path(&data_dir))?;
    let outcome = reconciler::reconcile(&conn, &period, aggregate)?;
    print_warnings(&outcome.warnings);

    if outcome.matches.is_empty() {
        println!("No matches for {period}; nothing to bundle.");
        return Ok(());
    }

    let result = bundler::bundle(&outcome.matches, &bundle_dir)?;
    print_warnings(&result.failures);

    let mut table = Table::new();
    table.set_header(vec!["Group", "Archive", "Recipients"]);
    for shipment in &result.shipments {
        table.add_row(vec![
            Cell::new(&shipment.aggregate_key),
            Cell::new(shipment.archive_path.display()),
            Cell::new(shipment.recipients.join(", ")),
        ]);
    }
    println!(
        "{} archive(s) written to {}\n{table}",
        result.shipments.len(),
        bundle_dir.display()
    );
    if !result.failures.is_empty() {
        println!("{} group(s) failed to bundle.", result.failures.len());
    }
    Ok(())
}
