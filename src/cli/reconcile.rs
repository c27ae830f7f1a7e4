use comfy_table::{Cell, Table};

use crate::cli::{print_warnings, resolve_aggregate, resolve_data_dir};
use crate::db;
use crate::error::Result;
use crate::reconciler;
use crate::settings;

pub fn run(period: &str, aggregate_by: Option<&str>, data_dir: Option<&str>) -> Result<()> {
    let settings = settings::load_settings();
    let period = settings::parse_period(period)?;
    let aggregate = resolve_aggregate(aggregate_by, &settings)?;
    let data_dir = resolve_data_dir(data_dir, &settings);

    let conn = db::get_connection(&settings::db_path(&data_dir))?;
    let outcome = reconciler::reconcile(&conn, &period, aggregate)?;
    print_warnings(&outcome.warnings);

    if outcome.matches.is_empty() {
        println!("No matches for {period}.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Group", "Head office", "Invoices", "Statement", "Recipients"]);
    for m in &outcome.matches {
        table.add_row(vec![
            Cell::new(&m.aggregate_key),
            Cell::new(&m.head_office_name),
            Cell::new(m.invoices.len()),
            Cell::new(if m.soa.is_some() { "yes" } else { "-" }),
            Cell::new(m.recipients.join(", ")),
        ]);
    }
    println!("Matches for {period}\n{table}");
    Ok(())
}
