use crate::cli::resolve_data_dir;
use crate::db;
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::ledger;
use crate::settings;

pub fn run(data_dir: Option<&str>) -> Result<()> {
    let settings = settings::load_settings();
    let data_dir = resolve_data_dir(data_dir, &settings);
    let db_path = settings::db_path(&data_dir);

    if !db_path.exists() {
        println!("No ledger at {}. Run mailroom init first.", db_path.display());
        return Ok(());
    }

    let conn = db::get_connection(&db_path)?;
    let counts = ledger::counts(&conn)?;
    let size = std::fs::metadata(&db_path)?.len();

    println!("Ledger: {} ({})", db_path.display(), format_bytes(size));
    println!(
        "{} client(s), {} invoice(s) ({} unsent), {} statement(s)",
        counts.clients, counts.invoices, counts.unsent_invoices, counts.soa
    );
    Ok(())
}
