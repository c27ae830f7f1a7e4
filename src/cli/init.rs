use std::path::PathBuf;

use crate::db;
use crate::error::Result;
use crate::settings;

pub fn run(
    data_dir: Option<String>,
    roster: Option<String>,
    invoice_root: Option<String>,
    soa_root: Option<String>,
) -> Result<()> {
    let mut settings = settings::load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    if let Some(path) = roster {
        settings.roster_path = path;
    }
    if let Some(path) = invoice_root {
        settings.invoice_root = path;
    }
    if let Some(path) = soa_root {
        settings.soa_root = path;
    }

    let data_dir = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = settings::db_path(&data_dir);
    let conn = db::get_connection(&db_path)?;
    db::init_db(&conn)?;
    settings::save_settings(&settings)?;

    println!("Ledger initialized at {}", db_path.display());
    if settings.roster_path.is_empty() {
        println!("No roster configured yet; set one with mailroom init --roster <file>.");
    }
    Ok(())
}
