use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY,
    customer_number TEXT NOT NULL UNIQUE,
    head_office TEXT NOT NULL,
    head_office_name TEXT,
    email1 TEXT,
    email2 TEXT,
    email3 TEXT,
    email4 TEXT,
    email5 TEXT
);

CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY,
    invoice_no TEXT NOT NULL UNIQUE,
    customer_number TEXT NOT NULL,
    ship_name TEXT NOT NULL,
    file_path TEXT NOT NULL UNIQUE,
    invoice_date TEXT,
    period TEXT,
    sent INTEGER NOT NULL DEFAULT 0,
    sent_at TEXT,
    send_error TEXT
);

CREATE TABLE IF NOT EXISTS soa (
    id INTEGER PRIMARY KEY,
    head_office TEXT NOT NULL,
    head_office_name TEXT,
    file_path TEXT NOT NULL UNIQUE,
    soa_date TEXT,
    period TEXT,
    sent INTEGER NOT NULL DEFAULT 0,
    sent_at TEXT,
    send_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_invoices_period ON invoices(period);
CREATE INDEX IF NOT EXISTS idx_invoices_customer_period ON invoices(customer_number, period);
CREATE INDEX IF NOT EXISTS idx_soa_head_office_period ON soa(head_office, period);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &["clients", "invoices", "soa"] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_unique_invoice_number_enforced() {
        let (_dir, conn) = test_db();
        conn.execute(
            "INSERT INTO invoices (invoice_no, customer_number, ship_name, file_path) VALUES ('INV-1', 'C1', 'SHIP', '/a.pdf')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO invoices (invoice_no, customer_number, ship_name, file_path) VALUES ('INV-1', 'C2', 'SHIP', '/b.pdf')",
            [],
        );
        assert!(dup.is_err());
    }
}
