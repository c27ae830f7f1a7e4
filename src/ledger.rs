use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use indexmap::IndexSet;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db;
use crate::error::{MailroomError, Result};
use crate::models::{
    AggregateKey, ChangeReport, ClientBundleMatch, ClientRow, EntityDiff, Invoice, Soa,
};

// Rebuild is a single-writer critical section; concurrent calls serialize here.
static REBUILD_LOCK: Mutex<()> = Mutex::new(());

const DATE_FMT: &str = "%Y-%m-%d";

pub fn backup_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    db_path.with_file_name(name)
}

/// Replace the entire ledger with freshly discovered rows.
///
/// The previous store is snapshotted to `<db>.bak` first and restored
/// verbatim if anything after that point fails; the caller never observes a
/// partially-rebuilt store. On success the backup is deleted and a change
/// report describes what moved.
pub fn rebuild(
    db_path: &Path,
    clients: &[ClientRow],
    invoices: &[Invoice],
    soas: &[Soa],
) -> Result<ChangeReport> {
    let _guard = REBUILD_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let backup = backup_path_for(db_path);
    let had_existing = db_path.exists();
    if had_existing {
        snapshot_to(db_path, &backup)?;
    }

    match rebuild_inner(db_path, clients, invoices, soas) {
        Ok(report) => {
            if had_existing {
                if let Err(err) = fs::remove_file(&backup) {
                    tracing::warn!(%err, backup = %backup.display(), "could not remove ledger backup");
                }
            }
            Ok(report)
        }
        Err(source) => {
            tracing::error!(%source, "ledger rebuild failed, restoring previous state");
            restore_from_backup(db_path, &backup, had_existing);
            Err(MailroomError::Rebuild {
                source: Box::new(source),
            })
        }
    }
}

/// Copy the live store to `dst` through the SQLite online-backup API, so the
/// snapshot is consistent even with readers attached.
fn snapshot_to(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    let src_conn = Connection::open(src)?;
    let mut dst_conn = Connection::open(dst)?;
    let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
    backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
    Ok(())
}

fn restore_from_backup(db_path: &Path, backup: &Path, had_existing: bool) {
    // Best effort: put the previous bytes back and drop stale WAL sidecars.
    // The backup file itself is left on disk for inspection.
    let _ = fs::remove_file(db_path);
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        let _ = fs::remove_file(db_path.with_file_name(name));
    }
    if had_existing && backup.exists() {
        if let Err(err) = fs::copy(backup, db_path) {
            tracing::error!(%err, backup = %backup.display(), "failed to restore ledger backup");
        }
    }
}

fn rebuild_inner(
    db_path: &Path,
    clients: &[ClientRow],
    invoices: &[Invoice],
    soas: &[Soa],
) -> Result<ChangeReport> {
    let mut conn = db::get_connection(db_path)?;
    db::init_db(&conn)?;

    let pre = snapshot_fingerprints(&conn)?;
    let delivery = snapshot_delivery(&conn)?;

    let tx = conn.transaction()?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS clients; DROP TABLE IF EXISTS invoices; DROP TABLE IF EXISTS soa;",
    )?;
    tx.execute_batch(db::SCHEMA)?;

    let mut duplicate_upserts = import_clients(&tx, clients)?;
    duplicate_upserts += import_invoices(&tx, invoices)?;
    duplicate_upserts += import_soa(&tx, soas)?;
    reapply_delivery(&tx, &delivery)?;

    let post = snapshot_fingerprints(&tx)?;
    tx.commit()?;

    Ok(ChangeReport {
        clients: diff_maps(&pre.clients, &post.clients),
        invoices: diff_maps(&pre.invoices, &post.invoices),
        soa: diff_maps(&pre.soa, &post.soa),
        duplicate_upserts,
    })
}

// ---------------------------------------------------------------------------
// Snapshots and diffing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreFingerprints {
    clients: HashMap<String, String>,
    invoices: HashMap<String, String>,
    soa: HashMap<String, String>,
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn snapshot_fingerprints(conn: &Connection) -> Result<StoreFingerprints> {
    let mut snap = StoreFingerprints::default();

    let mut stmt = conn.prepare(
        "SELECT customer_number, head_office, COALESCE(head_office_name, ''), \
         COALESCE(email1, ''), COALESCE(email2, ''), COALESCE(email3, ''), \
         COALESCE(email4, ''), COALESCE(email5, '') FROM clients",
    )?;
    let rows = stmt.query_map([], |row| {
        let mut fields = Vec::with_capacity(8);
        for i in 0..8 {
            fields.push(row.get::<_, String>(i)?);
        }
        Ok(fields)
    })?;
    for fields in rows {
        let fields = fields?;
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        snap.clients.insert(fields[0].clone(), fingerprint(&refs));
    }

    let mut stmt = conn.prepare(
        "SELECT invoice_no, customer_number, ship_name, file_path, \
         COALESCE(invoice_date, ''), COALESCE(period, '') FROM invoices",
    )?;
    let rows = stmt.query_map([], |row| {
        let mut fields = Vec::with_capacity(6);
        for i in 0..6 {
            fields.push(row.get::<_, String>(i)?);
        }
        Ok(fields)
    })?;
    for fields in rows {
        let fields = fields?;
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        snap.invoices.insert(fields[0].clone(), fingerprint(&refs));
    }

    let mut stmt = conn.prepare(
        "SELECT file_path, head_office, COALESCE(head_office_name, ''), \
         COALESCE(soa_date, ''), COALESCE(period, '') FROM soa",
    )?;
    let rows = stmt.query_map([], |row| {
        let mut fields = Vec::with_capacity(5);
        for i in 0..5 {
            fields.push(row.get::<_, String>(i)?);
        }
        Ok(fields)
    })?;
    for fields in rows {
        let fields = fields?;
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        snap.soa.insert(fields[0].clone(), fingerprint(&refs));
    }

    Ok(snap)
}

fn diff_maps(pre: &HashMap<String, String>, post: &HashMap<String, String>) -> EntityDiff {
    let mut diff = EntityDiff::default();
    for (key, print) in post {
        match pre.get(key) {
            None => diff.added += 1,
            Some(old) if old != print => diff.changed += 1,
            Some(_) => {}
        }
    }
    for key in pre.keys() {
        if !post.contains_key(key) {
            diff.removed += 1;
        }
    }
    diff
}

// ---------------------------------------------------------------------------
// Delivery-status carry-over
// ---------------------------------------------------------------------------

type DeliveryRow = (String, i64, Option<String>, Option<String>);

#[derive(Default)]
struct DeliveryState {
    invoices: Vec<DeliveryRow>,
    soa: Vec<DeliveryRow>,
}

fn snapshot_delivery(conn: &Connection) -> Result<DeliveryState> {
    let mut state = DeliveryState::default();
    for (table, bucket) in [("invoices", &mut state.invoices), ("soa", &mut state.soa)] {
        let mut stmt = conn.prepare(&format!(
            "SELECT file_path, sent, sent_at, send_error FROM {table} \
             WHERE sent = 1 OR send_error IS NOT NULL"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        for row in rows {
            bucket.push(row?);
        }
    }
    Ok(state)
}

fn reapply_delivery(conn: &Connection, state: &DeliveryState) -> Result<()> {
    for (table, rows) in [("invoices", &state.invoices), ("soa", &state.soa)] {
        let mut stmt = conn.prepare(&format!(
            "UPDATE {table} SET sent = ?2, sent_at = ?3, send_error = ?4 WHERE file_path = ?1"
        ))?;
        for (path, sent, sent_at, send_error) in rows {
            stmt.execute(rusqlite::params![path, sent, sent_at, send_error])?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Imports — every write is an upsert on the entity's unique key(s)
// ---------------------------------------------------------------------------

fn import_clients(conn: &Connection, rows: &[ClientRow]) -> Result<usize> {
    let mut exists = conn.prepare("SELECT 1 FROM clients WHERE customer_number = ?1")?;
    let mut insert = conn.prepare(
        "INSERT INTO clients (customer_number, head_office, head_office_name, \
         email1, email2, email3, email4, email5) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(customer_number) DO UPDATE SET \
         head_office = excluded.head_office, \
         head_office_name = excluded.head_office_name, \
         email1 = excluded.email1, email2 = excluded.email2, email3 = excluded.email3, \
         email4 = excluded.email4, email5 = excluded.email5",
    )?;
    let mut duplicates = 0;
    for row in rows {
        if exists.exists([&row.customer_number])? {
            duplicates += 1;
        }
        let mut emails: Vec<Option<&str>> = row.emails.iter().map(|e| Some(e.as_str())).collect();
        emails.resize(5, None);
        insert.execute(rusqlite::params![
            row.customer_number,
            row.head_office,
            row.head_office_name,
            emails[0],
            emails[1],
            emails[2],
            emails[3],
            emails[4],
        ])?;
    }
    Ok(duplicates)
}

fn import_invoices(conn: &Connection, rows: &[Invoice]) -> Result<usize> {
    // Two independent unique keys: a collision on either replaces the old row.
    let mut exists =
        conn.prepare("SELECT 1 FROM invoices WHERE invoice_no = ?1 OR file_path = ?2")?;
    let mut delete =
        conn.prepare("DELETE FROM invoices WHERE invoice_no = ?1 OR file_path = ?2")?;
    let mut insert = conn.prepare(
        "INSERT INTO invoices (invoice_no, customer_number, ship_name, file_path, \
         invoice_date, period, sent) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
    )?;
    let mut duplicates = 0;
    for row in rows {
        if exists.exists(rusqlite::params![row.invoice_no, row.file_path])? {
            duplicates += 1;
            delete.execute(rusqlite::params![row.invoice_no, row.file_path])?;
        }
        insert.execute(rusqlite::params![
            row.invoice_no,
            row.customer_number,
            row.ship_name,
            row.file_path,
            row.invoice_date.map(|d| d.format(DATE_FMT).to_string()),
            row.period,
        ])?;
    }
    Ok(duplicates)
}

fn import_soa(conn: &Connection, rows: &[Soa]) -> Result<usize> {
    let mut exists = conn.prepare("SELECT 1 FROM soa WHERE file_path = ?1")?;
    let mut insert = conn.prepare(
        "INSERT INTO soa (head_office, head_office_name, file_path, soa_date, period, sent) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0) \
         ON CONFLICT(file_path) DO UPDATE SET \
         head_office = excluded.head_office, \
         head_office_name = excluded.head_office_name, \
         soa_date = excluded.soa_date, \
         period = excluded.period",
    )?;
    let mut duplicates = 0;
    for row in rows {
        if exists.exists([&row.file_path])? {
            duplicates += 1;
        }
        insert.execute(rusqlite::params![
            row.head_office,
            row.head_office_name,
            row.file_path,
            row.soa_date.map(|d| d.format(DATE_FMT).to_string()),
            row.period,
        ])?;
    }
    Ok(duplicates)
}

// ---------------------------------------------------------------------------
// Read accessors
// ---------------------------------------------------------------------------

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|v| NaiveDate::parse_from_str(&v, DATE_FMT).ok())
}

fn client_from_columns(
    customer_number: String,
    head_office: String,
    head_office_name: Option<String>,
    emails: Vec<Option<String>>,
) -> ClientRow {
    let mut unique: IndexSet<String> = IndexSet::new();
    for email in emails.into_iter().flatten() {
        let email = email.trim().to_string();
        if !email.is_empty() {
            unique.insert(email);
        }
    }
    ClientRow {
        customer_number,
        head_office,
        head_office_name: head_office_name.filter(|n| !n.trim().is_empty()),
        emails: unique.into_iter().collect(),
    }
}

const CLIENT_COLS: &str =
    "customer_number, head_office, head_office_name, email1, email2, email3, email4, email5";

fn map_client_row(row: &rusqlite::Row) -> rusqlite::Result<ClientRow> {
    Ok(client_from_columns(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        vec![row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
    ))
}

pub fn all_clients(conn: &Connection) -> Result<Vec<ClientRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {CLIENT_COLS} FROM clients ORDER BY customer_number"))?;
    let rows = stmt.query_map([], map_client_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Every client row sharing the given aggregate-key value.
pub fn clients_by_aggregate_key(
    conn: &Connection,
    key: AggregateKey,
    value: &str,
) -> Result<Vec<ClientRow>> {
    let column = match key {
        AggregateKey::HeadOffice => "head_office",
        AggregateKey::CustomerNumber => "customer_number",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLIENT_COLS} FROM clients WHERE TRIM({column}) = ?1 ORDER BY customer_number"
    ))?;
    let rows = stmt.query_map([value.trim()], map_client_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn client_for_customer(conn: &Connection, customer_number: &str) -> Result<Option<ClientRow>> {
    let mut rows =
        clients_by_aggregate_key(conn, AggregateKey::CustomerNumber, customer_number)?;
    Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
}

const INVOICE_COLS: &str =
    "invoice_no, customer_number, ship_name, file_path, invoice_date, period, sent";

fn map_invoice_row(row: &rusqlite::Row) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        invoice_no: row.get(0)?,
        customer_number: row.get(1)?,
        ship_name: row.get(2)?,
        file_path: row.get(3)?,
        invoice_date: parse_date(row.get(4)?),
        period: row.get(5)?,
        sent: row.get::<_, i64>(6)? != 0,
    })
}

/// Invoices whose derived period equals `period` exactly. Rows with a null
/// period (failed extraction) never appear here.
pub fn invoices_for_period(conn: &Connection, period: &str) -> Result<Vec<Invoice>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVOICE_COLS} FROM invoices WHERE period = ?1 ORDER BY invoice_no"
    ))?;
    let rows = stmt.query_map([period], map_invoice_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

const SOA_COLS: &str = "head_office, head_office_name, file_path, soa_date, period, sent";

fn map_soa_row(row: &rusqlite::Row) -> rusqlite::Result<Soa> {
    Ok(Soa {
        head_office: row.get(0)?,
        head_office_name: row.get(1)?,
        file_path: row.get(2)?,
        soa_date: parse_date(row.get(3)?),
        period: row.get(4)?,
        sent: row.get::<_, i64>(5)? != 0,
    })
}

/// Statement rows for one head office, optionally restricted to a period.
pub fn soa_for_head_office(
    conn: &Connection,
    head_office: &str,
    period: Option<&str>,
) -> Result<Vec<Soa>> {
    let mut sql = format!("SELECT {SOA_COLS} FROM soa WHERE TRIM(head_office) = ?1");
    if period.is_some() {
        sql.push_str(" AND period = ?2");
    }
    sql.push_str(" ORDER BY file_path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = match period {
        Some(p) => stmt.query_map(rusqlite::params![head_office.trim(), p], map_soa_row)?,
        None => stmt.query_map([head_office.trim()], map_soa_row)?,
    };
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerCounts {
    pub clients: usize,
    pub invoices: usize,
    pub soa: usize,
    pub unsent_invoices: usize,
}

pub fn counts(conn: &Connection) -> Result<LedgerCounts> {
    let count = |sql: &str| -> Result<usize> {
        Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as usize)
    };
    Ok(LedgerCounts {
        clients: count("SELECT count(*) FROM clients")?,
        invoices: count("SELECT count(*) FROM invoices")?,
        soa: count("SELECT count(*) FROM soa")?,
        unsent_invoices: count("SELECT count(*) FROM invoices WHERE sent = 0")?,
    })
}

/// Record a delivery outcome for everything in one bundle match. A `None`
/// error marks the documents sent; an error message is stored without
/// flipping the sent flag, so the next run retries.
pub fn mark_match_sent(
    conn: &Connection,
    bundle: &ClientBundleMatch,
    sent_at: &str,
    error: Option<&str>,
) -> Result<()> {
    let invoice_paths: Vec<&str> = bundle.invoices.iter().map(|i| i.file_path.as_str()).collect();
    let soa_paths: Vec<&str> = bundle.soa.iter().map(|s| s.file_path.as_str()).collect();

    for (table, table_paths) in [("invoices", invoice_paths), ("soa", soa_paths)] {
        for path in table_paths {
            match error {
                None => {
                    conn.execute(
                        &format!(
                            "UPDATE {table} SET sent = 1, sent_at = ?1, send_error = NULL \
                             WHERE file_path = ?2"
                        ),
                        rusqlite::params![sent_at, path],
                    )?;
                }
                Some(err) => {
                    conn.execute(
                        &format!("UPDATE {table} SET send_error = ?1 WHERE file_path = ?2"),
                        rusqlite::params![err, path],
                    )?;
                }
            }
        }
    }
    Ok(())
}
