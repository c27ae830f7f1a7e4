use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexSet;

use crate::error::{MailroomError, Result};
use crate::models::{ClientRow, MAX_RECIPIENTS};

/// A roster row that could not be turned into a typed client row.
#[derive(Debug, Clone)]
pub struct RosterWarning {
    /// 1-based row number in the source file, including the header row.
    pub row: usize,
    pub message: String,
}

impl std::fmt::Display for RosterWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "roster row {}: {}", self.row, self.message)
    }
}

const CUSTOMER_HEADER: &str = "customer number";
const HEAD_OFFICE_HEADER: &str = "head office";
const HEAD_OFFICE_NAME_HEADER: &str = "head office name";

/// Read the client directory file. `.xlsx`/`.xlsm` go through calamine,
/// everything else is treated as CSV. Rows without a customer number are
/// skipped with a warning; the rest become typed client rows.
pub fn read_roster(path: &Path) -> Result<(Vec<ClientRow>, Vec<RosterWarning>)> {
    let is_excel = path
        .extension()
        .map(|e| {
            e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xlsm")
        })
        .unwrap_or(false);
    if is_excel {
        read_xlsx(path)
    } else {
        read_csv(path)
    }
}

fn header_index(headers: &[String]) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_lowercase(), i))
        .collect()
}

fn email_headers() -> Vec<String> {
    (1..=MAX_RECIPIENTS)
        .map(|i| format!("emailforinvoice{i}"))
        .collect()
}

fn build_row(
    index: &HashMap<String, usize>,
    cells: &[String],
    row_no: usize,
    warnings: &mut Vec<RosterWarning>,
) -> Option<ClientRow> {
    let cell = |header: &str| -> String {
        index
            .get(header)
            .and_then(|&i| cells.get(i))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let customer_number = cell(CUSTOMER_HEADER);
    if customer_number.is_empty() {
        warnings.push(RosterWarning {
            row: row_no,
            message: "missing customer number, row skipped".to_string(),
        });
        return None;
    }

    let head_office = cell(HEAD_OFFICE_HEADER);
    let head_office_name = {
        let name = cell(HEAD_OFFICE_NAME_HEADER);
        if name.is_empty() { None } else { Some(name) }
    };

    let mut emails: IndexSet<String> = IndexSet::new();
    for header in email_headers() {
        let value = cell(&header);
        if !value.is_empty() {
            emails.insert(value);
        }
    }

    Some(ClientRow {
        customer_number,
        head_office,
        head_office_name,
        emails: emails.into_iter().take(MAX_RECIPIENTS).collect(),
    })
}

fn require_customer_column(index: &HashMap<String, usize>, path: &Path) -> Result<()> {
    if !index.contains_key(CUSTOMER_HEADER) {
        return Err(MailroomError::Roster(format!(
            "{}: no \"Customer Number\" column found",
            path.display()
        )));
    }
    Ok(())
}

fn read_csv(path: &Path) -> Result<(Vec<ClientRow>, Vec<RosterWarning>)> {
    let file = std::fs::File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let index = header_index(&headers);
    require_customer_column(&index, path)?;

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let cells: Vec<String> = record.iter().map(|c| c.to_string()).collect();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        if let Some(row) = build_row(&index, &cells, i + 2, &mut warnings) {
            rows.push(row);
        }
    }
    Ok((rows, warnings))
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            // Excel stores customer numbers as floats; drop the fake decimals
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                format!("{f}")
            }
        }
        Data::Int(i) => format!("{i}"),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn read_xlsx(path: &Path) -> Result<(Vec<ClientRow>, Vec<RosterWarning>)> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| MailroomError::Roster(format!("failed to open {}: {e}", path.display())))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| MailroomError::Roster(format!("{}: workbook has no sheets", path.display())))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| MailroomError::Roster(format!("failed to read sheet {sheet:?}: {e}")))?;

    let mut iter = range.rows();
    let headers: Vec<String> = match iter.next() {
        Some(cells) => cells.iter().map(cell_to_string).collect(),
        None => Vec::new(),
    };
    let index = header_index(&headers);
    require_customer_column(&index, path)?;

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (i, cells) in iter.enumerate() {
        let cells: Vec<String> = cells.iter().map(cell_to_string).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        if let Some(row) = build_row(&index, &cells, i + 2, &mut warnings) {
            rows.push(row);
        }
    }
    Ok((rows, warnings))
}
