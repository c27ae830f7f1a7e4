use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use rayon::prelude::*;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::models::{ClientBundleMatch, ShipmentRecord};

/// One group that could not be archived. The rest of the batch is unaffected.
#[derive(Debug, Clone)]
pub struct BundleFailure {
    pub aggregate_key: String,
    pub message: String,
}

impl std::fmt::Display for BundleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.aggregate_key, self.message)
    }
}

pub struct BundleOutcome {
    pub shipments: Vec<ShipmentRecord>,
    pub failures: Vec<BundleFailure>,
}

/// Make an aggregate key safe as a file name component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "client".to_string()
    } else {
        cleaned
    }
}

/// Write one archive per match into `output_dir` and emit a shipment record
/// for each. Archives are written fresh every invocation; a failure while
/// archiving one group drops only that group's shipment.
pub fn bundle(matches: &[ClientBundleMatch], output_dir: &Path) -> Result<BundleOutcome> {
    fs::create_dir_all(output_dir)?;

    let results: Vec<std::result::Result<ShipmentRecord, BundleFailure>> = matches
        .par_iter()
        .map(|m| {
            bundle_one(m, output_dir).map_err(|err| {
                tracing::warn!(aggregate_key = %m.aggregate_key, %err, "bundle failed");
                BundleFailure {
                    aggregate_key: m.aggregate_key.clone(),
                    message: err.to_string(),
                }
            })
        })
        .collect();

    let mut shipments = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(shipment) => shipments.push(shipment),
            Err(failure) => failures.push(failure),
        }
    }
    Ok(BundleOutcome { shipments, failures })
}

fn bundle_one(m: &ClientBundleMatch, output_dir: &Path) -> Result<ShipmentRecord> {
    let archive_path = output_dir.join(format!("{}.zip", sanitize_component(&m.aggregate_key)));

    // Members are identified by source basename; names are deduplicated and
    // sorted so an unchanged match set always yields the same member layout.
    let mut members: Vec<(String, PathBuf)> = Vec::new();
    let mut seen: IndexSet<String> = IndexSet::new();
    let sources = m
        .invoices
        .iter()
        .map(|i| i.file_path.as_str())
        .chain(m.soa.iter().map(|s| s.file_path.as_str()));
    for source in sources {
        let path = PathBuf::from(source);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        members.push((name, path));
    }
    members.sort_by(|a, b| a.0.cmp(&b.0));

    if let Err(err) = write_archive(&archive_path, &members) {
        // Do not leave a half-written archive behind.
        let _ = fs::remove_file(&archive_path);
        return Err(err);
    }

    Ok(ShipmentRecord {
        aggregate_key: m.aggregate_key.clone(),
        archive_path,
        recipients: m.recipients.clone(),
        head_office_name: m.head_office_name.clone(),
        period: m.period.clone(),
    })
}

fn write_archive(archive_path: &Path, members: &[(String, PathBuf)]) -> Result<()> {
    let file = fs::File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, source) in members {
        let bytes = fs::read(source)?;
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&bytes)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Invoice, Soa};
    use std::collections::BTreeSet;

    fn invoice(no: &str, path: &Path) -> Invoice {
        Invoice {
            invoice_no: no.to_string(),
            customer_number: "C1".to_string(),
            ship_name: "SHIP".to_string(),
            file_path: path.to_string_lossy().into_owned(),
            invoice_date: None,
            period: Some("2024-05".to_string()),
            sent: false,
        }
    }

    fn soa(path: &Path) -> Soa {
        Soa {
            head_office: "H1".to_string(),
            head_office_name: Some("Acme".to_string()),
            file_path: path.to_string_lossy().into_owned(),
            soa_date: None,
            period: Some("2024-05".to_string()),
            sent: false,
        }
    }

    fn bundle_match(key: &str, invoices: Vec<Invoice>, soa: Option<Soa>) -> ClientBundleMatch {
        ClientBundleMatch {
            aggregate_key: key.to_string(),
            head_office: key.to_string(),
            head_office_name: "Acme".to_string(),
            period: "2024-05".to_string(),
            invoices,
            soa,
            recipients: vec!["c1@x.com".to_string()],
        }
    }

    fn member_names(archive_path: &Path) -> BTreeSet<String> {
        let file = fs::File::open(archive_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_archive_members_match_sources_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let i1 = dir.path().join("I1.pdf");
        let i2 = dir.path().join("I2.pdf");
        let s = dir.path().join("S.pdf");
        for (path, content) in [(&i1, "one"), (&i2, "two"), (&s, "statement")] {
            fs::write(path, content).unwrap();
        }
        let out = dir.path().join("bundles");

        let outcome = bundle(
            &[bundle_match("H1", vec![invoice("1", &i1), invoice("2", &i2)], Some(soa(&s)))],
            &out,
        )
        .unwrap();
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.shipments.len(), 1);

        let shipment = &outcome.shipments[0];
        assert_eq!(shipment.archive_path, out.join("H1.zip"));
        assert!(shipment.archive_path.exists());
        let names = member_names(&shipment.archive_path);
        let expected: BTreeSet<String> =
            ["I1.pdf", "I2.pdf", "S.pdf"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_rerun_overwrites_archive() {
        let dir = tempfile::tempdir().unwrap();
        let i1 = dir.path().join("I1.pdf");
        let i2 = dir.path().join("I2.pdf");
        fs::write(&i1, "one").unwrap();
        fs::write(&i2, "two").unwrap();
        let out = dir.path().join("bundles");

        bundle(&[bundle_match("H1", vec![invoice("1", &i1), invoice("2", &i2)], None)], &out)
            .unwrap();
        // second run with fewer members must not append to the old archive
        bundle(&[bundle_match("H1", vec![invoice("1", &i1)], None)], &out).unwrap();

        let names = member_names(&out.join("H1.zip"));
        assert_eq!(names.len(), 1);
        assert!(names.contains("I1.pdf"));
    }

    #[test]
    fn test_one_failing_group_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("I1.pdf");
        fs::write(&good, "one").unwrap();
        let missing = dir.path().join("missing.pdf");
        let out = dir.path().join("bundles");

        let outcome = bundle(
            &[
                bundle_match("H1", vec![invoice("1", &good)], None),
                bundle_match("H2", vec![invoice("2", &missing)], None),
            ],
            &out,
        )
        .unwrap();
        assert_eq!(outcome.shipments.len(), 1);
        assert_eq!(outcome.shipments[0].aggregate_key, "H1");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].aggregate_key, "H2");
        // no half-written archive for the failed group
        assert!(!out.join("H2.zip").exists());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("H1"), "H1");
        assert_eq!(sanitize_component("ACME:Corp"), "ACME_Corp");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component("  .. "), "client");
        assert_eq!(sanitize_component(""), "client");
    }

    #[test]
    fn test_duplicate_basenames_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let sub_a = dir.path().join("a");
        let sub_b = dir.path().join("b");
        fs::create_dir_all(&sub_a).unwrap();
        fs::create_dir_all(&sub_b).unwrap();
        let i1 = sub_a.join("same.pdf");
        let i2 = sub_b.join("same.pdf");
        fs::write(&i1, "first").unwrap();
        fs::write(&i2, "second").unwrap();
        let out = dir.path().join("bundles");

        let outcome = bundle(
            &[bundle_match("H1", vec![invoice("1", &i1), invoice("2", &i2)], None)],
            &out,
        )
        .unwrap();
        assert!(outcome.failures.is_empty());
        let names = member_names(&out.join("H1.zip"));
        assert_eq!(names.len(), 1);
    }
}
