use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::types::ExtractedKpi;

pub const STORE_CSV: &str = "all_extracted_kpis.csv";
pub const STORE_XLSX: &str = "all_extracted_kpis.xlsx";

const XLSX_HEADERS: [&str; 9] = [
    "kpi_name",
    "value",
    "unit",
    "source_file",
    "topic",
    "topic_fr",
    "score",
    "confidence",
    "extraction_date",
];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("store workbook error: {0}")]
    Xlsx(String),
}

/// Flat-file KPI store: a CSV system of record with an XLSX mirror, both
/// rewritten wholesale on every update. Records are append-only and
/// deduplicated on `(kpi_name, value, unit, source_file)`, keeping the
/// newest occurrence.
pub struct KpiStore {
    csv_path: PathBuf,
    xlsx_path: PathBuf,
    records: RwLock<Vec<ExtractedKpi>>,
}

impl KpiStore {
    /// Open the store in `data_dir`, loading any existing CSV. A CSV that
    /// fails to parse is treated as empty rather than blocking startup.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let csv_path = data_dir.join(STORE_CSV);
        let xlsx_path = data_dir.join(STORE_XLSX);

        let records = if csv_path.exists() {
            match load_csv(&csv_path) {
                Ok(records) => {
                    info!("loaded {} existing KPI records", records.len());
                    records
                }
                Err(e) => {
                    warn!("could not load existing results ({}), starting empty", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            csv_path,
            xlsx_path,
            records: RwLock::new(records),
        })
    }

    pub async fn all(&self) -> Vec<ExtractedKpi> {
        self.records.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn has_source(&self, source_file: &str) -> bool {
        self.records
            .read()
            .await
            .iter()
            .any(|r| r.source_file == source_file)
    }

    pub async fn companies(&self) -> Vec<String> {
        let records = self.records.read().await;
        let mut companies = Vec::new();
        for record in records.iter() {
            if !companies.contains(&record.source_file) {
                companies.push(record.source_file.clone());
            }
        }
        companies
    }

    pub async fn for_company(&self, source_file: &str) -> Vec<ExtractedKpi> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.source_file == source_file)
            .cloned()
            .collect()
    }

    /// Merge new records into the store and rewrite both files.
    /// Returns the total record count after the merge.
    pub async fn append(&self, new_records: Vec<ExtractedKpi>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;

        let mut merged: Vec<ExtractedKpi> = Vec::with_capacity(records.len() + new_records.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in records.iter().cloned().chain(new_records) {
            let key = record.dedup_key();
            match index.get(&key) {
                Some(&pos) => merged[pos] = record,
                None => {
                    index.insert(key, merged.len());
                    merged.push(record);
                }
            }
        }

        write_csv(&self.csv_path, &merged)?;
        if let Err(e) = write_xlsx(&self.xlsx_path, &merged) {
            // The CSV is the system of record; a failed mirror only warns.
            warn!("could not write XLSX mirror: {}", e);
        }

        info!("store now holds {} KPI records", merged.len());
        *records = merged;
        Ok(records.len())
    }
}

fn load_csv(path: &Path) -> Result<Vec<ExtractedKpi>, StoreError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping unreadable store row: {}", e),
        }
    }
    Ok(records)
}

fn write_csv(path: &Path, records: &[ExtractedKpi]) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(path: &Path, records: &[ExtractedKpi]) -> Result<(), StoreError> {
    let buffer = xlsx_bytes(records)?;
    std::fs::write(path, buffer)?;
    Ok(())
}

/// Serialize records as a single-sheet XLSX workbook.
pub fn xlsx_bytes(records: &[ExtractedKpi]) -> Result<Vec<u8>, StoreError> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, header) in XLSX_HEADERS.iter().enumerate() {
        sheet
            .write_string(0, col as u16, *header)
            .map_err(|e| StoreError::Xlsx(e.to_string()))?;
    }

    for (idx, record) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        sheet
            .write_string(row, 0, record.kpi_name.as_str())
            .and_then(|s| s.write_number(row, 1, record.value))
            .and_then(|s| s.write_string(row, 2, record.unit.as_str()))
            .and_then(|s| s.write_string(row, 3, record.source_file.as_str()))
            .and_then(|s| s.write_string(row, 4, record.topic.as_str()))
            .and_then(|s| s.write_string(row, 5, record.topic_fr.as_str()))
            .and_then(|s| s.write_string(row, 6, record.score.as_str()))
            .and_then(|s| s.write_number(row, 7, record.confidence as f64))
            .and_then(|s| s.write_string(row, 8, record.extraction_date.as_str()))
            .map_err(|e| StoreError::Xlsx(e.to_string()))?;
    }

    workbook
        .save_to_buffer()
        .map_err(|e| StoreError::Xlsx(e.to_string()))
}

/// Serialize records as CSV, headers included.
pub fn csv_bytes(records: &[ExtractedKpi]) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kpi: &str, value: f64, source: &str, confidence: f32) -> ExtractedKpi {
        ExtractedKpi {
            kpi_name: kpi.to_string(),
            value,
            unit: "tons".to_string(),
            source_file: source.to_string(),
            topic: "Environment".to_string(),
            topic_fr: "Environnement".to_string(),
            score: "A".to_string(),
            confidence,
            extraction_date: "2025-01-01 00:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn append_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = KpiStore::open(dir.path()).unwrap();

        let total = store
            .append(vec![
                record("GHG Emissions", 120.0, "acme.pdf", 0.8),
                record("Water Usage", 400.0, "acme.pdf", 0.6),
            ])
            .await
            .unwrap();
        assert_eq!(total, 2);

        // A fresh store instance reads the same rows back from disk.
        let reopened = KpiStore::open(dir.path()).unwrap();
        let records = reopened.all().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kpi_name, "GHG Emissions");
        assert!(dir.path().join(STORE_XLSX).exists());
    }

    #[tokio::test]
    async fn merge_dedupes_on_identity_keeping_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = KpiStore::open(dir.path()).unwrap();

        store
            .append(vec![record("GHG Emissions", 120.0, "acme.pdf", 0.5)])
            .await
            .unwrap();

        let mut updated = record("GHG Emissions", 120.0, "acme.pdf", 0.9);
        updated.extraction_date = "2025-02-01 00:00:00".to_string();
        let total = store.append(vec![updated]).await.unwrap();

        assert_eq!(total, 1);
        let records = store.all().await;
        assert_eq!(records[0].extraction_date, "2025-02-01 00:00:00");
        assert!((records[0].confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn different_values_are_distinct_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = KpiStore::open(dir.path()).unwrap();

        store
            .append(vec![
                record("GHG Emissions", 120.0, "acme.pdf", 0.5),
                record("GHG Emissions", 99.0, "acme.pdf", 0.5),
            ])
            .await
            .unwrap();

        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn has_source_and_companies() {
        let dir = tempfile::tempdir().unwrap();
        let store = KpiStore::open(dir.path()).unwrap();

        store
            .append(vec![
                record("GHG Emissions", 120.0, "acme.pdf", 0.5),
                record("Water Usage", 4.0, "globex.pdf", 0.7),
            ])
            .await
            .unwrap();

        assert!(store.has_source("acme.pdf").await);
        assert!(!store.has_source("initech.pdf").await);
        assert_eq!(store.companies().await, vec!["acme.pdf", "globex.pdf"]);
        assert_eq!(store.for_company("globex.pdf").await.len(), 1);
    }

    #[test]
    fn csv_bytes_round_trip() {
        let rows = vec![record("GHG Emissions", 120.0, "acme.pdf", 0.8)];
        let bytes = csv_bytes(&rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("kpi_name,value,unit"));
        assert!(text.contains("GHG Emissions,120.0,tons,acme.pdf"));
    }

    #[test]
    fn xlsx_bytes_produces_workbook() {
        let rows = vec![record("GHG Emissions", 120.0, "acme.pdf", 0.8)];
        let bytes = xlsx_bytes(&rows).unwrap();
        // XLSX is a ZIP container.
        assert_eq!(&bytes[0..2], b"PK");
    }
}
