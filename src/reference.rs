use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Reader};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("unsupported reference file format: {0}")]
    UnsupportedFormat(String),

    #[error("could not read reference file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse reference CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not read reference workbook: {0}")]
    Workbook(String),

    #[error("reference file has no rows")]
    NoRows,
}

/// One row of the KPI reference list.
#[derive(Debug, Clone)]
pub struct KpiEntry {
    pub name: String,
    pub name_fr: Option<String>,
    pub topic: String,
    pub topic_fr: String,
    pub score: String,
}

/// The KPI vocabulary uploaded alongside each PDF.
///
/// Labels hold the English names followed by the French ones; both are
/// embedded and matched against report sentences, and either resolves back
/// to its reference row for topic/score metadata.
#[derive(Debug)]
pub struct KpiReference {
    entries: Vec<KpiEntry>,
    labels: Vec<String>,
    label_entry: HashMap<String, usize>,
}

impl KpiReference {
    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "csv" => {
                let bytes = std::fs::read(path)?;
                Self::from_csv_bytes(&bytes)
            }
            "xlsx" | "xls" => Self::from_workbook(path),
            other => Err(ReferenceError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Parse CSV bytes. UTF-8 is tried first, then Windows-1252 (which also
    /// covers the Latin-1 exports the reference sheets come in).
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, ReferenceError> {
        let text = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
                decoded.into_owned()
            }
        };

        let delimiter = sniff_delimiter(&text);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }

        Self::from_rows(rows)
    }

    fn from_workbook(path: &Path) -> Result<Self, ReferenceError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| ReferenceError::Workbook(e.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ReferenceError::Workbook("workbook has no sheets".to_string()))?
            .map_err(|e| ReferenceError::Workbook(e.to_string()))?;

        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
            .collect();

        Self::from_rows(rows)
    }

    fn from_rows(mut rows: Vec<Vec<String>>) -> Result<Self, ReferenceError> {
        if rows.is_empty() {
            return Err(ReferenceError::NoRows);
        }
        let headers: Vec<String> = rows.remove(0).iter().map(|h| h.to_lowercase()).collect();

        // A previously exported results file is a valid vocabulary source:
        // its kpi_name column becomes the label list.
        let kpi_name_idx = headers.iter().position(|h| h == "kpi_name");
        let value_idx = headers.iter().position(|h| h == "value");
        if let (Some(name_idx), Some(_)) = (kpi_name_idx, value_idx) {
            debug!("reference file looks like a results export");
            return Ok(Self::from_results_rows(&rows, name_idx));
        }

        let columns = detect_columns(&headers);
        debug!(?columns, "detected reference columns");

        let mut entries = Vec::new();
        for row in &rows {
            let name = cell(row, columns.name).unwrap_or_default();
            let name_fr = cell(row, columns.name_fr).filter(|s| !s.is_empty());
            if name.is_empty() && name_fr.is_none() {
                continue;
            }
            entries.push(KpiEntry {
                name,
                name_fr,
                topic: cell_or(row, columns.topic, "Unknown"),
                topic_fr: cell_or(row, columns.topic_fr, "Inconnu"),
                score: cell_or(row, columns.score, "Unknown"),
            });
        }

        Ok(Self::index(entries))
    }

    fn from_results_rows(rows: &[Vec<String>], name_idx: usize) -> Self {
        let mut entries = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            if let Some(name) = cell(row, Some(name_idx)) {
                if !name.is_empty() && seen.insert(name.clone()) {
                    entries.push(KpiEntry {
                        name,
                        name_fr: None,
                        topic: "Unknown".to_string(),
                        topic_fr: "Inconnu".to_string(),
                        score: "Unknown".to_string(),
                    });
                }
            }
        }
        Self::index(entries)
    }

    /// Build the label list: unique English names first, then French names
    /// that are not already present.
    fn index(entries: Vec<KpiEntry>) -> Self {
        let mut labels = Vec::new();
        let mut label_entry = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            if !entry.name.is_empty() && !label_entry.contains_key(&entry.name) {
                label_entry.insert(entry.name.clone(), idx);
                labels.push(entry.name.clone());
            }
        }
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(fr) = &entry.name_fr {
                if !label_entry.contains_key(fr) {
                    label_entry.insert(fr.clone(), idx);
                    labels.push(fr.clone());
                }
            }
        }

        info!("loaded {} KPI labels from reference file", labels.len());
        Self {
            entries,
            labels,
            label_entry,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn metadata_for(&self, label: &str) -> Option<&KpiEntry> {
        self.label_entry.get(label).map(|&idx| &self.entries[idx])
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ColumnLayout {
    name: Option<usize>,
    name_fr: Option<usize>,
    topic: Option<usize>,
    topic_fr: Option<usize>,
    score: Option<usize>,
}

/// Header-based column detection with positional fallback, matching the
/// loose conventions the reference sheets actually use.
fn detect_columns(headers: &[String]) -> ColumnLayout {
    let mut layout = ColumnLayout::default();

    for (idx, header) in headers.iter().enumerate() {
        let is_kpi_name = header.contains("kpi") && header.contains("name");
        if is_kpi_name && !header.contains("fr") && layout.name.is_none() {
            layout.name = Some(idx);
        } else if is_kpi_name && header.contains("fr") && layout.name_fr.is_none() {
            layout.name_fr = Some(idx);
        } else if header.contains("topic") && header.contains("fr") && layout.topic_fr.is_none() {
            layout.topic_fr = Some(idx);
        } else if header.contains("topic") && layout.topic.is_none() {
            layout.topic = Some(idx);
        } else if header.contains("score") && layout.score.is_none() {
            layout.score = Some(idx);
        }
    }

    // Looser name heuristics, then positional defaults.
    if layout.name.is_none() {
        layout.name = headers
            .iter()
            .position(|h| h.contains("name") && !h.contains("fr"));
    }
    if layout.name_fr.is_none() {
        layout.name_fr = headers.iter().position(|h| h.contains("nom"));
    }
    if layout.name.is_none() && !headers.is_empty() {
        layout.name = Some(0);
    }
    if layout.name_fr.is_none() && headers.len() > 1 {
        layout.name_fr = Some(1);
    }
    if layout.topic.is_none() && headers.len() > 2 {
        layout.topic = Some(2);
    }
    if layout.topic_fr.is_none() && headers.len() > 3 {
        layout.topic_fr = Some(3);
    }
    if layout.score.is_none() && headers.len() > 4 {
        layout.score = Some(4);
    }

    layout
}

fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn cell(row: &[String], idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i)).map(|s| s.trim().to_string())
}

fn cell_or(row: &[String], idx: Option<usize>, default: &str) -> String {
    match cell(row, idx) {
        Some(s) if !s.is_empty() => s,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_semicolon_delimited_reference() {
        let csv = "kpi_name;kpi_name_fr;topic;topic_fr;score\n\
                   GHG Emissions;Émissions de GES;Environment;Environnement;A+\n\
                   Gender Diversity;Diversité de genre;Social;Social;A\n";
        let reference = KpiReference::from_csv_bytes(csv.as_bytes()).unwrap();

        assert_eq!(reference.len(), 4);
        assert_eq!(reference.labels()[0], "GHG Emissions");
        assert_eq!(reference.labels()[2], "Émissions de GES");

        let entry = reference.metadata_for("GHG Emissions").unwrap();
        assert_eq!(entry.topic, "Environment");
        assert_eq!(entry.score, "A+");

        // French label resolves to the same row.
        let entry_fr = reference.metadata_for("Émissions de GES").unwrap();
        assert_eq!(entry_fr.topic_fr, "Environnement");
    }

    #[test]
    fn decodes_latin1_bytes() {
        let mut bytes = b"kpi_name;kpi_name_fr\nWater Usage;Consommation d'".to_vec();
        bytes.push(0xE9); // é in Latin-1
        bytes.extend_from_slice(b"au\n");

        let reference = KpiReference::from_csv_bytes(&bytes).unwrap();
        assert!(reference
            .labels()
            .iter()
            .any(|l| l == "Consommation d'éau"));
    }

    #[test]
    fn detects_results_export_as_vocabulary() {
        let csv = "kpi_name,value,unit,source_file\n\
                   GHG Emissions,120.5,tCO2e,acme.pdf\n\
                   GHG Emissions,99.0,tCO2e,other.pdf\n\
                   Water Usage,400,m³,acme.pdf\n";
        let reference = KpiReference::from_csv_bytes(csv.as_bytes()).unwrap();

        assert_eq!(reference.len(), 2);
        assert_eq!(reference.metadata_for("Water Usage").unwrap().topic, "Unknown");
    }

    #[test]
    fn falls_back_to_positional_columns() {
        let csv = "indicator,indicateur,domain\nBoard Independence,Indépendance du conseil,Governance\n";
        let reference = KpiReference::from_csv_bytes(csv.as_bytes()).unwrap();

        // "indicator" has no kpi/name marker, so column 0 is assumed, and the
        // third column is taken positionally as the topic.
        assert!(reference.labels().contains(&"Board Independence".to_string()));
        let entry = reference.metadata_for("Board Independence").unwrap();
        assert_eq!(entry.topic, "Governance");
        assert_eq!(entry.topic_fr, "Inconnu");
    }

    #[test]
    fn skips_blank_rows() {
        let csv = "kpi_name;kpi_name_fr\nGHG Emissions;GES\n;\n;\nWater Usage;Eau\n";
        let reference = KpiReference::from_csv_bytes(csv.as_bytes()).unwrap();
        assert_eq!(reference.len(), 4);
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(matches!(
            KpiReference::from_csv_bytes(b""),
            Err(ReferenceError::NoRows)
        ));
    }

    #[test]
    fn reads_xlsx_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kpis.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "kpi_name").unwrap();
        sheet.write_string(0, 1, "kpi_name_fr").unwrap();
        sheet.write_string(0, 2, "topic").unwrap();
        sheet.write_string(1, 0, "Energy Consumption").unwrap();
        sheet.write_string(1, 1, "Consommation d'énergie").unwrap();
        sheet.write_string(1, 2, "Environment").unwrap();
        workbook.save(&path).unwrap();

        let reference = KpiReference::load(&path).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(
            reference.metadata_for("Energy Consumption").unwrap().topic,
            "Environment"
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = KpiReference::load(Path::new("kpis.docx")).unwrap_err();
        assert!(matches!(err, ReferenceError::UnsupportedFormat(_)));
    }
}
