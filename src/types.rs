use serde::{Deserialize, Serialize};

/// One extracted KPI observation, as persisted in the flat-file store.
///
/// Records are append-only: a PDF run can add rows but nothing ever deletes
/// them. The deduplication key is `(kpi_name, value, unit, source_file)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedKpi {
    pub kpi_name: String,
    pub value: f64,
    pub unit: String,
    pub source_file: String,
    pub topic: String,
    pub topic_fr: String,
    /// Criticality rating carried over from the KPI reference file, opaque.
    pub score: String,
    pub confidence: f32,
    pub extraction_date: String,
}

impl ExtractedKpi {
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kpi_name, self.value, self.unit, self.source_file
        )
    }
}

/// A candidate numeric value pulled out of a sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueHit {
    pub value: f64,
    pub unit: String,
}

/// A sentence matched to a KPI label, with its cosine similarity score.
#[derive(Debug, Clone)]
pub struct SentenceMatch {
    pub sentence: String,
    pub score: f32,
}

pub fn extraction_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
