use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::EmbeddingClient;
use crate::error::ApiError;
use crate::matcher::{find_relevant_kpis, MatcherConfig};
use crate::pdf;
use crate::reference::KpiReference;
use crate::types::{extraction_timestamp, ExtractedKpi};
use crate::values::{filter_results, ValueExtractor};

/// Tuning for one extraction run.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub min_confidence: f32,
    pub threshold: f32,
    /// Best-scoring sentences considered per matched KPI.
    pub sentences_per_kpi: usize,
    /// Values kept per sentence; the chat fast path caps this at one.
    pub values_per_sentence: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            threshold: 0.4,
            sentences_per_kpi: 3,
            values_per_sentence: usize::MAX,
        }
    }
}

impl ExtractOptions {
    /// Faster, looser settings for PDFs uploaded inside a chat turn.
    pub fn chat() -> Self {
        Self {
            min_confidence: 0.3,
            threshold: 0.3,
            sentences_per_kpi: 2,
            values_per_sentence: 1,
        }
    }
}

/// End-to-end extraction: PDF text → sentence/KPI matching → value capture
/// → metadata enrichment → filtering.
pub struct Extractor {
    embedder: Arc<EmbeddingClient>,
    values: ValueExtractor,
}

impl Extractor {
    pub fn new(embedder: Arc<EmbeddingClient>) -> Self {
        Self {
            embedder,
            values: ValueExtractor::new(),
        }
    }

    pub async fn process_pdf(
        &self,
        pdf_path: &Path,
        source_file: &str,
        reference: &KpiReference,
        options: &ExtractOptions,
    ) -> Result<Vec<ExtractedKpi>, ApiError> {
        info!("processing {}", source_file);

        let text = pdf::extract_text(pdf_path).await?;
        debug!("extracted {} chars from {}", text.len(), source_file);

        let label_embeddings = self.embedder.embed_batch(reference.labels()).await?;

        let matcher_config = MatcherConfig {
            threshold: options.threshold,
            ..MatcherConfig::default()
        };
        let relevant =
            find_relevant_kpis(&text, &self.embedder, reference, &label_embeddings, &matcher_config)
                .await?;

        let extraction_date = extraction_timestamp();
        let mut results = Vec::new();

        for (kpi_name, mut matches) in relevant {
            matches.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for sentence_match in matches.iter().take(options.sentences_per_kpi) {
                let hits = self.values.extract(&sentence_match.sentence, &kpi_name);
                debug!(
                    "{}: '{}' -> {} values",
                    kpi_name,
                    truncate(&sentence_match.sentence, 80),
                    hits.len()
                );

                for hit in hits.into_iter().take(options.values_per_sentence) {
                    let entry = reference.metadata_for(&kpi_name);
                    results.push(ExtractedKpi {
                        kpi_name: kpi_name.clone(),
                        value: hit.value,
                        unit: hit.unit,
                        source_file: source_file.to_string(),
                        topic: entry.map(|e| e.topic.clone()).unwrap_or_else(|| "Unknown".to_string()),
                        topic_fr: entry
                            .map(|e| e.topic_fr.clone())
                            .unwrap_or_else(|| "Inconnu".to_string()),
                        score: entry
                            .map(|e| e.score.clone())
                            .unwrap_or_else(|| "Unknown".to_string()),
                        confidence: sentence_match.score,
                        extraction_date: extraction_date.clone(),
                    });
                }
            }
        }

        let filtered = filter_results(results, options.min_confidence);
        info!("{} KPIs kept for {} after filtering", filtered.len(), source_file);
        Ok(filtered)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_api_defaults() {
        let options = ExtractOptions::default();
        assert_eq!(options.min_confidence, 0.3);
        assert_eq!(options.threshold, 0.4);
        assert_eq!(options.sentences_per_kpi, 3);
    }

    #[test]
    fn chat_options_are_looser_and_capped() {
        let options = ExtractOptions::chat();
        assert_eq!(options.threshold, 0.3);
        assert_eq!(options.sentences_per_kpi, 2);
        assert_eq!(options.values_per_sentence, 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("émissions de GES", 9), "émissions");
        assert_eq!(truncate("short", 80), "short");
    }
}
