use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info};

use crate::embedding::{cosine, top_k, EmbedError, EmbeddingClient};
use crate::reference::KpiReference;
use crate::types::SentenceMatch;

/// Documents longer than this are split into chunks before segmentation.
const CHUNK_TRIGGER_CHARS: usize = 1_000_000;
const MAX_CHUNK_CHARS: usize = 500_000;

/// Sentences at or below this length carry no extractable KPI statement.
const MIN_SENTENCE_CHARS: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Cosine similarity floor for a sentence/label pair to count.
    pub threshold: f32,
    /// How many labels each sentence may match.
    pub labels_per_sentence: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            labels_per_sentence: 3,
        }
    }
}

/// Strip boilerplate lines before sentence segmentation: bare page numbers,
/// link footers, and fragments too short to mean anything.
pub fn clean_text(text: &str) -> String {
    let page_number = Regex::new(r"^\s*\d+\s*$").unwrap();
    let link_line = Regex::new(r"www\.\w+\.\w+").unwrap();

    text.lines()
        .filter(|line| {
            !page_number.is_match(line) && !link_line.is_match(line) && line.trim().len() >= 5
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split an oversized document into paragraph-aligned chunks, falling back
/// to sentence boundaries when a single paragraph exceeds the cap.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n") {
        if current.len() + paragraph.len() < max_chars {
            current.push_str(paragraph);
            current.push_str("\n\n");
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(paragraph);
            current.push_str("\n\n");
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.iter().any(|chunk| chunk.len() > max_chars) {
        let boundary = Regex::new(r"[.!?]+").unwrap();
        let mut refined = Vec::new();
        for chunk in chunks {
            if chunk.len() <= max_chars {
                refined.push(chunk);
                continue;
            }
            let mut current = String::new();
            for sentence in boundary.split(&chunk) {
                if current.len() + sentence.len() < max_chars {
                    current.push_str(sentence);
                    current.push_str(". ");
                } else {
                    if !current.is_empty() {
                        refined.push(std::mem::take(&mut current));
                    }
                    current.push_str(sentence);
                    current.push_str(". ");
                }
            }
            if !current.is_empty() {
                refined.push(current);
            }
        }
        return refined;
    }

    chunks
}

/// Segment text into sentences on `.`/`!`/`?` runs, dropping fragments.
pub fn split_sentences(text: &str) -> Vec<String> {
    let boundary = Regex::new(r"[.!?]+").unwrap();
    boundary
        .split(text)
        .map(|s| s.trim())
        .filter(|s| s.len() > MIN_SENTENCE_CHARS)
        .map(|s| s.to_string())
        .collect()
}

/// Match every sentence of `text` against the KPI vocabulary.
///
/// Each sentence is embedded once and compared against all label embeddings;
/// the top labels above the threshold collect the sentence. Per-label
/// sentence lists are deduplicated by sentence text.
pub async fn find_relevant_kpis(
    text: &str,
    embedder: &EmbeddingClient,
    reference: &KpiReference,
    label_embeddings: &[Vec<f32>],
    config: &MatcherConfig,
) -> Result<HashMap<String, Vec<SentenceMatch>>, EmbedError> {
    let cleaned = clean_text(text);
    debug!("cleaned report text: {} chars", cleaned.len());

    let chunks = if cleaned.len() > CHUNK_TRIGGER_CHARS {
        let chunks = split_into_chunks(&cleaned, MAX_CHUNK_CHARS);
        info!("split oversized report into {} chunks", chunks.len());
        chunks
    } else {
        vec![cleaned]
    };

    let mut relevant: HashMap<String, Vec<SentenceMatch>> = HashMap::new();

    for chunk in &chunks {
        let sentences = split_sentences(chunk);
        debug!("matching {} sentences against vocabulary", sentences.len());

        for sentence in sentences {
            let sentence_embedding = embedder.embed(&sentence).await?;
            let scores: Vec<f32> = label_embeddings
                .iter()
                .map(|label| cosine(&sentence_embedding, label))
                .collect();

            for idx in top_k(&scores, config.labels_per_sentence) {
                if scores[idx] <= config.threshold {
                    continue;
                }
                let label = &reference.labels()[idx];
                let matches = relevant.entry(label.clone()).or_default();
                if !matches.iter().any(|m| m.sentence == sentence) {
                    matches.push(SentenceMatch {
                        sentence: sentence.clone(),
                        score: scores[idx],
                    });
                }
            }
        }
    }

    info!("found {} KPI labels with matching sentences", relevant.len());
    Ok(relevant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_drops_page_numbers_and_links() {
        let text = "Our GHG emissions fell by 12% in 2024.\n42\n  7  \nSee www.example.com for details\nok\nShort\nTotal energy consumption was 500 MWh.";
        let cleaned = clean_text(text);

        assert!(cleaned.contains("GHG emissions"));
        assert!(cleaned.contains("energy consumption"));
        assert!(!cleaned.contains("42"));
        assert!(!cleaned.contains("www.example.com"));
        // "ok" is below the minimum line length.
        assert!(!cleaned.lines().any(|l| l == "ok"));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_into_chunks("small text", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "small text");
    }

    #[test]
    fn long_text_splits_on_paragraphs() {
        let paragraph = "a".repeat(400);
        let text = format!("{p}\n\n{p}\n\n{p}", p = paragraph);
        let chunks = split_into_chunks(&text, 900);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 900 + 2);
        }
    }

    #[test]
    fn giant_paragraph_splits_on_sentences() {
        let sentence = format!("{}. ", "word ".repeat(30));
        let text = sentence.repeat(20);
        let chunks = split_into_chunks(&text, 600);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 800, "chunk too large: {}", chunk.len());
        }
    }

    #[test]
    fn sentences_split_on_terminators() {
        let text = "Our total GHG emissions were 120 tons! Water usage decreased significantly this year? Done.";
        let sentences = split_sentences(text);

        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].starts_with("Our total GHG"));
    }

    #[test]
    fn short_fragments_are_dropped() {
        let sentences = split_sentences("Tiny. This sentence is long enough to keep around.");
        assert_eq!(sentences.len(), 1);
    }
}
