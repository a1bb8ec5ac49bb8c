use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding model returned no vectors")]
    EmptyResponse,

    #[error("embedding model returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Sentence embedding client backed by Ollama's embeddings API.
///
/// Vectors are L2-normalized on receipt so similarity reduces to a dot
/// product downstream.
pub struct EmbeddingClient {
    client: Ollama,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request =
            GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::from(text));
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EmbedError::Request(e.to_string()))?;

        let mut vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse)?;
        normalize(&mut vector);
        Ok(vector)
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = GenerateEmbeddingsRequest::new(
            self.model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EmbedError::Request(e.to_string()))?;

        let mut vectors = response.embeddings;
        if vectors.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        for vector in &mut vectors {
            normalize(vector);
        }
        debug!("embedded {} texts with {}", vectors.len(), self.model);
        Ok(vectors)
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two vectors of equal length.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Indices of the `k` largest scores, highest first.
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.truncate(k);
    indices
}

pub(crate) fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon) = url.rfind(':') {
        if let Ok(port) = url[colon + 1..].parse::<u16>() {
            return (url[..colon].to_string(), port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.2, 0.5, 0.8];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_vector() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn top_k_returns_highest_first() {
        let scores = vec![0.1, 0.9, 0.4, 0.7];
        assert_eq!(top_k(&scores, 3), vec![1, 3, 2]);
    }

    #[test]
    fn top_k_with_k_beyond_len() {
        let scores = vec![0.3, 0.6];
        assert_eq!(top_k(&scores, 5), vec![1, 0]);
    }

    #[test]
    fn parse_host_port_splits_explicit_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_defaults_when_missing() {
        let (host, port) = parse_host_port("http://ollama.internal/");
        assert_eq!(host, "http://ollama.internal");
        assert_eq!(port, 11434);
    }
}
