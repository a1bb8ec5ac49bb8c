use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use super::AppState;
use crate::chat::{build_store_context, CompanyInfo};
use crate::error::{ApiError, ApiResult};
use crate::types::ExtractedKpi;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct InsightRequest {
    pub message: String,
    pub company_name: Option<String>,
    /// Records extracted through `/api/chat-upload-pdf`, echoed back by the
    /// client so the answer can use them without persisting anything.
    pub pdf_data: Option<Vec<ExtractedKpi>>,
}

#[derive(Debug, Deserialize)]
pub struct BenchmarkRequest {
    pub companies: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationsRequest {
    pub company_name: Option<String>,
}

/// `GET /api/chatbot/models`
pub async fn get_models(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let models = state.chat.list_models().await?;
    Ok(Json(serde_json::json!({
        "models": models,
        "current_model": state.chat.model()
    })))
}

/// `GET /api/chatbot/context`
pub async fn get_context(State(state): State<AppState>) -> Json<serde_json::Value> {
    let records = state.store.all().await;
    Json(serde_json::json!({ "context": build_store_context(&records) }))
}

/// `POST /api/chatbot/chat`
pub async fn chatbot_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::Validation("Question is required".to_string()));
    }

    let records = state.store.all().await;
    let context = build_store_context(&records);
    let response = state.chat.answer(&question, &context).await;

    Ok(Json(serde_json::json!({
        "question": question,
        "response": response,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// `POST /api/esg-chat`: analyst insight over the store, optionally scoped
/// to one company and augmented with inline PDF extraction results.
pub async fn esg_chat(
    State(state): State<AppState>,
    Json(request): Json<InsightRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::Validation("Empty message".to_string()));
    }

    let mut records = state.store.all().await;
    let pdf_data_included = request.pdf_data.is_some();
    if let Some(pdf_data) = request.pdf_data {
        debug!("merging {} inline PDF records into chat context", pdf_data.len());
        records.extend(pdf_data);
    }

    let slice: Vec<ExtractedKpi> = match &request.company_name {
        Some(company) => records
            .iter()
            .filter(|r| &r.source_file == company)
            .cloned()
            .collect(),
        None => records,
    };

    let company_info = match &request.company_name {
        Some(company) => CompanyInfo {
            company: company.clone(),
            total_kpis: slice.len(),
            main_topic: main_topic(&slice),
        },
        None if pdf_data_included => CompanyInfo {
            company: "Uploaded PDF".to_string(),
            total_kpis: slice.len(),
            main_topic: "Live analysis".to_string(),
        },
        None => CompanyInfo::default(),
    };

    let response = state.chat.insight(&slice, &company_info, &message).await;

    Ok(Json(serde_json::json!({
        "response": response,
        "company": request.company_name.unwrap_or_else(|| "Uploaded PDF".to_string()),
        "ai_used": state.chat.is_available(),
        "pdf_data_included": pdf_data_included,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// `POST /api/esg-benchmark`: comparative narrative across companies.
pub async fn esg_benchmark(
    State(state): State<AppState>,
    Json(request): Json<BenchmarkRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let selected = match request.companies {
        Some(companies) if !companies.is_empty() => companies,
        _ => state.store.companies().await,
    };
    if selected.is_empty() {
        return Err(ApiError::NotFound("No data available".to_string()));
    }

    let mut per_company: BTreeMap<String, Vec<ExtractedKpi>> = BTreeMap::new();
    for company in &selected {
        let records = state.store.for_company(company).await;
        if !records.is_empty() {
            per_company.insert(company.clone(), records);
        }
    }

    let analysis = state.chat.benchmark(&per_company).await;

    Ok(Json(serde_json::json!({
        "companies": per_company.keys().collect::<Vec<_>>(),
        "analysis": analysis,
        "ai_used": state.chat.is_available(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// `POST /api/esg-recommendations`: improvement recommendations for one
/// company, focused on its weakest indicators.
pub async fn esg_recommendations(
    State(state): State<AppState>,
    Json(request): Json<RecommendationsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let company = request
        .company_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::Validation("Company name is required".to_string()))?;

    let records = state.store.for_company(&company).await;
    if records.is_empty() {
        return Err(ApiError::NotFound("No data found for this company".to_string()));
    }

    let avg_confidence =
        records.iter().map(|r| r.confidence as f64).sum::<f64>() / records.len() as f64;
    let company_info = CompanyInfo {
        company: company.clone(),
        total_kpis: records.len(),
        main_topic: main_topic(&records),
    };
    let prompt = format!(
        "Analyse the ESG performance of {company} and propose specific improvement \
         recommendations, focusing on the areas with the lowest confidence scores and the \
         clearest improvement opportunities."
    );
    let recommendations = state.chat.insight(&records, &company_info, &prompt).await;

    Ok(Json(serde_json::json!({
        "company": company,
        "recommendations": recommendations,
        "total_kpis": records.len(),
        "avg_confidence": avg_confidence,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// `GET /api/chatbot-status`
pub async fn chatbot_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ollama_available": state.chat.is_available(),
        "current_model": state.chat.model()
    }))
}

/// Most frequent `topic_fr` in a record slice.
fn main_topic(records: &[ExtractedKpi]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.topic_fr.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(topic, _)| topic.to_string())
        .unwrap_or_else(|| "Not specified".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic_fr: &str) -> ExtractedKpi {
        ExtractedKpi {
            kpi_name: "GHG Emissions".to_string(),
            value: 1.0,
            unit: "tCO2e".to_string(),
            source_file: "acme.pdf".to_string(),
            topic: "Environment".to_string(),
            topic_fr: topic_fr.to_string(),
            score: "A".to_string(),
            confidence: 0.5,
            extraction_date: "2025-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn main_topic_picks_the_mode() {
        let records = vec![
            record("Environnement"),
            record("Environnement"),
            record("Social"),
        ];
        assert_eq!(main_topic(&records), "Environnement");
    }

    #[test]
    fn main_topic_on_empty_slice() {
        assert_eq!(main_topic(&[]), "Not specified");
    }
}
