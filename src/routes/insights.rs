use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::stats::{self, CompareBy};

const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Deserialize)]
pub struct ConfidenceQuery {
    pub min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct ComparisonQuery {
    /// Comma-separated company (source file) names.
    pub companies: Option<String>,
    pub compare_by: Option<String>,
    pub min_confidence: Option<f32>,
}

pub async fn get_statistics(State(state): State<AppState>) -> Json<stats::Statistics> {
    let records = state.store.all().await;
    Json(stats::statistics(&records))
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    Query(query): Query<ConfidenceQuery>,
) -> Json<stats::Dashboard> {
    let min_confidence = query.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);
    let records = state.store.all().await;
    Json(stats::dashboard(&records, min_confidence))
}

pub async fn get_companies(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.companies().await)
}

pub async fn get_company(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ConfidenceQuery>,
) -> ApiResult<Json<stats::CompanyView>> {
    let records = state.store.all().await;
    if records.is_empty() {
        return Err(ApiError::NotFound("No data available".to_string()));
    }

    let min_confidence = query.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);
    stats::company_view(&records, &name, min_confidence)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Company not found".to_string()))
}

pub async fn get_comparison(
    State(state): State<AppState>,
    Query(query): Query<ComparisonQuery>,
) -> ApiResult<Json<stats::Comparison>> {
    let records = state.store.all().await;
    if records.is_empty() {
        return Err(ApiError::NotFound("No data available".to_string()));
    }

    let companies: Vec<String> = query
        .companies
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if companies.is_empty() {
        return Err(ApiError::Validation("No companies selected".to_string()));
    }

    let compare_by = CompareBy::parse(query.compare_by.as_deref().unwrap_or("topic_fr"));
    let min_confidence = query.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);

    stats::comparison(&records, &companies, compare_by, min_confidence)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No data for selected companies".to_string()))
}
