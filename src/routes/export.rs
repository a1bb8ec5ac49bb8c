use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::store;
use crate::types::ExtractedKpi;

const CSV_MIME: &str = "text/csv";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub async fn export_csv(State(state): State<AppState>) -> ApiResult<Response> {
    let records = state.store.all().await;
    if records.is_empty() {
        return Err(ApiError::NotFound("No data to export".to_string()));
    }
    attachment(CSV_MIME, "esg_kpis_export.csv", store::csv_bytes(&records)?)
}

pub async fn export_excel(State(state): State<AppState>) -> ApiResult<Response> {
    let records = state.store.all().await;
    if records.is_empty() {
        return Err(ApiError::NotFound("No data to export".to_string()));
    }
    attachment(XLSX_MIME, "esg_kpis_export.xlsx", store::xlsx_bytes(&records)?)
}

pub async fn export_company(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    if state.store.is_empty().await {
        return Err(ApiError::NotFound("No data available".to_string()));
    }

    let records: Vec<ExtractedKpi> = state.store.for_company(&name).await;
    if records.is_empty() {
        return Err(ApiError::NotFound("Company not found".to_string()));
    }

    let stem = filename_stem(&name);
    match query.format.as_deref() {
        Some("excel") | Some("xlsx") => attachment(
            XLSX_MIME,
            &format!("{stem}_kpis.xlsx"),
            store::xlsx_bytes(&records)?,
        ),
        _ => attachment(
            CSV_MIME,
            &format!("{stem}_kpis.csv"),
            store::csv_bytes(&records)?,
        ),
    }
}

fn attachment(mime: &str, filename: &str, bytes: Vec<u8>) -> ApiResult<Response> {
    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Source file names double as company identifiers; strip the extension and
/// anything a Content-Disposition header would choke on.
fn filename_stem(name: &str) -> String {
    let stem = name.strip_suffix(".pdf").unwrap_or(name);
    stem.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_stem_strips_extension_and_specials() {
        assert_eq!(filename_stem("acme_2024.pdf"), "acme_2024");
        assert_eq!(filename_stem("weird name/\".pdf"), "weird_name__");
    }
}
