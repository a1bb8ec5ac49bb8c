use std::path::PathBuf;

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::ExtractOptions;
use crate::reference::KpiReference;

const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "csv", "xlsx", "xls"];

/// Multipart upload carrying a KPI reference file and a PDF report.
#[derive(Default)]
struct ProcessUpload {
    kpi_file: Option<(String, Bytes)>,
    pdf_file: Option<(String, Bytes)>,
    min_confidence: Option<f32>,
    rerun_if_exists: bool,
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<ProcessUpload> {
    let mut upload = ProcessUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart payload: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "kpi_file" | "pdf_file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("could not read {name}: {e}")))?;
                if name == "kpi_file" {
                    upload.kpi_file = Some((filename, data));
                } else {
                    upload.pdf_file = Some((filename, data));
                }
            }
            "min_confidence" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("invalid min_confidence: {e}")))?;
                upload.min_confidence = text.trim().parse::<f32>().ok();
            }
            "rerun_if_exists" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("invalid rerun_if_exists: {e}")))?;
                upload.rerun_if_exists = text.trim().eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    Ok(upload)
}

fn validated_filename(filename: &str, field: &str) -> ApiResult<String> {
    if filename.is_empty() {
        return Err(ApiError::Validation(format!("No selected file for {field}")));
    }
    let sanitized = sanitize_filename(filename);
    let extension = sanitized.rsplit('.').next().unwrap_or("").to_lowercase();
    if !sanitized.contains('.') || !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::UnsupportedFileType(filename.to_string()));
    }
    Ok(sanitized)
}

/// Keep only filesystem-safe characters; path separators collapse to `_`.
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    async fn write(dir: &std::path::Path, filename: &str, data: &Bytes) -> ApiResult<Self> {
        let path = dir.join(format!("{}_{}", Uuid::new_v4(), filename));
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| ApiError::Internal(format!("could not stage upload: {e}")))?;
        Ok(Self { path })
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("could not remove staged upload {:?}: {}", self.path, e);
        }
    }
}

/// `POST /api/process`: run the full extraction pipeline over one PDF and
/// merge the results into the store.
pub async fn process_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let upload = read_upload(multipart).await?;

    let (kpi_name, kpi_data) = upload
        .kpi_file
        .ok_or_else(|| ApiError::Validation("KPI file and PDF file are required".to_string()))?;
    let (pdf_name, pdf_data) = upload
        .pdf_file
        .ok_or_else(|| ApiError::Validation("KPI file and PDF file are required".to_string()))?;

    let kpi_name = validated_filename(&kpi_name, "kpi_file")?;
    let pdf_name = validated_filename(&pdf_name, "pdf_file")?;
    let min_confidence = upload.min_confidence.unwrap_or(0.3);

    info!(
        "processing request: kpi={} pdf={} min_confidence={}",
        kpi_name, pdf_name, min_confidence
    );

    if state.store.has_source(&pdf_name).await && !upload.rerun_if_exists {
        warn!("{} was already processed, skipping", pdf_name);
        return Ok(Json(serde_json::json!({
            "warning": format!("PDF {pdf_name} was already processed"),
            "processed": false
        })));
    }

    let kpi_staged = StagedFile::write(&state.uploads_dir, &kpi_name, &kpi_data).await?;
    let pdf_staged = StagedFile::write(&state.uploads_dir, &pdf_name, &pdf_data).await?;

    let reference = KpiReference::load(&kpi_staged.path)?;
    if reference.is_empty() {
        return Err(ApiError::Validation(
            "No KPIs found in the KPI file".to_string(),
        ));
    }

    let options = ExtractOptions {
        min_confidence,
        ..ExtractOptions::default()
    };
    let results = state
        .extractor
        .process_pdf(&pdf_staged.path, &pdf_name, &reference, &options)
        .await?;

    let mut response = serde_json::json!({
        "processed": true,
        "pdf_name": pdf_name,
        "kpis_loaded": reference.len(),
        "new_kpis_extracted": results.len(),
        "results": results
    });

    if !results.is_empty() {
        let total = state.store.append(results).await?;
        response["total_kpis"] = serde_json::json!(total);
    }

    Ok(Json(response))
}

/// `POST /api/chat-upload-pdf`: fast-path extraction for PDFs dropped into
/// the chat. Results are returned inline and never persisted.
pub async fn chat_upload_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let upload = read_upload(multipart).await?;

    let (kpi_name, kpi_data) = upload
        .kpi_file
        .ok_or_else(|| ApiError::Validation("PDF file and KPI file are required".to_string()))?;
    let (pdf_name, pdf_data) = upload
        .pdf_file
        .ok_or_else(|| ApiError::Validation("PDF file and KPI file are required".to_string()))?;

    let kpi_name = validated_filename(&kpi_name, "kpi_file")?;
    let pdf_name = validated_filename(&pdf_name, "pdf_file")?;

    let kpi_staged = StagedFile::write(&state.uploads_dir, &kpi_name, &kpi_data).await?;
    let pdf_staged = StagedFile::write(&state.uploads_dir, &pdf_name, &pdf_data).await?;

    let reference = KpiReference::load(&kpi_staged.path)?;
    if reference.is_empty() {
        return Err(ApiError::Validation(
            "No KPIs found in the KPI file".to_string(),
        ));
    }

    let results = state
        .extractor
        .process_pdf(&pdf_staged.path, &pdf_name, &reference, &ExtractOptions::chat())
        .await?;

    let high_confidence = results.iter().filter(|r| r.confidence > 0.7).count();
    let mut domains: Vec<&str> = results.iter().map(|r| r.topic_fr.as_str()).collect();
    domains.sort_unstable();
    domains.dedup();

    info!("chat upload processed: {} KPIs from {}", results.len(), pdf_name);

    Ok(Json(serde_json::json!({
        "success": true,
        "pdf_name": pdf_name,
        "kpis_extracted": results.len(),
        "summary": {
            "total_kpis": results.len(),
            "high_confidence": high_confidence,
            "domains": domains
        },
        "extracted_data": results
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("report 2024.pdf"), "report_2024.pdf");
    }

    #[test]
    fn validated_filename_accepts_known_extensions() {
        assert!(validated_filename("report.pdf", "pdf_file").is_ok());
        assert!(validated_filename("kpis.XLSX", "kpi_file").is_ok());
    }

    #[test]
    fn validated_filename_rejects_unknown_or_missing() {
        assert!(matches!(
            validated_filename("run.exe", "pdf_file"),
            Err(ApiError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            validated_filename("", "pdf_file"),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validated_filename("no_extension", "pdf_file"),
            Err(ApiError::UnsupportedFileType(_))
        ));
    }
}
