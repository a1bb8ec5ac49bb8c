pub mod chat;
pub mod export;
pub mod health;
pub mod insights;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::pipeline::Extractor;
use crate::store::KpiStore;

/// Uploads above this size are rejected outright.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<KpiStore>,
    pub chat: Arc<ChatService>,
    pub extractor: Arc<Extractor>,
    pub uploads_dir: PathBuf,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        // Extraction
        .route("/api/process", post(process::process_pdf))
        .route("/api/chat-upload-pdf", post(process::chat_upload_pdf))
        // Analytics
        .route("/api/statistics", get(insights::get_statistics))
        .route("/api/dashboard", get(insights::get_dashboard))
        .route("/api/companies", get(insights::get_companies))
        .route("/api/company/:name", get(insights::get_company))
        .route("/api/comparison", get(insights::get_comparison))
        // Exports
        .route("/api/export/csv", get(export::export_csv))
        .route("/api/export/excel", get(export::export_excel))
        .route("/api/export/company/:name", get(export::export_company))
        // Chatbot
        .route("/api/chatbot/models", get(chat::get_models))
        .route("/api/chatbot/context", get(chat::get_context))
        .route("/api/chatbot/chat", post(chat::chatbot_chat))
        .route("/api/esg-chat", post(chat::esg_chat))
        .route("/api/esg-benchmark", post(chat::esg_benchmark))
        .route("/api/esg-recommendations", post(chat::esg_recommendations))
        .route("/api/chatbot-status", get(chat::chatbot_status))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers(Any),
        )
}
