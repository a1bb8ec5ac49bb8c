use axum::extract::State;
use axum::Json;

use super::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ollama = if state.chat.probe().await {
        "connected"
    } else {
        "disconnected"
    };

    Json(serde_json::json!({
        "status": "healthy",
        "message": "ESG KPI extractor API is running",
        "ollama": ollama
    }))
}
