use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chat;
mod embedding;
mod error;
mod matcher;
mod pdf;
mod pipeline;
mod reference;
mod routes;
mod stats;
mod store;
mod types;
mod values;

use chat::ChatService;
use embedding::EmbeddingClient;
use pipeline::Extractor;
use routes::AppState;
use store::KpiStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "esg_bench_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ESG KPI extractor API...");

    dotenv::dotenv().ok();

    let data_dir =
        PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
    let uploads_dir = data_dir.join("uploads");
    std::fs::create_dir_all(&uploads_dir)?;

    let ollama_url =
        std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let chat_model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "mistral".to_string());
    let embedding_model =
        std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "all-minilm".to_string());

    let store = Arc::new(KpiStore::open(&data_dir)?);
    let embedder = Arc::new(EmbeddingClient::new(&ollama_url, embedding_model));
    let extractor = Arc::new(Extractor::new(embedder.clone()));

    let chat = Arc::new(ChatService::new(&ollama_url, chat_model));
    if chat.probe().await {
        info!("Chatbot running in model-backed mode ({})", chat.model());
    } else {
        info!(
            "Ollama not reachable at {} - chatbot will use fallback answers",
            ollama_url
        );
    }

    let state = AppState {
        store,
        chat,
        extractor,
        uploads_dir,
    };

    let app = routes::create_router(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "5000".to_string());
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
