//! Main Entrypoint for the Tutor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading persona prompts and the concept content file.
//! 3. Initializing shared services (the LLM client and session factory).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tutor_api::{
    config::{Config, Provider},
    router::create_router,
    state::AppState,
};
use tutor_core::{
    concept::ConceptStore,
    llm_client::{LLMClient, OpenAICompatibleClient},
    persona::PersonaPrompts,
    session::SessionFactory,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads every `*.md` file in a directory, keyed by file stem.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts directory {}", prompts_path.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Prompts and Content ---
    let prompts = load_prompts(&config.prompts_path)?;
    let prompts = PersonaPrompts::from_map(&prompts)?;
    let concepts = Arc::new(ConceptStore::load(&config.content_path)?);
    let session_factory = Arc::new(SessionFactory::new(prompts, config.voices.clone()));

    // --- 4. Initialize Shared Services ---
    let (api_key, api_base) = match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            (
                config.openai_api_key.as_ref().context("OPENAI_API_KEY is not set")?,
                "https://api.openai.com/v1/",
            )
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            (
                config.gemini_api_key.as_ref().context("GEMINI_API_KEY is not set")?,
                "https://generativelanguage.googleapis.com/v1beta/openai",
            )
        }
    };
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base);
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let app_state = Arc::new(AppState {
        concepts,
        session_factory,
        llm_client,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
