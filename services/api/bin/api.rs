//! Main Entrypoint for the PsychTrainer API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Wiring the generation backend, prompts, retrieval and phase classifier.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use psychtrainer_api::{
    config::{ClassifierKind, Config},
    db::Db,
    router::create_router,
    state::AppState,
};
use psychtrainer_core::{
    Collaborators, OrchestratorSettings, TurnOrchestrator,
    llm_client::{LLMClient, OpenAICompatibleClient, ScriptedLLMClient},
    phase::{KeywordClassifier, LlmUtteranceClassifier, UtteranceClassifier},
    prompts::{DirectoryPromptRegistry, LayeredPromptRegistry, PromptRegistry},
    retrieval::{HttpRetrievalGateway, NoRetrieval, RetrievalGateway},
    store::SessionStore,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal. Shutting down gracefully..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

fn build_llm_client(config: &Config) -> anyhow::Result<Arc<dyn LLMClient>> {
    let Some(api_base) = config.provider.api_base() else {
        warn!("Using the scripted mock provider. Replies are canned.");
        return Ok(Arc::new(ScriptedLLMClient::new()));
    };
    let api_key = config
        .api_key()
        .with_context(|| format!("No API key configured for {:?}", config.provider))?;
    info!(provider = ?config.provider, "Using OpenAI-compatible provider.");
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base);
    Ok(Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    )))
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

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Collaborators ---
    let llm = build_llm_client(&config)?;

    // Database prompts win; the prompts directory and the built-in text back them up.
    let prompts: Arc<dyn PromptRegistry> = Arc::new(LayeredPromptRegistry::new(vec![
        db.clone() as Arc<dyn PromptRegistry>,
        Arc::new(DirectoryPromptRegistry::new(config.prompts_path.clone())),
    ]));

    let retrieval: Arc<dyn RetrievalGateway> = match &config.retrieval_url {
        Some(url) => {
            info!(url = %url, "Using HTTP retrieval gateway.");
            Arc::new(HttpRetrievalGateway::new(url.clone()))
        }
        None => {
            warn!("RETRIEVAL_URL not set. Prompts will carry no reference passages.");
            Arc::new(NoRetrieval)
        }
    };

    let classifier: Arc<dyn UtteranceClassifier> = match config.phase_classifier {
        ClassifierKind::Keyword => Arc::new(KeywordClassifier::new()),
        ClassifierKind::Llm => Arc::new(LlmUtteranceClassifier::new(llm.clone(), prompts.clone())),
    };

    let settings = OrchestratorSettings {
        retrieval_timeout: config.retrieval_timeout,
        grader_timeout: config.grader_timeout,
        classifier_timeout: config.classifier_timeout,
        risk_ceiling: config.risk_score_ceiling,
        ..OrchestratorSettings::default()
    };
    let orchestrator = TurnOrchestrator::new(
        Collaborators {
            store: db as Arc<dyn SessionStore>,
            llm,
            prompts,
            retrieval,
            classifier,
        },
        settings,
    );
    let app_state = Arc::new(AppState::new(orchestrator));

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
        classifier = ?config.phase_classifier,
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
