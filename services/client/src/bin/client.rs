//! services/client/src/bin/client.rs

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use client_lib::{
    adapters::{
        MemoryAuth, MemoryStore, OpenAiChatAdapter, PgAuthProvider, PgDocumentStore,
        VeoVideoAdapter,
    },
    app::{AppState, CredentialPrompt, Flow, Shell, StudyApp},
    config::Config,
    error::ClientError,
};
use sqlx::postgres::PgPoolOptions;
use std::io::Write;
use std::sync::Arc;
use study_sync_core::ports::{AuthProvider, ChatService, DocumentStore, VideoService};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type InputLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

/// Asks for the current password on the same input the commands come from.
struct StdinPrompt {
    lines: InputLines,
}

#[async_trait]
impl CredentialPrompt for StdinPrompt {
    async fn current_password(&self) -> Option<String> {
        print!("Please re-enter your current password to continue: ");
        std::io::stdout().flush().ok()?;
        let line = self.lines.lock().await.next_line().await.ok()??;
        let password = line.trim().to_string();
        (!password.is_empty()).then_some(password)
    }
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting client...");

    // --- 2. Connect the Document Store & Auth Provider ---
    let (store, auth): (Arc<dyn DocumentStore>, Arc<dyn AuthProvider>) = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let store = PgDocumentStore::new(db_pool.clone());
            info!("Running database migrations...");
            store.run_migrations().await?;
            info!("Database migrations complete.");
            (
                Arc::new(store),
                Arc::new(PgAuthProvider::new(db_pool, config.recent_login_window)),
            )
        }
        None => {
            warn!("DATABASE_URL is not set; running against the in-memory store. Nothing will be persisted.");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryAuth::new(config.recent_login_window)),
            )
        }
    };

    // --- 3. Initialize Generative Service Adapters ---
    let chat = config.openai_api_key.as_ref().map(|api_key| {
        let openai_client = Client::with_config(OpenAIConfig::new().with_api_key(api_key));
        Arc::new(OpenAiChatAdapter::new(openai_client, config.chat_model.clone()))
            as Arc<dyn ChatService>
    });
    if chat.is_none() {
        warn!("OPENAI_API_KEY is not set; the tutor is disabled.");
    }
    let video = config.gemini_api_key.as_ref().map(|api_key| {
        Arc::new(VeoVideoAdapter::new(api_key.clone(), config.video_model.clone()))
            as Arc<dyn VideoService>
    });
    if video.is_none() {
        warn!("GEMINI_API_KEY is not set; video generation is disabled.");
    }

    // --- 4. Build the App & Follow the Auth Session ---
    let app = StudyApp::new(AppState { store, auth, chat, video, config: config.clone() });
    let shutdown = CancellationToken::new();
    let coordinator = app.start(shutdown.clone());
    let mut shell = Shell::new(app);

    // --- 5. Run the Command Loop ---
    let lines: InputLines = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let prompt = StdinPrompt { lines: Arc::clone(&lines) };
    println!("Type 'help' for a list of commands.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = match lines.lock().await.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let mut stdout = std::io::stdout();
        if shell.handle(&line, &prompt, &mut stdout).await? == Flow::Quit {
            break;
        }
    }

    shutdown.cancel();
    coordinator
        .await
        .map_err(|e| ClientError::Internal(e.to_string()))?;
    info!("Client stopped.");
    Ok(())
}
