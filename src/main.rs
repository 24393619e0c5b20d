use std::path::Path;
use std::sync::Arc;

use keygate::{
    config::Config,
    database::Database,
    management::KeyManager,
    routes::{router, AppState},
    security::KeyCodec,
    verification::VerificationService,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    if let Some(parent) = Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }

    // Initialize database
    let db = Arc::new(Database::new(&config.database_path).expect("Failed to initialize database"));

    // Initialize services
    let codec = KeyCodec::new(config.key_environment.clone());
    let state = Arc::new(AppState {
        verifier: VerificationService::new(Arc::clone(&db), codec.clone()),
        manager: KeyManager::new(db, codec).with_default_rate_limit(config.default_rate_limit),
    });

    let app = router(state);

    // Start server
    tracing::info!("Starting server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
