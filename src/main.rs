use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eduflow::{
    api::{create_router, AppState},
    card_generator::CardGenerator,
    card_service::CardService,
    catalog::FallbackCatalog,
    config::{Config, LoggingConfig},
    database::Database,
    diagnostics::GenerationLog,
    log_system_event,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let logging = LoggingConfig::from_env()?;
    let _guard = setup_logging(&logging)?;

    let config = Config::from_env()?;
    config.validate()?;

    info!("Starting EduFlow card server...");

    // Initialize database
    let db = Database::new(&config.database.url).await?;
    log_system_event!(startup, component = "database", "Database initialized successfully");

    let backend = config.generation_backend();
    log_system_event!(
        startup,
        component = "card_generator",
        format!("Completion backend: {}", backend.provider_name())
    );

    let catalog = FallbackCatalog::load(config.generation.knowledge_base_path.as_deref());
    let generation_log = match &config.generation.log_path {
        Some(path) => GenerationLog::new(path),
        None => GenerationLog::disabled(),
    };

    let generator = CardGenerator::new(backend, catalog, config.generation_policy(), generation_log);
    let card_service = CardService::new(db, generator, config.generation.history_window);

    let state = AppState { card_service };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use std::fs;
    use tracing_subscriber::fmt;

    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Configure console output
    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    // Set up file appender with daily rotation
    let mut guard = None;
    let file_layer = if config.file_enabled {
        fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create logs directory: {}", e);
        });
        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "eduflow.log");
        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        // Configure file output (no ANSI colors for files)
        Some(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking_file),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if config.file_enabled {
        info!(
            "Logging initialized - writing to {}/eduflow.log with daily rotation",
            config.log_directory
        );
    }

    Ok(guard)
}
