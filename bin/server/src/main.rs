use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vo_federation_core::ReqwestHttpClient;
use vo_federation_server::{
    config::ServerConfig,
    db::{PgGroupDirectory, PgProviderStore, PgSessionStore, PgShareSource, PgShareStore},
    routes,
    state::{AppState, Stores},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    let verification = config
        .jwt
        .verification()
        .unwrap_or_else(|name| panic!("unknown JWT algorithm '{}'", name));
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let http = ReqwestHttpClient::new(config.http.timeout()).expect("failed to build HTTP client");

    let stores = Stores {
        providers: Arc::new(PgProviderStore::new(db_pool.clone())),
        sessions: Arc::new(PgSessionStore::new(db_pool.clone())),
        directory: Arc::new(PgGroupDirectory::new(db_pool.clone())),
        shares: Arc::new(PgShareStore::new(db_pool.clone())),
        share_source: Arc::new(PgShareSource::new(db_pool)),
    };
    let listen_addr = config.listen_addr.clone();
    let app_state = Arc::new(AppState::new(
        config,
        stores,
        Arc::new(http),
        verification,
    ));

    // Spawn periodic notification sweep
    let queue = app_state.queue.clone();
    tokio::spawn(async move {
        queue.run_periodically().await;
    });

    let app = routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", listen_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
