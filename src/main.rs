use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mapannai_api::api::{create_router, AppState};
use mapannai_api::config::Config;
use mapannai_api::services::enrichment::Enricher;
use mapannai_api::services::jobs::JobRunner;
use mapannai_api::services::narrative::Narrator;
use mapannai_api::services::providers::{
    GeminiProvider, GenerativeProvider, GooglePlacesProvider, HttpObjectStore, ObjectStore,
    PlacesProvider,
};
use mapannai_api::services::resolution::PlaceResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);

    let places: Arc<dyn PlacesProvider> = Arc::new(GooglePlacesProvider::new(&config)?);
    let generative: Arc<dyn GenerativeProvider> = Arc::new(GeminiProvider::new(&config)?);
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(&config)?);

    let runner = Arc::new(JobRunner::new(
        PlaceResolver::new(
            Arc::clone(&places),
            Arc::clone(&generative),
            Arc::clone(&config),
        ),
        Enricher::new(Arc::clone(&places), Arc::clone(&store), Arc::clone(&config)),
        Narrator::new(Arc::clone(&generative), Arc::clone(&config)),
        store,
        Arc::clone(&config),
    ));

    // Clients are browsers on other origins; CORS stays wide open
    let app = create_router(AppState::new(runner))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "server running");
    axum::serve(listener, app).await?;

    Ok(())
}
