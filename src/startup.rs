//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::application::services::{MetricsService, MetricsServiceImpl, TokenService};
use crate::config::{Settings, StoreBackend};
use crate::infrastructure::cache::{CacheService, SessionStore};
use crate::infrastructure::connection::{shutdown_signal, StoreManager};
use crate::infrastructure::pubsub::PubSubRegistry;
use crate::infrastructure::rate_limit::RateLimiter;
use crate::infrastructure::repositories::InMemoryMetricsRepository;
use crate::infrastructure::store::{MemoryConnector, Namespace, RedisConnector, StoreConnector};
use crate::presentation::http::{handlers, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::RealtimeHub;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<StoreManager>,
    pub cache: CacheService,
    pub sessions: SessionStore,
    pub rate_limiter: RateLimiter,
    pub pubsub: Arc<PubSubRegistry>,
    pub hub: Arc<RealtimeHub>,
    pub metrics: Arc<dyn MetricsService>,
    pub tokens: TokenService,
}

impl AppState {
    /// Connects the store through `connector` and wires every component to
    /// the one `StoreManager`.
    pub async fn build(settings: Settings, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        let store = Arc::new(StoreManager::new(connector));
        store.connect().await?;

        let cache = CacheService::new(Arc::clone(&store), Namespace::Cache);
        let sessions = SessionStore::new(Arc::clone(&store), settings.session.ttl_secs);
        let rate_limiter = RateLimiter::new(Arc::clone(&store));
        let pubsub = PubSubRegistry::new(Arc::clone(&store))?;

        let hub = Arc::new(RealtimeHub::new(settings.realtime.heartbeat_interval_ms));
        hub.attach(&pubsub).await?;

        let metrics: Arc<dyn MetricsService> = Arc::new(MetricsServiceImpl::new(
            Arc::new(InMemoryMetricsRepository::new()),
            cache.clone(),
            Arc::clone(&pubsub),
            settings.cache.default_ttl_secs,
        ));
        let tokens = TokenService::new(&settings.jwt.secret);

        Ok(Self {
            settings: Arc::new(settings),
            store,
            cache,
            sessions,
            rate_limiter,
            pubsub,
            hub,
            metrics,
            tokens,
        })
    }
}

/// Opens the backend selected by `redis.backend`.
pub fn create_connector(settings: &Settings) -> Result<Arc<dyn StoreConnector>> {
    let connector: Arc<dyn StoreConnector> = match settings.redis.backend {
        StoreBackend::Redis => Arc::new(RedisConnector::new(&settings.redis)?),
        StoreBackend::Memory => {
            tracing::warn!("Using the in-process store; state is not shared between instances");
            Arc::new(MemoryConnector::new())
        }
    };
    Ok(connector)
}

/// Build the full router with tracing, compression and CORS layers
pub fn build_router(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(CompressionLayer::new())
        .layer(logging::create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    store: Arc<StoreManager>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        handlers::health::init_server_start();

        let connector = create_connector(&settings)?;
        let addr = settings.server_addr();

        let state = AppState::build(settings, connector).await?;
        tracing::info!(state = %state.store.state(), "Store connection established");

        let store = Arc::clone(&state.store);
        store.install_shutdown_hook();
        let router = build_router(state);

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            store,
        })
    }

    /// Run the server until a shutdown signal arrives. The store is closed
    /// once, by whichever of the hook and this method gets there first.
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        self.store.shutdown().await;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
