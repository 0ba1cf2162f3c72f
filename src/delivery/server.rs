use crate::{
    catalog::ClipCatalog,
    config::ServerConfig,
    error::{ClipserveError, DeliveryError, Result},
    registry::DeviceRegistry,
    thumbnails::ThumbnailCache,
};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{health_handler, webhook_handler};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) catalog: Arc<ClipCatalog>,
    pub(crate) thumbnails: Arc<ThumbnailCache>,
    /// Client used to proxy clip bytes from remote devices.
    pub(crate) http: reqwest::Client,
}

/// HTTP server that answers per-device webhook requests: clip listings,
/// clip bytes, and thumbnails.
pub struct DeliveryServer {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) catalog: Arc<ClipCatalog>,
    pub(crate) thumbnails: Arc<ThumbnailCache>,
}

impl DeliveryServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<DeviceRegistry>,
        catalog: Arc<ClipCatalog>,
        thumbnails: Arc<ThumbnailCache>,
    ) -> Self {
        Self {
            config,
            registry,
            catalog,
            thumbnails,
        }
    }

    /// Builds the router. Separated from [`start`](Self::start) so tests can
    /// drive it without binding a socket.
    pub fn router(&self) -> Router {
        let state = ServerState {
            registry: Arc::clone(&self.registry),
            catalog: Arc::clone(&self.catalog),
            thumbnails: Arc::clone(&self.thumbnails),
            http: reqwest::Client::new(),
        };

        Router::new()
            .route("/endpoint/:device_id/:webhook", get(webhook_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server and serve webhook requests until the process
    /// shuts down.
    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.ip, self.config.port);

        info!("Starting clip delivery server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            DeliveryError::BindFailed {
                address: addr.clone(),
                source: e,
            }
        })?;

        info!("Delivery server listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| DeliveryError::StreamStart {
                detail: format!("Server error: {}", e),
            })?;

        Ok(())
    }
}

/// Delivery server builder for configuration
pub struct DeliveryServerBuilder {
    config: Option<ServerConfig>,
    registry: Option<Arc<DeviceRegistry>>,
    catalog: Option<Arc<ClipCatalog>>,
    thumbnails: Option<Arc<ThumbnailCache>>,
}

impl DeliveryServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            registry: None,
            catalog: None,
            thumbnails: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn catalog(mut self, catalog: Arc<ClipCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn thumbnails(mut self, thumbnails: Arc<ThumbnailCache>) -> Self {
        self.thumbnails = Some(thumbnails);
        self
    }

    pub fn build(self) -> Result<DeliveryServer> {
        let config = self.config.ok_or_else(|| {
            ClipserveError::Delivery(DeliveryError::StreamStart {
                detail: "Server configuration is required".to_string(),
            })
        })?;

        let registry = self.registry.ok_or_else(|| {
            ClipserveError::Delivery(DeliveryError::StreamStart {
                detail: "Device registry is required".to_string(),
            })
        })?;

        let catalog = self.catalog.ok_or_else(|| {
            ClipserveError::Delivery(DeliveryError::StreamStart {
                detail: "Clip catalog is required".to_string(),
            })
        })?;

        let thumbnails = self.thumbnails.ok_or_else(|| {
            ClipserveError::Delivery(DeliveryError::StreamStart {
                detail: "Thumbnail cache is required".to_string(),
            })
        })?;

        Ok(DeliveryServer::new(config, registry, catalog, thumbnails))
    }
}

impl Default for DeliveryServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
