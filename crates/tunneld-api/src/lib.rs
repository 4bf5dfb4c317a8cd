//! HTTP control API for the tunnel registry
//!
//! Translates requests into [`TunnelRegistry`] operations, enforces the
//! shared deployment token on mutating endpoints, and shapes responses.
//! Each [`ApiServer`] is an explicitly constructed instance over its own
//! state; tests can build as many independent routers as they need.

pub mod handlers;
pub mod models;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tunneld_cert::{CertificateProvider, TlsMaterials};
use tunneld_registry::TunnelRegistry;

/// Shared token shipped in example configs; triggers the create banner
pub const DEFAULT_SERVER_TOKEN: &str = "SecureToken";

const DEFAULT_LANDING_PAGE: &str = "https://github.com/tunneld/tunneld";

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<TunnelRegistry>,
    pub cert_provider: CertificateProvider,
    pub domain: String,
    pub landing_page: String,
    pub server_token: String,
    pub started_at: Instant,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tunneld Control API",
        version = "0.1.0",
        description = "Control plane for reverse tunnels: port allocation, lifecycle, expiry"
    ),
    paths(
        handlers::status,
        handlers::tunnel_status,
        handlers::create_tunnel,
        handlers::delete_tunnel,
    ),
    components(
        schemas(
            models::CreateTunnelRequest,
            models::CreateTunnelResponse,
            models::DeleteTunnelRequest,
            models::DeleteTunnelResponse,
            models::StatusResponse,
            models::TunnelStatusResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "tunnels", description = "Tunnel creation and deletion"),
        (name = "status", description = "Control-plane and per-tunnel status")
    )
)]
struct ApiDoc;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the control listener
    pub bind_addr: SocketAddr,
    /// Public domain used in returned tunnel URIs
    pub domain: String,
    /// Shared deployment token required on mutating endpoints
    pub server_token: String,
    /// Landing page for `GET /`
    pub landing_page: String,
    /// Enable permissive CORS (for development)
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().expect("valid literal addr"),
            domain: "127.0.0.1".to_string(),
            server_token: DEFAULT_SERVER_TOKEN.to_string(),
            landing_page: DEFAULT_LANDING_PAGE.to_string(),
            enable_cors: false,
        }
    }
}

/// Control API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        registry: Arc<TunnelRegistry>,
        cert_provider: CertificateProvider,
    ) -> Self {
        let state = Arc::new(AppState {
            registry,
            cert_provider,
            domain: config.domain.clone(),
            landing_page: config.landing_page.clone(),
            server_token: config.server_token.clone(),
            started_at: Instant::now(),
        });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let router = Router::new()
            .route("/", get(handlers::landing))
            .route("/status", get(handlers::status))
            .route("/status/{internet_port}", get(handlers::tunnel_status))
            .route("/create", post(handlers::create_tunnel))
            .route("/delete", post(handlers::delete_tunnel))
            .with_state(self.state.clone());

        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", api_doc))
            .merge(router);

        let router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]);
            router.layer(cors)
        } else {
            router
        }
    }

    /// Start the plain-HTTP control listener
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("control API listening on {}", self.config.bind_addr);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("control API server error: {e}"))?;

        Ok(())
    }

    /// Start both the plain listener and a TLS listener on `tls_addr`
    pub async fn start_with_tls(
        self,
        tls_addr: SocketAddr,
        materials: &TlsMaterials,
    ) -> Result<(), anyhow::Error> {
        let router = self.build_router();
        let rustls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&materials.cert, &materials.key)
                .await?;

        info!("control API listening on {}", self.config.bind_addr);
        info!("secure control API listening on {tls_addr}");

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let plain = axum::serve(listener, router.clone());
        let secure = axum_server::bind_rustls(tls_addr, rustls_config)
            .serve(router.into_make_service());

        tokio::try_join!(
            async { plain.await.map_err(anyhow::Error::from) },
            async { secure.await.map_err(anyhow::Error::from) },
        )?;

        Ok(())
    }
}
