pub mod errors;
pub mod handlers;
pub mod responses;

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::pki::PkiBackend;
use handlers::{certs, crl, health::health_check, issuers, keys, revoke};

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub backend: PkiBackend,
}

/// Builds the HTTP API of a PKI mount.
pub fn router(backend: PkiBackend) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
            let uri = request.uri().to_string();
            tracing::info_span!("request", method = %request.method(), uri)
        });

    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health_check))
        .route("/issuers", get(issuers::list_issuers))
        .route("/issuers/import", post(issuers::import_bundle))
        .route(
            "/issuer/{issuer_ref}",
            get(issuers::read_issuer)
                .post(issuers::update_issuer)
                .delete(issuers::delete_issuer),
        )
        .route("/issuer/{issuer_ref}/der", get(issuers::read_issuer_der))
        .route("/issuer/{issuer_ref}/pem", get(issuers::read_issuer_pem))
        .route("/issuer/{issuer_ref}/crl", get(crl::read_issuer_crl_der))
        .route("/issuer/{issuer_ref}/crl/der", get(crl::read_issuer_crl_der))
        .route("/issuer/{issuer_ref}/crl/pem", get(crl::read_issuer_crl_pem))
        .route(
            "/config/issuers",
            get(issuers::read_issuers_config).post(issuers::write_issuers_config),
        )
        .route("/keys", get(keys::list_keys))
        .route("/keys/import", post(keys::import_key))
        .route(
            "/key/{key_ref}",
            get(keys::read_key).delete(keys::delete_key),
        )
        .route(
            "/config/keys",
            get(keys::read_keys_config).post(keys::write_keys_config),
        )
        .route(
            "/config/crl",
            get(crl::read_crl_settings).post(crl::write_crl_settings),
        )
        .route("/crl/rotate", post(crl::rotate_crls))
        .route("/certs", post(certs::store_certificate))
        .route("/cert/{serial}", get(certs::read_certificate))
        .route("/revoke", post(revoke::revoke_certificate))
        .layer(cors_layer)
        .layer(trace_layer)
        .with_state(AppState { backend })
}

pub struct Server {
    router: Router,
    listener: TcpListener,
}

impl Server {
    /// Binds the listener; the server only accepts connections once [`Server::run`] is called.
    pub async fn new(backend: PkiBackend, config: ServerConfig<'_>) -> Result<Self> {
        let listener = TcpListener::bind((config.host, config.port))
            .await
            .wrap_err_with(|| format!("Binding TCP listener on {}:{}", config.host, config.port))?;

        Ok(Self {
            router: router(backend),
            listener,
        })
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self
            .listener
            .local_addr()
            .context("Getting local address")?
            .port())
    }

    pub async fn run(self) -> Result<()> {
        let addr = self
            .listener
            .local_addr()
            .context("Getting local address")?;
        tracing::info!("Server listening on http://{addr}");

        axum::serve(self.listener, self.router)
            .await
            .context("Running server")
    }
}
