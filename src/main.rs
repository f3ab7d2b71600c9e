use pki_engine::{
    config::Config,
    server::{Server, ServerConfig},
    setup::setup,
    telemetry,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        redis = config.redis.is_some(),
        active = config.cluster.active,
        "Loaded configuration"
    );

    let backend = setup(&config).await?;

    let server_config = ServerConfig {
        host: &config.server.host,
        port: config.server.port,
    };
    let server = Server::new(backend, server_config).await?;
    server.run().await
}
