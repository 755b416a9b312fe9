use duel_server::config::ServerConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("duel_server=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    let http_addr = config.http_addr();
    let ws_addr = config.ws_addr();

    let (app, state) = duel_server::build_app(config).await;

    let ws_listener = tokio::net::TcpListener::bind(&ws_addr)
        .await
        .expect("Failed to bind duel socket");
    tokio::spawn(duel_server::ws::serve(ws_listener, state));

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind");
    info!(addr = %http_addr, "match API listening");

    axum::serve(listener, app).await.expect("Server error");
}
