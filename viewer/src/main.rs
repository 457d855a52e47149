mod controller;
mod routes;

use controller::SubscriptionController;
use pixfeed_common::config::Config;
use pixfeed_common::decoder::MessageDecoder;
use pixfeed_common::feed::FeedState;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        broker = config.mqtt.broker_uri,
        topic = config.mqtt.topic,
        wire_format = ?config.feed.wire_format,
        layout = ?config.feed.layout,
        http = config.http.bind,
        "starting pixfeed viewer"
    );

    let feed = FeedState::new(config.feed.layout);
    let app = routes::router(feed.subscribe());

    // The page stays reachable even if the broker never answers.
    let listener = match tokio::net::TcpListener::bind(&config.http.bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = config.http.bind, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server stopped");
        }
    });

    let mut controller =
        SubscriptionController::new(MessageDecoder::new(config.feed.wire_format), feed);

    let session = match controller.connect_and_subscribe(&config.mqtt).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, broker = config.mqtt.broker_uri, "failed to start subscription");
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run(session).await {
        error!(error = %e, "subscription ended");
        std::process::exit(1);
    }
}
