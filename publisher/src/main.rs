mod camera;

use camera::FramePublisher;
use pixfeed_common::config::{CaptureMode, Config};
use pixfeed_common::mqtt;
use rumqttc::{AsyncClient, EventLoop};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("invalid broker settings: {0}")]
    Broker(#[from] mqtt::BrokerUriError),
    #[error("failed to queue frame for publishing: {0}")]
    Publish(String),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

fn mqtt_client(config: &Config) -> Result<(AsyncClient, EventLoop), PublisherError> {
    let client_id = format!("pixfeed-pub-{}", config.publisher.camera_id);
    let options = mqtt::mqtt_options(&config.mqtt, &client_id)?;
    Ok(AsyncClient::new(options, config.mqtt.channel_capacity))
}

#[tokio::main]
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

    let topic = camera::frame_topic(&config.publisher.topic_prefix, &config.publisher.camera_id);
    info!(
        broker = config.mqtt.broker_uri,
        topic,
        mode = ?config.publisher.mode,
        wire_format = ?config.feed.wire_format,
        "starting pixfeed publisher"
    );

    let (client, mut eventloop) = match mqtt_client(&config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create MQTT client");
            std::process::exit(1);
        }
    };

    // rumqttc only makes progress while its event loop is polled.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => debug!(?event, "mqtt event"),
                Err(e) => {
                    warn!(error = %e, "MQTT connection error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let mut publisher = FramePublisher::new(client, topic, config.feed.wire_format);

    let result = match config.publisher.mode {
        CaptureMode::Polling => {
            let interval = Duration::from_millis(config.publisher.interval_ms);
            camera::run_polling_publisher(&config.publisher.camera_url, &mut publisher, interval)
                .await
        }
        CaptureMode::Mjpeg => {
            camera::run_mjpeg_publisher(&config.publisher.camera_url, &mut publisher).await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "publisher stopped");
        std::process::exit(1);
    }
}
