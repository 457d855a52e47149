use serde::Deserialize;
use std::path::Path;

use crate::decoder::WireFormat;
use crate::feed::FeedLayout;
use crate::mqtt::BrokerEndpoint;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_broker_uri")]
    pub broker_uri: String,
    /// Topic filter for the viewer (MQTT wildcards `+` and `#` allowed).
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Generated from the current time when absent.
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

/// Deployment-wide wire contract and display layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default)]
    pub layout: FeedLayout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// How the publisher pulls frames from the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// One HTTP GET per frame.
    #[default]
    Polling,
    /// A `multipart/x-mixed-replace` MJPEG stream.
    Mjpeg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub mode: CaptureMode,
    /// Single-frame endpoint in polling mode, stream endpoint in mjpeg mode.
    #[serde(default = "default_camera_url")]
    pub camera_url: String,
    #[serde(default = "default_camera_id")]
    pub camera_id: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::default(),
            camera_url: default_camera_url(),
            camera_id: default_camera_id(),
            interval_ms: default_interval_ms(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.topic must not be empty".into()));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.channel_capacity must be at least 1".into(),
            ));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive_secs must be at least 5".into(),
            ));
        }
        if self.publisher.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "publisher.interval_ms must be at least 1".into(),
            ));
        }
        BrokerEndpoint::parse(&self.mqtt.broker_uri)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_broker_uri() -> String {
    "wss://broker.hivemq.com:8884/mqtt".into()
}
fn default_topic() -> String {
    "sscam/pix/#".into()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    10
}
fn default_max_packet_size() -> usize {
    1024 * 1024
}
fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_camera_url() -> String {
    "http://127.0.0.1:8000/frame".into()
}
fn default_camera_id() -> String {
    "cam0".into()
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_topic_prefix() -> String {
    "sscam/pix".into()
}
fn default_log_level() -> String {
    "info".into()
}
