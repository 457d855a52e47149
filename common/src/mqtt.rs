//! Broker URI handling shared by the viewer and the publisher.

use rumqttc::{MqttOptions, Transport};
use std::time::Duration;

use crate::config::MqttConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    /// Plain TCP.
    Mqtt,
    /// TCP with TLS.
    Mqtts,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn default_port(self) -> u16 {
        match self {
            BrokerScheme::Mqtt => 1883,
            BrokerScheme::Mqtts => 8883,
            BrokerScheme::Ws => 80,
            BrokerScheme::Wss => 443,
        }
    }

    fn is_websocket(self) -> bool {
        matches!(self, BrokerScheme::Ws | BrokerScheme::Wss)
    }
}

/// A parsed broker URI such as `wss://broker.hivemq.com:8884/mqtt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerUriError {
    #[error("broker URI {0:?} has no scheme")]
    MissingScheme(String),
    #[error("unsupported broker URI scheme {0:?}, expected mqtt, mqtts, ws or wss")]
    UnsupportedScheme(String),
    #[error("broker URI {0:?} has no host")]
    MissingHost(String),
    #[error("invalid port in broker URI {0:?}")]
    InvalidPort(String),
}

impl BrokerEndpoint {
    pub fn parse(uri: &str) -> Result<Self, BrokerUriError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| BrokerUriError::MissingScheme(uri.to_owned()))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => BrokerScheme::Mqtt,
            "mqtts" | "ssl" => BrokerScheme::Mqtts,
            "ws" => BrokerScheme::Ws,
            "wss" => BrokerScheme::Wss,
            other => return Err(BrokerUriError::UnsupportedScheme(other.to_owned())),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| BrokerUriError::InvalidPort(uri.to_owned()))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(BrokerUriError::MissingHost(uri.to_owned()));
        }

        Ok(Self {
            scheme,
            host: host.to_owned(),
            port,
            uri: uri.to_owned(),
        })
    }

    /// Address handed to rumqttc. Websocket transports take the whole URI.
    pub fn broker_addr(&self) -> &str {
        if self.scheme.is_websocket() {
            &self.uri
        } else {
            &self.host
        }
    }

    fn transport(&self) -> Transport {
        match self.scheme {
            BrokerScheme::Mqtt => Transport::Tcp,
            BrokerScheme::Mqtts => Transport::tls_with_default_config(),
            BrokerScheme::Ws => Transport::Ws,
            BrokerScheme::Wss => Transport::wss_with_default_config(),
        }
    }
}

/// Build client options for the configured broker.
pub fn mqtt_options(config: &MqttConfig, client_id: &str) -> Result<MqttOptions, BrokerUriError> {
    let endpoint = BrokerEndpoint::parse(&config.broker_uri)?;
    let mut options = MqttOptions::new(client_id, endpoint.broker_addr(), endpoint.port);
    options.set_transport(endpoint.transport());
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
    options.set_clean_session(true);
    Ok(options)
}

/// Configured client id, or one derived from the current time.
pub fn client_id(config: &MqttConfig, role: &str) -> String {
    config.client_id.clone().unwrap_or_else(|| {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        format!("pixfeed-{role}-{nanos:x}")
    })
}
