use super::{
    AmqpConfig, BackendConfig, BrokerConfig, BrokerType, ConnectionSettings, Credentials,
    DEFAULT_MAX_PINGS_OUT, DEFAULT_MAX_RECONNECTS, DEFAULT_PING_INTERVAL, DEFAULT_RECONNECT_WAIT,
    DEFAULT_TIMEOUT, KafkaConfig, NatsConfig, TlsSettings,
};
use crate::error::{Error, Result};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Flat configuration surface with one field per backend setting.
///
/// Field names match the JSON produced by existing config loaders. Empty
/// strings are treated as unset.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// AMQP connection URI.
    pub rabbitmq_url: Option<String>,
    /// AMQP topic exchange.
    pub rabbitmq_exchange: Option<String>,
    /// AMQP virtual host.
    pub rabbitmq_vhost: Option<String>,

    /// NATS server URL.
    pub nats_url: Option<String>,
    /// NATS cluster name.
    pub nats_cluster: Option<String>,
    /// NATS server list.
    pub nats_servers: Vec<String>,

    /// Single Kafka bootstrap broker.
    pub kafka_url: Option<String>,
    /// Kafka bootstrap brokers.
    pub kafka_brokers: Vec<String>,
    /// Default Kafka consumer group.
    pub kafka_consumer_group: Option<String>,
    /// Kafka SASL mechanism.
    pub kafka_sasl_mechanism: Option<String>,
    /// Kafka security protocol.
    pub kafka_security_protocol: Option<String>,

    /// Reconnect attempts.
    pub max_reconnects: usize,
    /// Wait between reconnects.
    #[serde(with = "humantime_serde")]
    pub reconnect_wait: Duration,
    /// Connection and acknowledgement timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Keep-alive ping interval.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// Unanswered pings tolerated.
    pub max_pings_out: usize,

    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Token.
    pub token: Option<String>,

    /// Whether TLS is required.
    pub tls_enabled: bool,
    /// Client certificate.
    pub tls_cert_file: Option<PathBuf>,
    /// Client private key.
    pub tls_key_file: Option<PathBuf>,
    /// Root CA bundle.
    pub tls_ca_file: Option<PathBuf>,
    /// Skip server certificate verification.
    pub tls_skip_verify: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            rabbitmq_url: None,
            rabbitmq_exchange: None,
            rabbitmq_vhost: None,
            nats_url: None,
            nats_cluster: None,
            nats_servers: Vec::new(),
            kafka_url: None,
            kafka_brokers: Vec::new(),
            kafka_consumer_group: None,
            kafka_sasl_mechanism: None,
            kafka_security_protocol: None,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            timeout: DEFAULT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_pings_out: DEFAULT_MAX_PINGS_OUT,
            username: None,
            password: None,
            token: None,
            tls_enabled: false,
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_file: None,
            tls_skip_verify: false,
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

impl BrokerSettings {
    /// Guesses the backend from which URLs are set.
    ///
    /// AMQP wins over NATS, which wins over Kafka.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` when no backend is configured.
    pub fn detect_broker_type(&self) -> Result<BrokerType> {
        let detected = if non_empty(self.rabbitmq_url.as_ref()).is_some() {
            BrokerType::Amqp
        } else if non_empty(self.nats_url.as_ref()).is_some() || !self.nats_servers.is_empty() {
            BrokerType::Nats
        } else if non_empty(self.kafka_url.as_ref()).is_some() || !self.kafka_brokers.is_empty() {
            BrokerType::Kafka
        } else {
            return Err(Error::unsupported("settings", "broker type detection"));
        };

        debug!(broker_type = %detected, "detected broker type");

        Ok(detected)
    }

    /// Converts the flat settings into a typed configuration for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` when a field `kind` requires is missing.
    pub fn into_config(self, kind: BrokerType) -> Result<BrokerConfig> {
        let backend = match kind {
            BrokerType::Amqp => BackendConfig::Amqp(AmqpConfig {
                url: non_empty(self.rabbitmq_url.as_ref()).ok_or_else(|| {
                    Error::InvalidConfiguration("RabbitMQ URL is required".to_string())
                })?,
                exchange: non_empty(self.rabbitmq_exchange.as_ref()),
                vhost: non_empty(self.rabbitmq_vhost.as_ref()),
            }),
            BrokerType::Nats => BackendConfig::Nats(NatsConfig {
                url: non_empty(self.nats_url.as_ref()),
                cluster: non_empty(self.nats_cluster.as_ref()),
                servers: self.nats_servers.clone(),
            }),
            BrokerType::Kafka => BackendConfig::Kafka(KafkaConfig {
                brokers: self.kafka_brokers.clone(),
                url: non_empty(self.kafka_url.as_ref()),
                consumer_group: non_empty(self.kafka_consumer_group.as_ref()),
                sasl_mechanism: non_empty(self.kafka_sasl_mechanism.as_ref()),
                security_protocol: non_empty(self.kafka_security_protocol.as_ref()),
            }),
            BrokerType::Memory => BackendConfig::Memory,
        };

        let config = BrokerConfig {
            backend,
            connection: ConnectionSettings {
                max_reconnects: self.max_reconnects,
                reconnect_wait: self.reconnect_wait,
                timeout: self.timeout,
                ping_interval: self.ping_interval,
                max_pings_out: self.max_pings_out,
            },
            credentials: Credentials {
                username: non_empty(self.username.as_ref()),
                password: self.password,
                token: non_empty(self.token.as_ref()),
            },
            tls: TlsSettings {
                enabled: self.tls_enabled,
                cert_file: self.tls_cert_file,
                key_file: self.tls_key_file,
                ca_file: self.tls_ca_file,
                skip_verify: self.tls_skip_verify,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Detects the backend and converts in one step.
    ///
    /// # Errors
    ///
    /// See [`BrokerSettings::detect_broker_type`] and [`BrokerSettings::into_config`].
    pub fn into_detected_config(self) -> Result<BrokerConfig> {
        let kind = self.detect_broker_type()?;
        self.into_config(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_detection_order() {
        let settings = BrokerSettings {
            rabbitmq_url: Some("amqp://localhost:5672".to_string()),
            nats_url: Some("nats://localhost:4222".to_string()),
            kafka_brokers: vec!["localhost:9092".to_string()],
            ..BrokerSettings::default()
        };
        assert_eq!(settings.detect_broker_type().unwrap(), BrokerType::Amqp);

        let settings = BrokerSettings {
            nats_servers: vec!["nats://a:4222".to_string()],
            kafka_url: Some("localhost:9092".to_string()),
            ..BrokerSettings::default()
        };
        assert_eq!(settings.detect_broker_type().unwrap(), BrokerType::Nats);

        let settings = BrokerSettings {
            kafka_url: Some("localhost:9092".to_string()),
            ..BrokerSettings::default()
        };
        assert_eq!(settings.detect_broker_type().unwrap(), BrokerType::Kafka);
    }

    #[test]
    fn test_nothing_configured_is_unsupported() {
        let settings = BrokerSettings {
            rabbitmq_url: Some(String::new()),
            ..BrokerSettings::default()
        };

        assert_matches!(settings.detect_broker_type(), Err(e) if e.is_unsupported());
    }

    #[test]
    fn test_amqp_requires_url() {
        let settings = BrokerSettings::default();

        assert_matches!(
            settings.into_config(BrokerType::Amqp),
            Err(Error::InvalidConfiguration(_))
        );
    }

    #[test]
    fn test_json_surface_converts() {
        let settings: BrokerSettings = serde_json::from_str(
            r#"{
                "kafka_brokers": ["k1:9092", "k2:9092"],
                "kafka_consumer_group": "billing",
                "username": "svc",
                "password": "secret",
                "tls_enabled": true,
                "timeout": "1m"
            }"#,
        )
        .unwrap();

        let config = settings.into_detected_config().unwrap();

        assert_eq!(config.broker_type(), BrokerType::Kafka);
        assert_eq!(config.connection.timeout, Duration::from_secs(60));
        assert_eq!(config.connection.max_reconnects, DEFAULT_MAX_RECONNECTS);
        assert_eq!(config.credentials.user_and_password(), Some(("svc", "secret")));
        assert!(config.tls.enabled);
        assert_matches!(
            config.backend,
            BackendConfig::Kafka(KafkaConfig { consumer_group: Some(group), .. }) if group == "billing"
        );
    }
}
