use super::{
    AmqpConfig, BackendConfig, BrokerConfig, ConnectionSettings, Credentials, KafkaConfig,
    NatsConfig, TlsSettings,
};

use std::path::PathBuf;
use std::time::Duration;

const PRODUCTION_MAX_RECONNECTS: usize = 5;
const PRODUCTION_RECONNECT_WAIT: Duration = Duration::from_secs(10);
const PRODUCTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Fluent builder for [`BrokerConfig`].
///
/// Starts out targeting the in-process backend with default connection settings.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    config: BrokerConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::new(BackendConfig::Memory),
        }
    }

    /// Sets user name and password.
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials.username = Some(username.into());
        self.config.credentials.password = Some(password.into());
        self
    }

    /// Sets the authentication token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.config.credentials.token = Some(token.into());
        self
    }

    /// Replaces the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// Replaces the TLS settings.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = tls;
        self
    }

    /// Enables TLS with the platform trust store and no client certificate.
    #[must_use]
    pub fn with_tls_enabled(self) -> Self {
        self.with_tls(TlsSettings {
            enabled: true,
            ..TlsSettings::default()
        })
    }

    /// Enables TLS with client certificate and CA files.
    #[must_use]
    pub fn with_tls_files(
        self,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
        ca_file: impl Into<PathBuf>,
    ) -> Self {
        self.with_tls(TlsSettings {
            enabled: true,
            cert_file: Some(cert_file.into()),
            key_file: Some(key_file.into()),
            ca_file: Some(ca_file.into()),
            skip_verify: false,
        })
    }

    /// Sets reconnect attempts, reconnect wait and timeout.
    #[must_use]
    pub fn with_connection_settings(
        mut self,
        max_reconnects: usize,
        reconnect_wait: Duration,
        timeout: Duration,
    ) -> Self {
        self.config.connection.max_reconnects = max_reconnects;
        self.config.connection.reconnect_wait = reconnect_wait;
        self.config.connection.timeout = timeout;
        self
    }

    /// Replaces every connection setting.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.config.connection = connection;
        self
    }

    /// Targets an AMQP broker.
    #[must_use]
    pub fn for_amqp(
        mut self,
        url: impl Into<String>,
        exchange: Option<&str>,
        vhost: Option<&str>,
    ) -> Self {
        self.config.backend = BackendConfig::Amqp(AmqpConfig {
            url: url.into(),
            exchange: exchange.map(ToString::to_string),
            vhost: vhost.map(ToString::to_string),
        });
        self
    }

    /// Targets NATS. `servers` takes precedence over `url`.
    #[must_use]
    pub fn for_nats(mut self, url: Option<&str>, cluster: Option<&str>, servers: &[&str]) -> Self {
        self.config.backend = BackendConfig::Nats(NatsConfig {
            url: url.map(ToString::to_string),
            cluster: cluster.map(ToString::to_string),
            servers: servers.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Targets Kafka.
    #[must_use]
    pub fn for_kafka(
        mut self,
        brokers: &[&str],
        consumer_group: Option<&str>,
        sasl_mechanism: Option<&str>,
    ) -> Self {
        let url = match &self.config.backend {
            BackendConfig::Kafka(kafka) => kafka.url.clone(),
            _ => None,
        };

        self.config.backend = BackendConfig::Kafka(KafkaConfig {
            brokers: brokers.iter().map(ToString::to_string).collect(),
            url,
            consumer_group: consumer_group.map(ToString::to_string),
            sasl_mechanism: sasl_mechanism.map(ToString::to_string),
            security_protocol: None,
        });
        self
    }

    /// Sets a single Kafka bootstrap URL, switching to Kafka if needed.
    #[must_use]
    pub fn with_kafka_url(mut self, url: impl Into<String>) -> Self {
        match &mut self.config.backend {
            BackendConfig::Kafka(kafka) => kafka.url = Some(url.into()),
            backend => {
                *backend = BackendConfig::Kafka(KafkaConfig {
                    url: Some(url.into()),
                    ..KafkaConfig::default()
                });
            }
        }
        self
    }

    /// Targets the in-process broker.
    #[must_use]
    pub fn for_memory(mut self) -> Self {
        self.config.backend = BackendConfig::Memory;
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> BrokerConfig {
        self.config
    }
}

/// Local RabbitMQ on the default port.
#[must_use]
pub fn local_amqp_config(exchange: Option<&str>) -> BrokerConfig {
    ConfigBuilder::new()
        .for_amqp("amqp://localhost:5672", exchange, Some("/"))
        .build()
}

/// Local NATS on the default port.
#[must_use]
pub fn local_nats_config() -> BrokerConfig {
    ConfigBuilder::new()
        .for_nats(Some("nats://localhost:4222"), None, &[])
        .build()
}

/// Local Kafka on the default port.
#[must_use]
pub fn local_kafka_config(consumer_group: Option<&str>) -> BrokerConfig {
    ConfigBuilder::new()
        .for_kafka(&["localhost:9092"], consumer_group, None)
        .build()
}

/// Production RabbitMQ with credentials embedded in the URI.
#[must_use]
pub fn production_amqp_config(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    exchange: Option<&str>,
    tls_enabled: bool,
) -> BrokerConfig {
    let scheme = if tls_enabled { "amqps" } else { "amqp" };
    let url = format!("{scheme}://{username}:{password}@{host}:{port}/");

    let builder = ConfigBuilder::new()
        .for_amqp(url, exchange, Some("/"))
        .with_auth(username, password)
        .with_connection_settings(
            PRODUCTION_MAX_RECONNECTS,
            PRODUCTION_RECONNECT_WAIT,
            PRODUCTION_TIMEOUT,
        );

    if tls_enabled {
        builder.with_tls_enabled().build()
    } else {
        builder.build()
    }
}

/// Production NATS cluster.
#[must_use]
pub fn production_nats_config(
    servers: &[&str],
    username: &str,
    password: &str,
    tls_enabled: bool,
) -> BrokerConfig {
    let builder = ConfigBuilder::new()
        .for_nats(None, None, servers)
        .with_auth(username, password)
        .with_connection_settings(
            PRODUCTION_MAX_RECONNECTS,
            PRODUCTION_RECONNECT_WAIT,
            PRODUCTION_TIMEOUT,
        );

    if tls_enabled {
        builder.with_tls_enabled().build()
    } else {
        builder.build()
    }
}

/// Production Kafka cluster.
#[must_use]
pub fn production_kafka_config(
    brokers: &[&str],
    consumer_group: Option<&str>,
    username: &str,
    password: &str,
    sasl_mechanism: Option<&str>,
    tls_enabled: bool,
) -> BrokerConfig {
    let builder = ConfigBuilder::new()
        .for_kafka(brokers, consumer_group, sasl_mechanism)
        .with_auth(username, password)
        .with_connection_settings(
            PRODUCTION_MAX_RECONNECTS,
            PRODUCTION_RECONNECT_WAIT,
            PRODUCTION_TIMEOUT,
        );

    if tls_enabled {
        builder.with_tls_enabled().build()
    } else {
        builder.build()
    }
}

/// Managed Kafka with API key authentication over `SASL_SSL`.
#[must_use]
pub fn cloud_kafka_config(
    brokers: &[&str],
    consumer_group: Option<&str>,
    api_key: &str,
    api_secret: &str,
) -> BrokerConfig {
    let mut config = ConfigBuilder::new()
        .for_kafka(brokers, consumer_group, Some("PLAIN"))
        .with_auth(api_key, api_secret)
        .with_tls_enabled()
        .with_connection_settings(
            PRODUCTION_MAX_RECONNECTS,
            PRODUCTION_RECONNECT_WAIT,
            PRODUCTION_TIMEOUT,
        )
        .build();

    if let BackendConfig::Kafka(kafka) = &mut config.backend {
        kafka.security_protocol = Some("SASL_SSL".to_string());
    }

    config
}

impl From<ConfigBuilder> for BrokerConfig {
    fn from(builder: ConfigBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerType, DEFAULT_TIMEOUT};

    use assert_matches::assert_matches;

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().build();

        assert_eq!(config.broker_type(), BrokerType::Memory);
        assert_eq!(config.connection.max_reconnects, 3);
        assert_eq!(config.connection.reconnect_wait, Duration::from_secs(5));
        assert_eq!(config.connection.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.connection.max_pings_out, 2);
    }

    #[test]
    fn test_production_amqp_embeds_credentials() {
        let config = production_amqp_config("mq.internal", 5671, "svc", "pw", Some("events"), true);

        assert_matches!(
            &config.backend,
            BackendConfig::Amqp(AmqpConfig { url, exchange: Some(exchange), .. })
                if url == "amqps://svc:pw@mq.internal:5671/" && exchange == "events"
        );
        assert!(config.tls.enabled);
        assert_eq!(config.connection.max_reconnects, 5);
        assert_eq!(config.connection.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_cloud_kafka_uses_sasl_ssl() {
        let config = cloud_kafka_config(&["broker.cloud:9092"], Some("billing"), "key", "secret");

        assert_matches!(
            &config.backend,
            BackendConfig::Kafka(KafkaConfig { security_protocol: Some(protocol), sasl_mechanism: Some(mechanism), .. })
                if protocol == "SASL_SSL" && mechanism == "PLAIN"
        );
        assert_eq!(config.credentials.user_and_password(), Some(("key", "secret")));
    }

    #[test]
    fn test_kafka_url_survives_broker_list() {
        let config = ConfigBuilder::new()
            .with_kafka_url("localhost:9092")
            .for_kafka(&[], Some("group"), None)
            .build();

        assert!(config.validate().is_ok());
    }
}
