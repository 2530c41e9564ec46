use courier_broker::config::{
    BackendConfig, BrokerConfig, ConnectionSettings, Credentials, KafkaConfig, TlsSettings,
};
use courier_broker::{Error, Result};

use rdkafka::ClientConfig;
use tracing::warn;

const SUPPORTED_MECHANISMS: [&str; 3] = ["SCRAM-SHA-256", "SCRAM-SHA-512", "PLAIN"];
const DEFAULT_MECHANISM: &str = "PLAIN";

/// Prefix of the consumer group used when neither the subscription nor the
/// configuration names one.
pub const DEFAULT_GROUP_PREFIX: &str = "courier-consumer-";

/// Configuration for a [`KafkaBroker`](crate::KafkaBroker).
#[derive(Clone, Debug, Default)]
pub struct KafkaBrokerConfig {
    /// Bootstrap servers, consumer group and security settings.
    pub kafka: KafkaConfig,

    /// Timeouts for connecting and for delivery reports.
    pub connection: ConnectionSettings,

    /// SASL user name and password.
    pub credentials: Credentials,

    /// TLS material.
    pub tls: TlsSettings,
}

impl TryFrom<BrokerConfig> for KafkaBrokerConfig {
    type Error = Error;

    fn try_from(
        BrokerConfig {
            backend,
            connection,
            credentials,
            tls,
        }: BrokerConfig,
    ) -> Result<Self> {
        let BackendConfig::Kafka(kafka) = backend else {
            return Err(Error::InvalidConfiguration(format!(
                "expected Kafka configuration, got {}",
                backend.broker_type()
            )));
        };

        kafka.bootstrap_servers()?;

        Ok(Self {
            kafka,
            connection,
            credentials,
            tls,
        })
    }
}

/// Normalizes the configured SASL mechanism, falling back to `PLAIN`.
pub fn sasl_mechanism(configured: Option<&str>) -> &'static str {
    let Some(configured) = configured.filter(|m| !m.is_empty()) else {
        return DEFAULT_MECHANISM;
    };

    let upper = configured.to_ascii_uppercase();
    SUPPORTED_MECHANISMS
        .into_iter()
        .find(|m| *m == upper)
        .unwrap_or_else(|| {
            warn!(mechanism = %configured, "unknown SASL mechanism, using PLAIN");
            DEFAULT_MECHANISM
        })
}

impl KafkaBrokerConfig {
    /// Security protocol from the configuration, else derived from SASL and TLS.
    pub fn security_protocol(&self) -> Option<String> {
        if let Some(protocol) = self
            .kafka
            .security_protocol
            .as_ref()
            .filter(|p| !p.is_empty())
        {
            return Some(protocol.clone());
        }

        let sasl = self.credentials.user_and_password().is_some();
        match (sasl, self.tls.enabled) {
            (true, true) => Some("SASL_SSL".to_string()),
            (true, false) => Some("SASL_PLAINTEXT".to_string()),
            (false, true) => Some("SSL".to_string()),
            (false, false) => None,
        }
    }

    /// Consumer group for a subscription: queue name, configured group, or a
    /// per-topic default.
    pub fn group_id(&self, topic: &str, queue_name: Option<&str>) -> String {
        queue_name
            .filter(|q| !q.is_empty())
            .or_else(|| {
                self.kafka
                    .consumer_group
                    .as_deref()
                    .filter(|g| !g.is_empty())
            })
            .map_or_else(|| format!("{DEFAULT_GROUP_PREFIX}{topic}"), ToString::to_string)
    }

    /// Settings shared by producer, consumer and admin clients.
    pub(crate) fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.kafka.bootstrap_servers()?)
            .set(
                "socket.connection.setup.timeout.ms",
                self.connection.timeout.as_millis().to_string(),
            );

        if let Some(protocol) = self.security_protocol() {
            config.set("security.protocol", protocol);
        }

        if let Some((user, password)) = self.credentials.user_and_password() {
            config
                .set(
                    "sasl.mechanism",
                    sasl_mechanism(self.kafka.sasl_mechanism.as_deref()),
                )
                .set("sasl.username", user)
                .set("sasl.password", password);
        }

        if self.tls.enabled {
            if let Some(ca_file) = &self.tls.ca_file {
                config.set("ssl.ca.location", ca_file.display().to_string());
            }
            if let Some(cert_file) = &self.tls.cert_file {
                config.set("ssl.certificate.location", cert_file.display().to_string());
            }
            if let Some(key_file) = &self.tls.key_file {
                config.set("ssl.key.location", key_file.display().to_string());
            }
            if self.tls.skip_verify {
                config.set("enable.ssl.certificate.verification", "false");
            }
        }

        Ok(config)
    }

    pub(crate) fn producer_config(&self) -> Result<ClientConfig> {
        let mut config = self.client_config()?;
        config
            .set("acks", "all")
            .set("retries", "3")
            .set(
                "message.timeout.ms",
                self.connection.timeout.as_millis().to_string(),
            );

        Ok(config)
    }

    pub(crate) fn consumer_config(&self, group_id: &str) -> Result<ClientConfig> {
        let mut config = self.client_config()?;
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_broker::config::ConfigBuilder;

    use assert_matches::assert_matches;

    fn config() -> KafkaBrokerConfig {
        KafkaBrokerConfig::try_from(
            ConfigBuilder::new()
                .for_kafka(&["k1:9092", "k2:9092"], None, None)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_mechanism_falls_back_to_plain() {
        assert_eq!(sasl_mechanism(Some("scram-sha-512")), "SCRAM-SHA-512");
        assert_eq!(sasl_mechanism(Some("GSSAPI")), "PLAIN");
        assert_eq!(sasl_mechanism(None), "PLAIN");
    }

    #[test]
    fn test_security_protocol_is_derived() {
        let mut config = config();
        assert_eq!(config.security_protocol(), None);

        config.tls.enabled = true;
        assert_eq!(config.security_protocol().as_deref(), Some("SSL"));

        config.credentials.username = Some("svc".to_string());
        config.credentials.password = Some("pw".to_string());
        assert_eq!(config.security_protocol().as_deref(), Some("SASL_SSL"));

        config.tls.enabled = false;
        assert_eq!(config.security_protocol().as_deref(), Some("SASL_PLAINTEXT"));

        config.kafka.security_protocol = Some("PLAINTEXT".to_string());
        assert_eq!(config.security_protocol().as_deref(), Some("PLAINTEXT"));
    }

    #[test]
    fn test_group_id_fallback_order() {
        let mut config = config();
        assert_eq!(config.group_id("orders", None), "courier-consumer-orders");

        config.kafka.consumer_group = Some("billing".to_string());
        assert_eq!(config.group_id("orders", None), "billing");
        assert_eq!(config.group_id("orders", Some("audit")), "audit");
        assert_eq!(config.group_id("orders", Some("")), "billing");
    }

    #[test]
    fn test_client_config_carries_sasl_settings() {
        let config = KafkaBrokerConfig::try_from(
            ConfigBuilder::new()
                .for_kafka(&["k1:9092"], None, Some("SCRAM-SHA-256"))
                .with_auth("svc", "pw")
                .build(),
        )
        .unwrap();

        let client = config.consumer_config("group").unwrap();

        assert_eq!(client.get("bootstrap.servers"), Some("k1:9092"));
        assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(client.get("security.protocol"), Some("SASL_PLAINTEXT"));
        assert_eq!(client.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client.get("group.id"), Some("group"));
    }

    #[test]
    fn test_requires_bootstrap_servers() {
        let config = ConfigBuilder::new().for_kafka(&[], None, None).build();

        assert_matches!(
            KafkaBrokerConfig::try_from(config),
            Err(Error::InvalidConfiguration(_))
        );
    }
}
