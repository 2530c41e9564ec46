use courier_broker::config::{
    AmqpConfig, BackendConfig, BrokerConfig, ConnectionSettings, Credentials, TlsSettings,
};
use courier_broker::{Error, Result};

use lapin::tcp::OwnedTLSConfig;
use lapin::uri::{AMQPScheme, AMQPUri};
use tracing::warn;

const BACKEND: &str = "amqp";
const AMQPS_PORT: u16 = 5671;
const AMQP_PORT: u16 = 5672;

/// Configuration for an [`AmqpBroker`](crate::AmqpBroker).
#[derive(Clone, Debug)]
pub struct AmqpBrokerConfig {
    /// Server address, exchange and virtual host.
    pub amqp: AmqpConfig,

    /// Timeouts and heartbeat interval.
    pub connection: ConnectionSettings,

    /// Credentials overriding the ones in the URI.
    pub credentials: Credentials,

    /// TLS material.
    pub tls: TlsSettings,
}

impl AmqpBrokerConfig {
    /// Configuration for `url` with default settings and no exchange.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            amqp: AmqpConfig {
                url: url.into(),
                exchange: None,
                vhost: None,
            },
            connection: ConnectionSettings::default(),
            credentials: Credentials::default(),
            tls: TlsSettings::default(),
        }
    }

    /// Configured exchange, ignoring empty names.
    pub fn exchange(&self) -> Option<&str> {
        self.amqp.exchange.as_deref().filter(|e| !e.is_empty())
    }

    /// Resolves the connection URI with overrides applied.
    pub(crate) fn uri(&self) -> Result<AMQPUri> {
        let mut uri: AMQPUri = self.amqp.url.parse().map_err(|e: String| {
            Error::InvalidConfiguration(format!("invalid AMQP url {}: {e}", self.amqp.url))
        })?;

        if let Some(vhost) = self.amqp.vhost.as_ref().filter(|v| !v.is_empty()) {
            uri.vhost.clone_from(vhost);
        }

        if let Some((user, password)) = self.credentials.user_and_password() {
            uri.authority.userinfo.username = user.to_string();
            uri.authority.userinfo.password = password.to_string();
        }

        if self.tls.enabled && uri.scheme == AMQPScheme::AMQP {
            uri.scheme = AMQPScheme::AMQPS;
            if uri.authority.port == AMQP_PORT {
                uri.authority.port = AMQPS_PORT;
            }
        }

        let heartbeat = u16::try_from(self.connection.ping_interval.as_secs()).unwrap_or(u16::MAX);
        if heartbeat > 0 {
            uri.query.heartbeat = Some(heartbeat);
        }

        Ok(uri)
    }

    /// Loads the root CA bundle for TLS connections.
    pub(crate) async fn tls_config(&self) -> Result<OwnedTLSConfig> {
        let mut config = OwnedTLSConfig::default();

        if !self.tls.enabled {
            return Ok(config);
        }

        if let Some(ca_file) = &self.tls.ca_file {
            let chain = tokio::fs::read_to_string(ca_file)
                .await
                .map_err(|e| Error::connection(BACKEND, e))?;
            config.cert_chain = Some(chain);
        }

        if self.tls.cert_file.is_some() || self.tls.key_file.is_some() {
            warn!("AMQP client certificates must be supplied as PKCS#12; ignoring PEM pair");
        }

        if self.tls.skip_verify {
            warn!("AMQP client does not support skipping certificate verification; ignoring");
        }

        Ok(config)
    }
}

impl TryFrom<BrokerConfig> for AmqpBrokerConfig {
    type Error = Error;

    fn try_from(
        BrokerConfig {
            backend,
            connection,
            credentials,
            tls,
        }: BrokerConfig,
    ) -> Result<Self> {
        let BackendConfig::Amqp(amqp) = backend else {
            return Err(Error::InvalidConfiguration(format!(
                "expected AMQP configuration, got {}",
                backend.broker_type()
            )));
        };

        if amqp.url.is_empty() {
            return Err(Error::InvalidConfiguration(
                "AMQP url is required".to_string(),
            ));
        }

        Ok(Self {
            amqp,
            connection,
            credentials,
            tls,
        })
    }
}
