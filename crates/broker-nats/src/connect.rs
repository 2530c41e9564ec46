use courier_broker::config::{
    BackendConfig, BrokerConfig, ConnectionSettings, Credentials, NatsConfig, TlsSettings,
};
use courier_broker::{Error, Result};

use async_nats::ConnectOptions;
use tracing::warn;

/// Configuration for a [`NatsBroker`](crate::NatsBroker).
#[derive(Clone, Debug, Default)]
pub struct NatsBrokerConfig {
    /// Server selection.
    pub nats: NatsConfig,

    /// Reconnect, timeout and keep-alive behaviour.
    pub connection: ConnectionSettings,

    /// User/password or token authentication.
    pub credentials: Credentials,

    /// TLS material.
    pub tls: TlsSettings,
}

impl TryFrom<BrokerConfig> for NatsBrokerConfig {
    type Error = Error;

    fn try_from(
        BrokerConfig {
            backend,
            connection,
            credentials,
            tls,
        }: BrokerConfig,
    ) -> Result<Self> {
        let BackendConfig::Nats(nats) = backend else {
            return Err(Error::InvalidConfiguration(format!(
                "expected NATS configuration, got {}",
                backend.broker_type()
            )));
        };

        Ok(Self {
            nats,
            connection,
            credentials,
            tls,
        })
    }
}

impl NatsBrokerConfig {
    /// Builds client options from the shared settings.
    pub(crate) fn connect_options(&self) -> Result<ConnectOptions> {
        let reconnect_wait = self.connection.reconnect_wait;

        let mut options = ConnectOptions::new()
            .max_reconnects(self.connection.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .connection_timeout(self.connection.timeout)
            .ping_interval(self.connection.ping_interval);

        if let Some(name) = &self.nats.cluster {
            options = options.name(name);
        }

        if let Some((user, password)) = self.credentials.user_and_password() {
            options = options.user_and_password(user.to_string(), password.to_string());
        }

        if let Some(token) = self.credentials.token.as_ref().filter(|t| !t.is_empty()) {
            options = options.token(token.clone());
        }

        if self.tls.enabled {
            options = options.require_tls(true);

            if let Some(ca_file) = &self.tls.ca_file {
                options = options.add_root_certificates(ca_file.clone());
            }

            match (&self.tls.cert_file, &self.tls.key_file) {
                (Some(cert), Some(key)) => {
                    options = options.add_client_certificate(cert.clone(), key.clone());
                }
                (None, None) => {}
                _ => {
                    return Err(Error::InvalidConfiguration(
                        "TLS client certificate and key must be set together".to_string(),
                    ));
                }
            }

            if self.tls.skip_verify {
                warn!("NATS client does not support skipping certificate verification; ignoring");
            }
        }

        Ok(options)
    }
}
