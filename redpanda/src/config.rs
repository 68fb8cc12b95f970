//! Connection settings shared by every client built against one cluster.
//!
//! One [`BrokerConfig`] is constructed at startup and handed to the publisher,
//! both processors, both views and the topic manager. Each of them derives its
//! own `rdkafka` [`ClientConfig`] from it, so security settings are applied
//! identically everywhere.

use rdkafka::config::ClientConfig;

/// Broker addresses and security settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Bootstrap servers as `host:port`, in priority order
    pub brokers: Vec<String>,
    /// Security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`
    pub security_protocol: String,
    /// SASL mechanism: PLAIN, SCRAM-SHA-256, SCRAM-SHA-512
    pub sasl_mechanism: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Path to SSL CA certificate
    pub ssl_ca_location: Option<String>,
    /// Client id reported to the broker
    pub client_id: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(["localhost:9092"])
    }
}

impl BrokerConfig {
    /// Plaintext connection to the given brokers.
    #[must_use]
    pub fn new<I, B>(brokers: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            security_protocol: "plaintext".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            client_id: None,
        }
    }

    /// Parse a comma-separated broker list, ignoring blanks.
    #[must_use]
    pub fn from_list(brokers: &str) -> Self {
        Self::new(
            brokers
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(ToString::to_string),
        )
    }

    /// Set the client id reported to the broker.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Enable SASL authentication.
    #[must_use]
    pub fn with_sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl_mechanism = Some(mechanism.into());
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self
    }

    /// Verify brokers against the CA certificate at `path`.
    #[must_use]
    pub fn with_ssl_ca_location(mut self, path: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(path.into());
        self
    }

    /// Set the security protocol.
    #[must_use]
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = protocol.into();
        self
    }

    /// The `bootstrap.servers` value.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// A fresh [`ClientConfig`] with connection and security settings applied.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("security.protocol", &self.security_protocol);

        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        if let Some(mechanism) = &self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &self.sasl_username {
            config.set("sasl.username", username);
        }
        if let Some(password) = &self.sasl_password {
            config.set("sasl.password", password);
        }
        if let Some(ca) = &self.ssl_ca_location {
            config.set("ssl.ca.location", ca);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_list() {
        let config = BrokerConfig::from_list("a:9092, b:9092,,");
        assert_eq!(config.brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.bootstrap_servers(), "a:9092,b:9092");
    }

    #[test]
    fn sasl_settings_reach_client_config() {
        let config = BrokerConfig::new(["localhost:9092"])
            .with_security_protocol("sasl_ssl")
            .with_sasl("PLAIN", "user", "secret");

        let client = config.client_config();
        assert_eq!(client.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(client.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(client.get("sasl.username"), Some("user"));
    }

    #[test]
    fn ca_location_reaches_client_config() {
        let client = BrokerConfig::default()
            .with_security_protocol("ssl")
            .with_ssl_ca_location("/etc/ssl/ca.pem")
            .client_config();
        assert_eq!(client.get("ssl.ca.location"), Some("/etc/ssl/ca.pem"));
    }

    #[test]
    fn plaintext_by_default() {
        let client = BrokerConfig::default().client_config();
        assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client.get("security.protocol"), Some("plaintext"));
        assert_eq!(client.get("sasl.username"), None);
    }
}
