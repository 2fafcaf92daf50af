// Configuration module for kafka-bridge
//
// All settings are read once at startup into an immutable `GatewayConfig`
// which is then shared as `Arc<GatewayConfig>` by every component.
// Each field can be overridden with a `KAFKA_BRIDGE_*` environment variable.

use crate::kafka::broker_metadata::parse_listener_url;
use crate::kafka::constants::{
    DEFAULT_ADVERTISED_ADDRESS, DEFAULT_CLUSTER_NAME, DEFAULT_HOST, DEFAULT_LISTENERS,
    DEFAULT_METADATA_NAMESPACE, DEFAULT_NAMESPACE, DEFAULT_OFFSETS_TOPIC,
    DEFAULT_OFFSETS_TOPIC_PARTITIONS, DEFAULT_SASL_MECHANISMS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
    MAX_PORT, MAX_REQUEST_SIZE, MAX_SHUTDOWN_TIMEOUT_MS, MIN_PORT, MIN_SHUTDOWN_TIMEOUT_MS,
    PLAINTEXT_PREFIX, SSL_PREFIX,
};
use crate::kafka::error::{KafkaError, Result};

const ENV_PREFIX: &str = "KAFKA_BRIDGE_";

/// Configuration struct holding all kafka-bridge settings
#[derive(Clone)]
pub struct GatewayConfig {
    /// Reported to clients as the Metadata cluster id
    pub cluster_name: String,
    /// Namespace used by connections that have not authenticated
    pub namespace: String,
    /// Comma-separated listener URLs, e.g. `PLAINTEXT://host:9092,SSL://host:9093`
    pub listeners: String,
    /// Address advertised for this node when no listener host applies
    pub advertised_address: String,
    /// Interface the TCP listener binds to
    pub bind_host: String,
    pub tls_enabled: bool,
    pub allow_auto_topic_creation: bool,
    pub sasl_enabled: bool,
    /// Comma-separated SASL mechanisms accepted by the handshake
    pub sasl_allowed_mechanisms: String,
    /// Namespace of the internal offsets topic
    pub metadata_namespace: String,
    pub offsets_topic_name: String,
    pub offsets_topic_partitions: i32,
    pub max_request_size: i32,
    pub shutdown_timeout_ms: i32,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("cluster_name", &self.cluster_name)
            .field("namespace", &self.namespace)
            .field("listeners", &self.listeners)
            .field("advertised_address", &self.advertised_address)
            .field("bind_host", &self.bind_host)
            .field("tls_enabled", &self.tls_enabled)
            .field("allow_auto_topic_creation", &self.allow_auto_topic_creation)
            .field("sasl_enabled", &self.sasl_enabled)
            .field("sasl_allowed_mechanisms", &self.sasl_allowed_mechanisms)
            .field("metadata_namespace", &self.metadata_namespace)
            .field("offsets_topic_name", &self.offsets_topic_name)
            .field("offsets_topic_partitions", &self.offsets_topic_partitions)
            .field("max_request_size", &self.max_request_size)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            listeners: DEFAULT_LISTENERS.to_string(),
            advertised_address: DEFAULT_ADVERTISED_ADDRESS.to_string(),
            bind_host: DEFAULT_HOST.to_string(),
            tls_enabled: false,
            allow_auto_topic_creation: true,
            sasl_enabled: false,
            sasl_allowed_mechanisms: DEFAULT_SASL_MECHANISMS.to_string(),
            metadata_namespace: DEFAULT_METADATA_NAMESPACE.to_string(),
            offsets_topic_name: DEFAULT_OFFSETS_TOPIC.to_string(),
            offsets_topic_partitions: DEFAULT_OFFSETS_TOPIC_PARTITIONS,
            max_request_size: MAX_REQUEST_SIZE,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment and validate it
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    ///
    /// `lookup` receives the full variable name (`KAFKA_BRIDGE_NAMESPACE`, ...).
    /// Unset keys fall back to the defaults; malformed numbers and booleans
    /// are rejected rather than silently defaulted.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = GatewayConfig::default();

        if let Some(v) = get("CLUSTER_NAME") {
            config.cluster_name = v;
        }
        if let Some(v) = get("NAMESPACE") {
            config.namespace = v;
        }
        if let Some(v) = get("LISTENERS") {
            config.listeners = v;
        }
        if let Some(v) = get("ADVERTISED_ADDRESS") {
            config.advertised_address = v;
        }
        if let Some(v) = get("BIND_HOST") {
            config.bind_host = v;
        }
        if let Some(v) = get("TLS_ENABLED") {
            config.tls_enabled = parse_bool("TLS_ENABLED", &v)?;
        }
        if let Some(v) = get("ALLOW_AUTO_TOPIC_CREATION") {
            config.allow_auto_topic_creation = parse_bool("ALLOW_AUTO_TOPIC_CREATION", &v)?;
        }
        if let Some(v) = get("SASL_ENABLED") {
            config.sasl_enabled = parse_bool("SASL_ENABLED", &v)?;
        }
        if let Some(v) = get("SASL_MECHANISMS") {
            config.sasl_allowed_mechanisms = v;
        }
        if let Some(v) = get("METADATA_NAMESPACE") {
            config.metadata_namespace = v;
        }
        if let Some(v) = get("OFFSETS_TOPIC") {
            config.offsets_topic_name = v;
        }
        if let Some(v) = get("OFFSETS_PARTITIONS") {
            config.offsets_topic_partitions = parse_int("OFFSETS_PARTITIONS", &v)?;
        }
        if let Some(v) = get("MAX_REQUEST_SIZE") {
            config.max_request_size = parse_int("MAX_REQUEST_SIZE", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout_ms = parse_int("SHUTDOWN_TIMEOUT_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(KafkaError::InvalidConfig("namespace must not be empty".into()));
        }
        if self.metadata_namespace.trim().is_empty() {
            return Err(KafkaError::InvalidConfig(
                "metadata namespace must not be empty".into(),
            ));
        }

        let listeners = self.listener_urls();
        if listeners.is_empty() {
            return Err(KafkaError::InvalidConfig("no listeners configured".into()));
        }
        for url in &listeners {
            let (_, port) = parse_listener_url(url)
                .ok_or_else(|| KafkaError::InvalidConfig(format!("bad listener: {}", url)))?;
            if !(MIN_PORT..=MAX_PORT).contains(&port) {
                return Err(KafkaError::InvalidConfig(format!(
                    "listener port {} out of range {}-{}",
                    port, MIN_PORT, MAX_PORT
                )));
            }
        }
        if self.tls_enabled && self.ssl_port().is_none() {
            return Err(KafkaError::InvalidConfig(
                "TLS enabled but no SSL:// listener configured".into(),
            ));
        }
        if !self.tls_enabled && self.plaintext_port().is_none() {
            return Err(KafkaError::InvalidConfig(
                "no PLAINTEXT:// listener configured".into(),
            ));
        }

        if self.offsets_topic_partitions <= 0 {
            return Err(KafkaError::InvalidConfig(
                "offsets topic needs at least one partition".into(),
            ));
        }
        if self.max_request_size <= 0 || self.max_request_size > MAX_REQUEST_SIZE {
            return Err(KafkaError::InvalidRequestSize(self.max_request_size));
        }
        if !(MIN_SHUTDOWN_TIMEOUT_MS..=MAX_SHUTDOWN_TIMEOUT_MS).contains(&self.shutdown_timeout_ms)
        {
            return Err(KafkaError::InvalidConfig(format!(
                "shutdown timeout {}ms out of range",
                self.shutdown_timeout_ms
            )));
        }
        Ok(())
    }

    /// Individual listener URLs, trimmed, empty entries dropped
    pub fn listener_urls(&self) -> Vec<String> {
        self.listeners
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Port of the first `PLAINTEXT://` listener
    pub fn plaintext_port(&self) -> Option<i32> {
        self.port_with_prefix(PLAINTEXT_PREFIX)
    }

    /// Port of the first `SSL://` listener
    pub fn ssl_port(&self) -> Option<i32> {
        self.port_with_prefix(SSL_PREFIX)
    }

    /// Port clients are told to use for this node
    pub fn advertised_port(&self) -> Option<i32> {
        if self.tls_enabled {
            self.ssl_port()
        } else {
            self.plaintext_port()
        }
    }

    fn port_with_prefix(&self, prefix: &str) -> Option<i32> {
        self.listener_urls()
            .iter()
            .find(|url| url.starts_with(prefix))
            .and_then(|url| parse_listener_url(url))
            .map(|(_, port)| port)
    }

    /// Pick the URL matching the connection security mode from a comma-separated list
    pub fn select_listener(&self, listeners: &str) -> Option<String> {
        let prefix = if self.tls_enabled {
            SSL_PREFIX
        } else {
            PLAINTEXT_PREFIX
        };
        listeners
            .split(',')
            .map(str::trim)
            .find(|url| url.starts_with(prefix))
            .map(str::to_string)
    }

    /// Whether `url` names one of this node's own listeners
    pub fn is_local_listener(&self, url: &str) -> bool {
        let Some(target) = parse_listener_url(url) else {
            return false;
        };
        self.listener_urls()
            .iter()
            .filter_map(|own| parse_listener_url(own))
            .any(|own| own == target)
    }

    /// The listener URL this node advertises for itself
    pub fn self_listener(&self) -> Option<String> {
        self.select_listener(&self.listeners)
    }

    /// Accepted SASL mechanism names
    pub fn sasl_mechanisms(&self) -> Vec<String> {
        self.sasl_allowed_mechanisms
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(KafkaError::InvalidConfig(format!(
            "{}{}: expected a boolean, got '{}'",
            ENV_PREFIX, name, other
        ))),
    }
}

fn parse_int(name: &str, value: &str) -> Result<i32> {
    value.trim().parse::<i32>().map_err(|_| {
        KafkaError::InvalidConfig(format!(
            "{}{}: expected an integer, got '{}'",
            ENV_PREFIX, name, value
        ))
    })
}
