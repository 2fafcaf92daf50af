//! Broker node descriptors advertised in Metadata and FindCoordinator responses
//!
//! Partition ownership lives in the backend and moves between backend nodes,
//! so the gateway never has a fixed broker list. Instead every response
//! describes "whoever currently owns this partition" with a synthetic node
//! whose id is a murmur3 hash of `host + port`. The id depends on nothing
//! else, so repeated lookups of the same address always agree.

use std::io::Cursor;
use std::sync::Arc;

/// Synthetic broker identity for one advertised Kafka endpoint
///
/// Uses Arc<String> for the host so cloning a descriptor across the
/// per-partition fan-out only copies a pointer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeDescriptor {
    /// Non-negative id derived from host and port
    pub node_id: i32,
    /// Advertised host for clients to connect to
    pub host: Arc<String>,
    /// Advertised port for clients to connect to
    pub port: i32,
}

impl NodeDescriptor {
    /// Create a descriptor, deriving the node id from host and port
    pub fn new(host: impl Into<String>, port: i32) -> Self {
        let host = host.into();
        let node_id = node_id_for(&host, port);
        Self {
            node_id,
            host: Arc::new(host),
            port,
        }
    }

    /// Parse a listener URL such as `PLAINTEXT://broker-1:9092`
    ///
    /// Returns None when the URL has no scheme, no port, or a port that is
    /// not a number.
    pub fn from_listener_url(url: &str) -> Option<Self> {
        let (host, port) = parse_listener_url(url)?;
        Some(Self::new(host, port))
    }

    /// `host:port` form used when matching discovery records
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Stable node id for an endpoint: murmur3_32 of `host` followed by the
/// decimal port, masked to a non-negative i32.
pub fn node_id_for(host: &str, port: i32) -> i32 {
    let key = format!("{}{}", host, port);
    // Reading from an in-memory cursor cannot fail
    let hash = murmur3::murmur3_32(&mut Cursor::new(key.as_bytes()), 0).unwrap_or(0);
    (hash as i32) & i32::MAX
}

/// Split `SCHEME://host:port` into host and port
pub fn parse_listener_url(url: &str) -> Option<(String, i32)> {
    let (_, authority) = url.split_once("://")?;
    let authority = authority.trim_end_matches('/');
    let (host, port) = authority.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<i32>().ok()?;
    Some((host.to_string(), port))
}
