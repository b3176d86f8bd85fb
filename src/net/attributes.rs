//! Typed attribute maps attached to connections and streams.
//!
//! # Responsibilities
//! - Store connection-scoped metadata (addresses, TLS, proxy protocol, config)
//! - Name the fixed set of keys a stream inherits from its connection
//!
//! # Design Decisions
//! - Keys carry their value type (`AttributeKey<T>`), values are stored type-erased
//! - Values are `Arc`ed, so copying between maps never clones the payload
//! - Setting `None` clears a key, which is how an absent parent value propagates

use bytes::Bytes;
use dashmap::DashMap;
use std::any::Any;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::StreamConfig;

type RawValue = Arc<dyn Any + Send + Sync>;

/// Name plus value type of an attribute.
#[derive(Debug)]
pub struct AttributeKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

/// Concurrent, type-erased attribute storage.
#[derive(Debug, Default)]
pub struct AttributeMap {
    values: DashMap<&'static str, RawValue>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&self, key: AttributeKey<T>, value: T) {
        self.values.insert(key.name, Arc::new(value));
    }

    /// Typed read. `None` if unset or stored with a different type.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: AttributeKey<T>) -> Option<T> {
        let raw = self.raw(key.name)?;
        raw.downcast_ref::<T>().cloned()
    }

    pub fn remove<T>(&self, key: AttributeKey<T>) {
        self.values.remove(key.name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Type-erased read, used when copying between maps.
    pub fn raw(&self, name: &str) -> Option<RawValue> {
        self.values.get(name).map(|v| Arc::clone(v.value()))
    }

    /// Type-erased write; `None` clears the key.
    pub fn set_raw(&self, name: &'static str, value: Option<RawValue>) {
        match value {
            Some(value) => {
                self.values.insert(name, value);
            }
            None => {
                self.values.remove(name);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Summary of the TLS handshake on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHandshakeInfo {
    pub protocol: String,
    pub cipher: String,
    pub sni: Option<String>,
    pub client_cert_subject: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocolVersion {
    V1,
    V2,
}

/// Raw proxy-protocol header as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyProtocolHeader {
    pub version: ProxyProtocolVersion,
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

/// Custom type-length-value entry from a proxy-protocol v2 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTlv {
    pub kind: u8,
    pub value: Bytes,
}

/// Connection-level dimensions recorded for metrics and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDimensions {
    pub listener: String,
    pub tags: Vec<(String, String)>,
}

pub const LOCAL_ADDRESS: AttributeKey<String> = AttributeKey::new("local_address");
pub const LOCAL_SOCKET_ADDR: AttributeKey<SocketAddr> = AttributeKey::new("local_socket_addr");
pub const SOURCE_ADDRESS: AttributeKey<String> = AttributeKey::new("source_address");
pub const REMOTE_SOCKET_ADDR: AttributeKey<SocketAddr> = AttributeKey::new("remote_socket_addr");
pub const SOURCE_SOCKET_ADDR: AttributeKey<SocketAddr> = AttributeKey::new("source_socket_addr");
pub const SERVER_LOCAL_ADDRESS: AttributeKey<String> = AttributeKey::new("server_local_address");
pub const SERVER_LOCAL_PORT: AttributeKey<u16> = AttributeKey::new("server_local_port");
pub const PROXY_PROTOCOL_DESTINATION: AttributeKey<SocketAddr> =
    AttributeKey::new("proxy_protocol_destination");
pub const PROTOCOL_NAME: AttributeKey<String> = AttributeKey::new("protocol_name");
pub const TLS_HANDSHAKE_INFO: AttributeKey<TlsHandshakeInfo> = AttributeKey::new("tls_handshake_info");
pub const PROXY_PROTOCOL_MESSAGE: AttributeKey<ProxyProtocolHeader> =
    AttributeKey::new("proxy_protocol_message");
pub const PROXY_PROTOCOL_VERSION: AttributeKey<ProxyProtocolVersion> =
    AttributeKey::new("proxy_protocol_version");
pub const PROXY_PROTOCOL_TLVS: AttributeKey<Vec<ProxyTlv>> = AttributeKey::new("proxy_protocol_tlvs");
pub const CHANNEL_CONFIG: AttributeKey<Arc<StreamConfig>> = AttributeKey::new("channel_config");
pub const CONNECTION_DIMENSIONS: AttributeKey<ConnectionDimensions> =
    AttributeKey::new("connection_dimensions");

/// Keys copied from a connection to each of its streams, and no others.
pub const STREAM_INHERITED_KEYS: [&str; 15] = [
    LOCAL_ADDRESS.name,
    LOCAL_SOCKET_ADDR.name,
    SOURCE_ADDRESS.name,
    REMOTE_SOCKET_ADDR.name,
    SOURCE_SOCKET_ADDR.name,
    SERVER_LOCAL_ADDRESS.name,
    SERVER_LOCAL_PORT.name,
    PROXY_PROTOCOL_DESTINATION.name,
    PROTOCOL_NAME.name,
    TLS_HANDSHAKE_INFO.name,
    PROXY_PROTOCOL_MESSAGE.name,
    PROXY_PROTOCOL_VERSION.name,
    PROXY_PROTOCOL_TLVS.name,
    CHANNEL_CONFIG.name,
    CONNECTION_DIMENSIONS.name,
];

/// Copy the inherited keys from `parent` to `child`, read-then-set per key.
pub fn copy_inherited(parent: &AttributeMap, child: &AttributeMap) {
    for name in STREAM_INHERITED_KEYS {
        child.set_raw(name, parent.raw(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let map = AttributeMap::new();
        map.set(SERVER_LOCAL_PORT, 8443);
        assert_eq!(map.get(SERVER_LOCAL_PORT), Some(8443));
        map.remove(SERVER_LOCAL_PORT);
        assert_eq!(map.get(SERVER_LOCAL_PORT), None);
    }

    #[test]
    fn copy_clears_absent_keys() {
        let parent = AttributeMap::new();
        let child = AttributeMap::new();
        child.set(PROTOCOL_NAME, "stale".to_string());
        parent.set(SOURCE_ADDRESS, "10.0.0.1".to_string());

        copy_inherited(&parent, &child);

        assert_eq!(child.get(SOURCE_ADDRESS).as_deref(), Some("10.0.0.1"));
        assert!(!child.contains(PROTOCOL_NAME.name()));
    }

    #[test]
    fn inherited_keys_are_distinct() {
        let mut names = STREAM_INHERITED_KEYS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), STREAM_INHERITED_KEYS.len());
    }
}
