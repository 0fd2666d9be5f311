//! Recognized configuration options for clients, servers, and executors.
//!
//! Every struct deserializes from whatever configuration front-end the
//! embedding application uses; unset fields take the documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options recognized by the client connections (TCP and HTTP).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Milliseconds to wait for the transport to become connected.
    pub connect_timeout_ms: u64,
    /// Read inactivity limit on the transport.
    pub read_timeout_ms: u64,
    /// Write inactivity limit on the transport.
    pub write_timeout_ms: u64,
    /// Timeout applied to a query when the caller passes none.
    pub default_request_timeout_ms: u64,
    /// Buffer-DoS guards enforced at the transport and codec seams.
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub max_chunk_size: usize,
    pub max_num_chunks: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            default_request_timeout_ms: 20_000,
            max_header_size: 8 * 1024,
            max_body_size: 4 * 1024 * 1024,
            max_chunk_size: 64 * 1024,
            max_num_chunks: 1024,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

/// Options recognized by the service wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Milliseconds to wait for a remote call return.
    pub call_timeout_ms: u64,
}

impl Default for WrapperConfig {
    fn default() -> Self { Self { call_timeout_ms: 5000 } }
}

/// Reply write mode of the TCP server connection.
///
/// `InWriter` pushes the raw message to the connection writer task which
/// encodes before writing; `Immediate` encodes on the completing worker and
/// pushes ready bytes. The first keeps workers cheap, the second keeps the
/// writer cheap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyEncoding {
    #[default]
    InWriter,
    Immediate,
}

/// Options recognized by the TCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upper bound on queries in execution per connection.
    pub max_concurrent_requests_per_connection: usize,
    /// Where reply encoding happens.
    pub reply_encoding: ReplyEncoding,
    /// Cap on a single encoded reply.
    pub max_reply_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests_per_connection: 256,
            reply_encoding: ReplyEncoding::InWriter,
            max_reply_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Address class a caller must belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpClass {
    /// Loopback addresses only.
    Loopback,
    /// Loopback plus RFC 1918 / ULA ranges.
    Private,
}

impl IpClass {
    /// Whether `addr` belongs to this class.
    #[must_use]
    pub fn admits(self, addr: std::net::IpAddr) -> bool {
        match self {
            Self::Loopback => addr.is_loopback(),
            Self::Private => {
                addr.is_loopback()
                    || match addr {
                        std::net::IpAddr::V4(v4) => v4.is_private(),
                        std::net::IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
                    }
            }
        }
    }
}

/// Options recognized by the HTTP processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpProcessorConfig {
    /// Serve the interactive HTML form pages under `/__forms`.
    pub enable_auto_forms: bool,
    /// Upper bound on requests in execution across the processor.
    pub max_concurrent_requests: usize,
    /// Cap on a single encoded reply body.
    pub max_reply_buffer_size: usize,
    /// Admit only callers in this address class; `None` admits everyone.
    pub ip_class_restriction: Option<IpClass>,
    /// URL prefix the processor is mounted under.
    pub path_prefix: String,
}

impl Default for HttpProcessorConfig {
    fn default() -> Self {
        Self {
            enable_auto_forms: false,
            max_concurrent_requests: 1024,
            max_reply_buffer_size: 4 * 1024 * 1024,
            ip_class_restriction: None,
            path_prefix: "/rpc".to_owned(),
        }
    }
}

/// Options recognized by the pool executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Saturation cap: queries queued or executing beyond this are refused.
    pub max_concurrent_queries: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_concurrent_queries: 999,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        assert_eq!(WrapperConfig::default().call_timeout_ms, 5000);
        assert_eq!(ExecutorConfig::default().max_concurrent_queries, 999);
        assert_eq!(HttpProcessorConfig::default().path_prefix, "/rpc");
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let cfg: ExecutorConfig = serde_json::from_str(r#"{"worker_count": 8}"#).unwrap();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.max_concurrent_queries, 999);
    }

    #[test]
    fn ip_classes_admit_expected_ranges() {
        let loopback: std::net::IpAddr = "127.0.0.1".parse().unwrap();
        let private: std::net::IpAddr = "10.1.2.3".parse().unwrap();
        let public: std::net::IpAddr = "93.184.216.34".parse().unwrap();

        assert!(IpClass::Loopback.admits(loopback));
        assert!(!IpClass::Loopback.admits(private));
        assert!(IpClass::Private.admits(loopback));
        assert!(IpClass::Private.admits(private));
        assert!(!IpClass::Private.admits(public));
    }
}
