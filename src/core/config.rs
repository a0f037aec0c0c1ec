//! # Client configuration.
//!
//! Provides [`ClientConfig`], the settings for one device link, and
//! [`TelemetryConfig`] for the optional UDP meter listener.
//!
//! Both deserialize with `serde`; durations are written in milliseconds
//! (`request_timeout_ms = 3000`) and every field falls back to its default.
//!
//! ## Sentinel values
//! - `keepalive_interval = 0s` → keep-alive disabled
//! - `stable_after = 0s` → every established session resets the redial backoff
//! - `max_in_flight = 0` → unlimited outstanding requests (no semaphore)
//! - `telemetry = None` → no UDP listener

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::BackoffPolicy;

/// Default TCP command port of the device.
pub const DEFAULT_PORT: u16 = 5321;
/// Default UDP meter port.
pub const DEFAULT_TELEMETRY_PORT: u16 = 3131;

/// Configuration of one device client.
///
/// ## Field semantics
/// - `connect_timeout`: bound on a single TCP dial
/// - `request_timeout`: bound on one request, from enqueue to response
/// - `queue_timeout`: how long a call waits for the link while disconnected
/// - `grace`: how long `shutdown()` waits for in-flight requests
///
/// All fields are public; prefer the helper accessors over sentinel checks.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Device host name or IP address.
    pub host: String,
    /// Device TCP command port.
    pub port: u16,

    /// Maximum time for one TCP dial.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Per-request response timeout.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Maximum wait for a connection before a call fails with `NotConnected`.
    #[serde(rename = "queue_timeout_ms", with = "duration_ms")]
    pub queue_timeout: Duration,

    /// Keep-alive probe interval (`0s` = disabled).
    #[serde(rename = "keepalive_interval_ms", with = "duration_ms")]
    pub keepalive_interval: Duration,
    /// Parameter read by the keep-alive probe.
    pub keepalive_param: String,

    /// Minimum session lifetime that resets the redial backoff. Shorter
    /// sessions count as failed attempts.
    #[serde(rename = "stable_after_ms", with = "duration_ms")]
    pub stable_after: Duration,

    /// Maximum wait for in-flight requests during shutdown.
    #[serde(rename = "grace_ms", with = "duration_ms")]
    pub grace: Duration,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
    /// Capacity of the outgoing frame queue (min 1).
    pub write_queue: usize,
    /// Capacity of each subscription listener queue (min 1).
    pub listener_queue: usize,
    /// Maximum outstanding requests (`0` = unlimited).
    pub max_in_flight: usize,
    /// Maximum accepted frame length in bytes.
    pub max_frame_len: usize,

    /// Redial policy for the TCP link.
    pub backoff: BackoffPolicy,

    /// UDP meter listener (`None` = disabled).
    pub telemetry: Option<TelemetryConfig>,
}

impl ClientConfig {
    /// Creates a configuration for `host` with every other field at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Returns the keep-alive interval, `None` when disabled.
    #[inline]
    pub fn keepalive(&self) -> Option<Duration> {
        if self.keepalive_interval == Duration::ZERO {
            None
        } else {
            Some(self.keepalive_interval)
        }
    }

    /// Returns the in-flight cap, `None` when unlimited.
    #[inline]
    pub fn in_flight_limit(&self) -> Option<usize> {
        if self.max_in_flight == 0 {
            None
        } else {
            Some(self.max_in_flight)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// `host:port` of the device.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the configuration and resolves the device address.
    ///
    /// Returns the first resolved address; the supervisor dials that one.
    pub fn validate(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "port",
                port: self.port,
            });
        }
        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("queue_timeout", self.queue_timeout),
        ] {
            if value == Duration::ZERO {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.keepalive().is_some() && self.keepalive_param.is_empty() {
            return Err(ConfigError::EmptyKeepAliveParam);
        }

        let addr = self.endpoint();
        let mut resolved = addr
            .to_socket_addrs()
            .map_err(|source| ConfigError::Unresolvable {
                addr: addr.clone(),
                source,
            })?;
        resolved.next().ok_or_else(|| ConfigError::Unresolvable {
            addr,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })
    }
}

impl Default for ClientConfig {
    /// Default configuration:
    ///
    /// - `port = 5321`
    /// - `connect_timeout = 5s`, `request_timeout = 3s`, `queue_timeout = 10s`
    /// - `keepalive_interval = 240s` probing `KeepAlive`
    /// - `stable_after = 10s`
    /// - `grace = 5s`
    /// - `bus_capacity = 1024`, `write_queue = 256`, `listener_queue = 256`
    /// - `max_in_flight = 0` (unlimited), `max_frame_len = 64 KiB`
    /// - `backoff = BackoffPolicy::default()`
    /// - `telemetry = None`
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(3),
            queue_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(240),
            keepalive_param: "KeepAlive".to_string(),
            stable_after: Duration::from_secs(10),
            grace: Duration::from_secs(5),
            bus_capacity: 1024,
            write_queue: 256,
            listener_queue: 256,
            max_in_flight: 0,
            max_frame_len: 64 * 1024,
            backoff: BackoffPolicy::default(),
            telemetry: None,
        }
    }
}

/// Configuration of the UDP meter listener.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Local bind address. Port `0` picks an ephemeral port.
    pub bind: SocketAddr,
    /// Capacity of each telemetry subscriber queue (min 1).
    pub queue: usize,
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram: usize,
    /// Rebind policy after socket errors.
    pub backoff: BackoffPolicy,
}

impl Default for TelemetryConfig {
    /// Binds `0.0.0.0:3131`, `queue = 1024`, `max_datagram = 8 KiB`.
    fn default() -> Self {
        Self {
            bind: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_TELEMETRY_PORT,
            )),
            queue: 1024,
            max_datagram: 8 * 1024,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// `serde` adapter storing a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ClientConfig::new("dsp.local");
        assert_eq!(cfg.port, 5321);
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
        assert_eq!(cfg.keepalive(), Some(Duration::from_secs(240)));
        assert_eq!(cfg.in_flight_limit(), None);
        assert_eq!(cfg.stable_after, Duration::from_secs(10));
        assert_eq!(TelemetryConfig::default().bind.port(), 3131);
    }

    #[test]
    fn test_deserialize_millisecond_fields() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{
                "host": "10.0.0.5",
                "request_timeout_ms": 1500,
                "keepalive_interval_ms": 0,
                "max_in_flight": 8,
                "backoff": { "first_ms": 200, "max_ms": 5000, "jitter": "none" },
                "telemetry": { "bind": "127.0.0.1:0" }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.host, "10.0.0.5");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.request_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.keepalive(), None);
        assert_eq!(cfg.in_flight_limit(), Some(8));
        assert_eq!(cfg.backoff.first, Duration::from_millis(200));
        assert_eq!(cfg.backoff.factor, 2.0);

        let tel = cfg.telemetry.unwrap();
        assert_eq!(tel.bind, "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        assert_eq!(tel.max_datagram, 8 * 1024);
    }

    #[test]
    fn test_validate_resolves_loopback() {
        let addr = ClientConfig::new("127.0.0.1").validate().unwrap();
        assert_eq!(addr, "127.0.0.1:5321".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(matches!(
            ClientConfig::new("  ").validate(),
            Err(ConfigError::EmptyHost)
        ));

        let mut cfg = ClientConfig::new("127.0.0.1");
        cfg.port = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidPort { field: "port", .. })
        ));

        let mut cfg = ClientConfig::new("127.0.0.1");
        cfg.request_timeout = Duration::ZERO;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration {
                field: "request_timeout"
            })
        ));

        let mut cfg = ClientConfig::new("127.0.0.1");
        cfg.keepalive_param.clear();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyKeepAliveParam)
        ));
    }

    #[test]
    fn test_validate_reports_unresolvable_host() {
        let err = ClientConfig::new("no such host.invalid").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Unresolvable { .. }));
    }
}
