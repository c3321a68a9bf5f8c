use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::ensure;
use serde::{Deserialize, Serialize};

use crate::sink::SinkConfig;

#[inline]
fn default_probe_address() -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 1], 1))
}
#[inline]
fn default_broadcast_address() -> SocketAddr {
    SocketAddr::from(([255, 255, 255, 255], 12345))
}
#[inline]
fn default_request() -> String {
    "GET DATA".to_string()
}
#[inline]
fn default_response_timeout() -> Duration {
    Duration::from_secs(3)
}
#[inline]
fn default_max_datagram() -> usize {
    1024
}
#[inline]
fn default_poll_period() -> Duration {
    Duration::from_millis(3000)
}
#[inline]
fn default_http_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12346))
}
#[inline]
fn default_history() -> usize {
    600
}
#[inline]
fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::File(crate::sink::FileConfig::default())]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct Config {
    // Local address to send discovery requests from
    // optional, default: detected from the outbound route
    #[serde(default)]
    pub bind_ip: Option<IpAddr>,
    // Address used to discover the outbound route, nothing is sent to it
    // optional, default: 192.168.1.1:1
    #[serde(default = "default_probe_address")]
    pub probe_address: SocketAddr,
    // Where discovery requests are sent
    // optional, default: 255.255.255.255:12345
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: SocketAddr,
    // Discovery request payload
    // optional, default: GET DATA
    #[serde(default = "default_request")]
    pub request: String,
    // Window for collecting responses after a request
    // optional, default: 3s
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,
    // Largest accepted response datagram in bytes
    // optional, default: 1024
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
    // Polling period
    // optional, default: 3s
    #[serde(default = "default_poll_period", with = "humantime_serde")]
    pub poll_period: Duration,
    // Address of the HTTP API
    // optional, default: 0.0.0.0:12346
    #[serde(default = "default_http_address")]
    pub http_address: SocketAddr,
    // Number of points kept per device in the rolling history
    // optional, default: 600
    #[serde(default = "default_history")]
    pub history: usize,
    // Where every poll is published besides the in-memory store
    // optional, default: a file sink writing to `logs`
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_ip: None,
            probe_address: default_probe_address(),
            broadcast_address: default_broadcast_address(),
            request: default_request(),
            response_timeout: default_response_timeout(),
            max_datagram: default_max_datagram(),
            poll_period: default_poll_period(),
            http_address: default_http_address(),
            history: default_history(),
            sinks: default_sinks(),
        }
    }
}

impl Config {
    /// Reject values that parse but cannot drive the poll loop.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.poll_period.is_zero(), "poll_period must be greater than zero");
        ensure!(
            !self.response_timeout.is_zero(),
            "response_timeout must be greater than zero"
        );
        ensure!(self.max_datagram > 0, "max_datagram must be greater than zero");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.broadcast_address.port(), 12345);
        assert_eq!(config.http_address.port(), 12346);
        assert_eq!(config.response_timeout, Duration::from_secs(3));
        assert_eq!(config.poll_period, Duration::from_millis(3000));
        assert_eq!(config.history, 600);
        assert_eq!(config.request, "GET DATA");
        assert_eq!(config.sinks.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_overrides() {
        let config: Config = serde_yaml::from_str(indoc!(
            "
            bind_ip: 10.0.0.5
            broadcast_address: 10.0.0.255:4000
            response_timeout: 500ms
            poll_period: 10s
            history: 20
            sinks:
              - Console
              - File:
                  dir: /var/log/env
            "
        ))
        .unwrap();
        assert_eq!(config.bind_ip, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(config.broadcast_address.port(), 4000);
        assert_eq!(config.response_timeout, Duration::from_millis(500));
        assert_eq!(config.poll_period, Duration::from_secs(10));
        assert_eq!(config.history, 20);
        assert!(matches!(config.sinks[0], SinkConfig::Console));
        assert!(matches!(config.sinks[1], SinkConfig::File(_)));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config: Config = serde_yaml::from_str("poll_period: 0s").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_period"));

        let config: Config = serde_yaml::from_str("response_timeout: 0ms").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("response_timeout"));
    }

    #[test]
    fn probe_address_must_be_a_socket_address() {
        let config: Config = serde_yaml::from_str("probe_address: 10.1.2.3:9").unwrap();
        assert_eq!(config.probe_address, "10.1.2.3:9".parse().unwrap());
        assert!(serde_yaml::from_str::<Config>("probe_address: router.lan:1").is_err());
    }
}
