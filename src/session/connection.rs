//! Pure connection state management for the session layer.
//!
//! Contains the connection state machine vocabulary, the retry policy and
//! broker option construction. No I/O happens here.

use crate::error::SessionError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Connection state for the managed session.
///
/// Exactly one instance exists, owned by the connection controller; every
/// transition goes through it. There is deliberately no distinct
/// "reconnecting" variant: because retries never cap, re-dialing after a
/// drop is just `Connecting` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no connect loop running
    Disconnected,
    /// Connect loop running, no live connection yet
    Connecting,
    /// Live connection established and ready for operations
    Connected,
}

impl ConnectionState {
    /// Whether publishing is allowed in this state.
    pub fn can_publish(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether subscription changes are allowed in this state.
    pub fn can_subscribe(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Retry policy for the connect loop: a single fixed interval.
///
/// Failed connect attempts are retried forever at this interval; the only
/// escape hatches are an explicit disconnect request or process exit.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay between failed connect attempts, in milliseconds
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Build rumqttc options from the broker locator and client identity.
///
/// Deeper validation of the locator is left to the transport; this only
/// needs a parseable URL with a host.
pub fn configure_mqtt_options(
    broker_url: &str,
    client_id: &str,
) -> Result<MqttOptions, SessionError> {
    let url = Url::parse(broker_url)
        .map_err(|_| SessionError::InvalidBrokerUrl(broker_url.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| SessionError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut options = MqttOptions::new(client_id, host, port);

    // TLS for mqtts:// URLs
    if url.scheme() == "mqtts" {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    options.set_keep_alive(Duration::from_secs(60));

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_guards() {
        assert!(ConnectionState::Connected.can_publish());
        assert!(ConnectionState::Connected.can_subscribe());

        for state in [ConnectionState::Disconnected, ConnectionState::Connecting] {
            assert!(!state.can_publish());
            assert!(!state.can_subscribe());
        }
    }

    #[test]
    fn test_retry_policy_default_interval() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval_ms, 10_000);
        assert_eq!(policy.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options("mqtt://localhost:1883", "dev-1");
        assert!(options.is_ok());
    }

    #[test]
    fn test_configure_mqtt_options_default_port() {
        // Plain mqtt defaults to 1883, mqtts to 8883
        assert!(configure_mqtt_options("mqtt://broker.local", "dev-1").is_ok());
        assert!(configure_mqtt_options("mqtts://broker.local", "dev-1").is_ok());
    }

    #[test]
    fn test_invalid_broker_url() {
        let result = configure_mqtt_options("not a url", "dev-1");
        assert!(matches!(result, Err(SessionError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_broker_url_without_host() {
        let result = configure_mqtt_options("mqtt:///nohost", "dev-1");
        assert!(matches!(result, Err(SessionError::InvalidBrokerUrl(_))));
    }
}
