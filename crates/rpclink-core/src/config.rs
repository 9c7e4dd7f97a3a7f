//! Client configuration.
//!
//! Only the transport is mandatory. Collaborators left unset are created by
//! the client with default settings.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::NotificationBus;
use crate::correlation::{CorrelationTracker, TrackerConfig};
use crate::error::ClientError;
use crate::transport::TransportChannel;

/// Configuration for [`ClientCore`](crate::ClientCore).
#[derive(Clone)]
pub struct ClientConfig {
    /// The channel messages travel over. Required.
    pub transport: Option<Arc<dyn TransportChannel>>,
    /// Where lifecycle and message notifications go. Defaults to a
    /// [`BroadcastBus`](crate::BroadcastBus).
    pub bus: Option<Arc<dyn NotificationBus>>,
    /// Pending-request tracker. Defaults to a
    /// [`TimeoutTracker`](crate::TimeoutTracker) built from the timings below.
    pub tracker: Option<Arc<dyn CorrelationTracker>>,
    /// How often pending requests are checked for expiry.
    pub message_check_interval: Duration,
    /// How long a request may wait for its reply.
    pub message_timeout: Duration,
    /// Accepted for compatibility; no reconnect logic exists.
    pub reconnect: bool,
    /// Accepted for compatibility; no reconnect logic exists.
    pub reconnect_after: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: None,
            bus: None,
            tracker: None,
            message_check_interval: Duration::from_millis(1000),
            message_timeout: Duration::from_millis(5000),
            reconnect: false,
            reconnect_after: Duration::from_millis(5000),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("transport", &self.transport.as_ref().map(|t| t.url().to_string()))
            .field("bus", &self.bus.is_some())
            .field("tracker", &self.tracker.is_some())
            .field("message_check_interval", &self.message_check_interval)
            .field("message_timeout", &self.message_timeout)
            .field("reconnect", &self.reconnect)
            .field("reconnect_after", &self.reconnect_after)
            .finish()
    }
}

impl ClientConfig {
    /// Default configuration over `transport`.
    pub fn new(transport: Arc<dyn TransportChannel>) -> Self {
        Self::default().with_transport(transport)
    }

    pub fn with_transport(mut self, transport: Arc<dyn TransportChannel>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replace the default tracker. The timing fields are then ignored.
    pub fn with_tracker(mut self, tracker: Arc<dyn CorrelationTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_message_check_interval(mut self, interval: Duration) -> Self {
        self.message_check_interval = interval;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool, after: Duration) -> Self {
        self.reconnect = reconnect;
        self.reconnect_after = after;
        self
    }

    /// Timings for the default tracker.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            check_interval: self.message_check_interval,
            message_timeout: self.message_timeout,
        }
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.transport.is_none() {
            return Err(ClientError::Config("a transport channel is required".into()));
        }
        if self.message_check_interval.is_zero() {
            return Err(ClientError::Config(
                "message_check_interval must be greater than zero".into(),
            ));
        }
        if self.message_timeout.is_zero() {
            return Err(ClientError::Config(
                "message_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::memory_channel;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.message_check_interval, Duration::from_millis(1000));
        assert_eq!(config.message_timeout, Duration::from_millis(5000));
        assert!(!config.reconnect);
        assert_eq!(config.reconnect_after, Duration::from_millis(5000));
    }

    #[test]
    fn transport_is_required() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn zero_durations_rejected() {
        let (channel, _peer) = memory_channel("mem");
        let config = ClientConfig::new(Arc::new(channel));
        assert!(config.validate().is_ok());

        let bad = config.clone().with_message_timeout(Duration::ZERO);
        assert!(bad.validate().is_err());

        let bad = config.with_message_check_interval(Duration::ZERO);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn debug_shows_transport_url() {
        let (channel, _peer) = memory_channel("mem://test");
        let config = ClientConfig::new(Arc::new(channel));
        assert!(format!("{config:?}").contains("mem://test"));
    }
}
