//! Client configuration.

use keyrelay_core::frame::MAX_LINE_LENGTH;

/// Where a relay listens unless told otherwise.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:12345";

/// Configuration for connecting to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay address as `host:port`. Resolved on connect.
    pub relay_addr: String,
    /// Longest line accepted from the relay, in bytes.
    pub max_line_length: usize,
}

impl ClientConfig {
    /// Connect to `relay_addr` with default limits.
    pub fn new(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            ..Self::default()
        }
    }

    /// Override the inbound line limit.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}
