//! Relay configuration.

use std::net::SocketAddr;

use keyrelay_core::frame::MAX_LINE_LENGTH;
use keyrelay_core::DEFAULT_KEY_BITS;

/// Port the relay has always listened on.
pub const DEFAULT_PORT: u16 = 12345;

/// Sessions accepted before new connections are turned away.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// Ciphertext lines buffered per session before broadcasts to it fail.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Settings for one relay instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to listen on.
    pub listen: SocketAddr,
    /// RSA modulus size for the relay key.
    pub key_bits: usize,
    /// Maximum number of concurrently registered sessions.
    pub max_sessions: usize,
    /// Per-session outbound queue depth.
    pub queue_depth: usize,
    /// Longest accepted line, in bytes.
    pub max_line_length: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            key_bits: DEFAULT_KEY_BITS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl RelayConfig {
    /// Default settings on a specific address.
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Self::default()
        }
    }

    /// Cap concurrent sessions.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the per-session outbound queue depth. Clamped to at least 1.
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth.max(1);
        self
    }

    /// Set the longest accepted line.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Set the relay key size.
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.listen.port(), 12345);
        assert_eq!(config.key_bits, 2048);
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
    }

    #[test]
    fn test_queue_depth_never_zero() {
        let config = RelayConfig::default().with_queue_depth(0);
        assert_eq!(config.queue_depth, 1);
    }
}
