//! Timeouts and buffer sizes for connection attempts.

use std::time::Duration;

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
pub const MAX_DATAGRAM: usize = 65_535;

/// Adjustable bounds applied by the handshake drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bound on each receive while in LISTEN.  Between polls the accept loop
    /// checks whether it has been asked to shut down.
    pub listen_poll: Duration,
    /// Bound on the wait for a SYN-ACK (client) or the final ACK (server).
    pub handshake_timeout: Duration,
    /// Size of the receive buffer handed to the socket.  Longer datagrams are
    /// truncated by the OS.
    pub recv_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_poll: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(3),
            recv_buffer: MAX_DATAGRAM,
        }
    }
}

impl Config {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_listen_poll(mut self, poll: Duration) -> Self {
        self.listen_poll = poll;
        self
    }
}
