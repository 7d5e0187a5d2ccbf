//! Error taxonomy shared by the handshake drivers and established connections.

use std::time::Duration;

use thiserror::Error;

use crate::packet::{flags, SegmentError};
use crate::state::ConnectionState;

/// Everything that can end a connection attempt or an established exchange.
///
/// Every variant is fatal for the attempt in progress.  There is no automatic
/// retry, and the sockets owned by a failed handshake have already been
/// dropped when the error reaches the caller.
#[derive(Error, Debug)]
pub enum ConnError {
    /// The datagram was too short to hold a header.
    #[error("malformed segment: {0}")]
    MalformedSegment(#[from] SegmentError),

    /// The segment's flag set differs from the exact set the state requires.
    #[error("expected a {} segment from the peer, got {}", flag_names(.expected), flag_names(.got))]
    UnexpectedFlags { expected: u8, got: u8 },

    /// The segment acknowledges something other than our next sequence number.
    #[error("unACKed response from the peer: expected ack {expected}, got {got}")]
    UnacknowledgedSegment { expected: u32, got: u32 },

    /// No qualifying reply arrived within the bound.
    #[error("timed out after {0:?} waiting for the peer")]
    ConnectionTimeout(Duration),

    /// A state machine was driven with an event its current state does not
    /// handle.  Signals a bug in a driver, never a peer's misbehaviour.
    #[error("no transition from {state} on {event}")]
    InvalidStateTransition {
        state: ConnectionState,
        event: &'static str,
    },

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The accept loop observed a shutdown request and closed the welcome
    /// socket.
    #[error("listener shut down")]
    ListenerClosed,
}

fn flag_names(bits: &u8) -> String {
    flags::describe(*bits)
}
