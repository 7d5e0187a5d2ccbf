//! Active open and the established, stop-and-wait connection.
//!
//! [`Connection::connect_with`] drives a client [`Machine`] from CLOSED to
//! ESTABLISHED over any [`Transport`]; the listener side lives in
//! [`crate::listener`].  Both hand back a [`Connection`], which exchanges one
//! segment at a time:
//!
//! ```text
//!  send(data):  ──▶ ACK seq=SND.NXT ack=RCV.NXT data     (SND.NXT += len)
//!               ◀── ACK ack must equal SND.NXT
//!
//!  recv(n):     ◀── ACK ack must equal SND.NXT data      (RCV.NXT = seq + len)
//!               ──▶ ACK ack=RCV.NXT
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::config::Config;
use crate::error::ConnError;
use crate::packet::{flags, Segment};
use crate::socket::{recv_within, Socket, Transport};
use crate::state::{ConnectionState, Effect, Event, Machine, Tcb, Via};

/// A handle to a single established connection over UDP.
///
/// Owns its per-connection socket; dropping the connection closes it.
#[derive(Debug)]
pub struct Connection<T: Transport = Socket> {
    state: ConnectionState,
    socket: T,
    tcb: Tcb,
    peer: SocketAddr,
    /// Bound on each receive in `send`/`recv`.  `None` blocks indefinitely.
    timeout: Option<Duration>,
}

impl<T: Transport> Connection<T> {
    /// Perform an active open from `socket` towards the listener at `peer`.
    ///
    /// The initial sequence number is drawn from `rng`.  On any failure
    /// `socket` is dropped before the error is returned.
    pub async fn connect_with<R: Rng + Send>(
        socket: T,
        peer: SocketAddr,
        config: &Config,
        rng: &mut R,
    ) -> Result<Self, ConnError> {
        log::info!(
            "[client] connecting {} -> {peer}",
            socket.local_addr()
        );
        let mut machine = Machine::client(socket.local_addr().port(), peer);

        loop {
            let effects = match machine.state() {
                ConnectionState::Closed => {
                    let isn: u32 = rng.random();
                    log::debug!("[client] ISN {isn}");
                    machine.handle(Event::Open { isn })?
                }
                ConnectionState::SynSent => {
                    log::debug!("[client] awaiting SYN-ACK");
                    let (segment, from) =
                        recv_within(&socket, Some(config.handshake_timeout)).await?;
                    log::trace!("[client] <- {segment:?} from {from}");
                    machine.handle(Event::Segment { segment, from })?
                }
                ConnectionState::Established => break,
                state => {
                    return Err(ConnError::InvalidStateTransition {
                        state,
                        event: "connect",
                    })
                }
            };
            perform(effects, &socket, None, "[client]").await?;
        }

        let conn = Self::established(socket, machine.into_tcb())?;
        log::info!("[client] connection established with {}", conn.peer);
        Ok(conn)
    }

    /// Wrap a socket whose handshake has completed.
    pub(crate) fn established(socket: T, tcb: Tcb) -> Result<Self, ConnError> {
        let peer = tcb.peer.ok_or(ConnError::InvalidStateTransition {
            state: ConnectionState::Established,
            event: "establish",
        })?;
        Ok(Self {
            state: ConnectionState::Established,
            socket,
            tcb,
            peer,
            timeout: None,
        })
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send `data` as one segment and wait for the peer to acknowledge it.
    ///
    /// The confirming segment must be a bare ACK whose ack number equals our
    /// post-send sequence number; anything else is fatal.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ConnError> {
        let segment = self.tcb.segment(flags::ACK, data.to_vec());
        self.socket.send_to(&segment, self.peer).await?;
        self.tcb.on_sent(&segment);
        log::debug!(
            "[conn] -> DATA seq={} ack={} len={}",
            segment.seq,
            segment.ack,
            data.len()
        );

        let (reply, from) = recv_within(&self.socket, self.timeout).await?;
        log::trace!("[conn] <- {reply:?} from {from}");
        self.tcb.check(&reply, flags::ACK)?;
        self.tcb.on_received(&reply);
        log::debug!("[conn] <- ACK ack={}", reply.ack);
        Ok(())
    }

    /// Receive one segment, acknowledge it, and return up to `max_len` bytes
    /// of its payload.
    ///
    /// As with a datagram read, bytes beyond `max_len` are discarded.  The
    /// acknowledgment still covers the whole segment.
    pub async fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, ConnError> {
        let (segment, from) = recv_within(&self.socket, self.timeout).await?;
        log::trace!("[conn] <- {segment:?} from {from}");
        self.tcb.check(&segment, flags::ACK)?;
        self.tcb.on_received(&segment);

        let ack = self.tcb.segment(flags::ACK, Vec::new());
        self.socket.send_to(&ack, self.peer).await?;
        self.tcb.on_sent(&ack);
        log::debug!(
            "[conn] <- DATA seq={} len={}; -> ACK ack={}",
            segment.seq,
            segment.payload.len(),
            ack.ack
        );

        let mut payload = segment.payload;
        if payload.len() > max_len {
            log::warn!(
                "[conn] segment of {} bytes truncated to {max_len}",
                payload.len()
            );
            payload.truncate(max_len);
        }
        Ok(payload)
    }

    /// Bound every subsequent receive by `timeout`, or block indefinitely
    /// with `None`.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Next sequence number this side will send.
    pub fn snd_nxt(&self) -> u32 {
        self.tcb.snd_nxt
    }

    /// Next sequence number this side expects from the peer.
    pub fn rcv_nxt(&self) -> u32 {
        self.tcb.rcv_nxt
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.tcb.last_segment.as_ref()
    }
}

/// Carry out the effects of one transition.
///
/// `welcome` is only present on the listener side; a `Via::Welcome` send
/// without it is a driver bug.
pub(crate) async fn perform<T: Transport>(
    effects: Vec<Effect>,
    connection: &T,
    welcome: Option<&T>,
    role: &str,
) -> Result<(), ConnError> {
    for effect in effects {
        match effect {
            Effect::Send { segment, to, via } => {
                let socket = match via {
                    Via::Connection => connection,
                    Via::Welcome => welcome.ok_or(ConnError::InvalidStateTransition {
                        state: ConnectionState::SynReceived,
                        event: "send via welcome socket",
                    })?,
                };
                log::debug!(
                    "{role} -> {} seq={} ack={} to {to}",
                    flags::describe(segment.flags),
                    segment.seq,
                    segment.ack
                );
                socket.send_to(&segment, to).await?;
            }
            Effect::Discard { segment, from } => {
                log::info!(
                    "{role} ignoring non-SYN segment ({}) from {from}",
                    flags::describe(segment.flags)
                );
            }
        }
    }
    Ok(())
}
