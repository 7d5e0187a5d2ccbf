//! Passive open: the welcome socket and the accept loop.
//!
//! An [`Acceptor`] owns the welcome socket bound to the well-known address.
//! Each [`Acceptor::accept`] call runs one handshake:
//!
//! 1. LISTEN: poll the welcome socket in bounded slices, dropping anything
//!    that is not a bare SYN, until a SYN arrives.
//! 2. SYN_RECEIVED: bind a per-connection socket, send the SYN-ACK from the
//!    welcome socket naming the new port, wait on the new socket for the ACK.
//!
//! The welcome socket survives failed handshakes and is reused by the next
//! `accept`.  A single peer is served per handshake; concurrent SYNs from
//! other peers wait in the socket buffer until the next call.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::Config;
use crate::connection::{perform, Connection};
use crate::error::ConnError;
use crate::socket::{recv_within, Socket, Transport};
use crate::state::{ConnectionState, Event, Machine};

/// Cloneable request to stop an [`Acceptor`].
///
/// The accept loop notices the request between bounded polls, so shutdown
/// takes effect within one `Config::listen_poll`.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Accepts connections arriving on a welcome socket.
#[derive(Debug)]
pub struct Acceptor<T: Transport = Socket, R = StdRng> {
    /// `None` once shut down.
    welcome: Option<T>,
    local_addr: SocketAddr,
    config: Config,
    rng: R,
    shutdown: ShutdownHandle,
}

impl<T: Transport, R: Rng + Send> Acceptor<T, R> {
    /// Listen on an already-bound welcome socket.
    pub fn new(welcome: T, config: Config, rng: R) -> Self {
        let local_addr = welcome.local_addr();
        log::info!("[server] listening on {local_addr}");
        Self {
            welcome: Some(welcome),
            local_addr,
            config,
            rng,
            shutdown: ShutdownHandle::default(),
        }
    }

    /// Address of the welcome socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Wait for a peer's SYN and complete the handshake with it.
    ///
    /// Returns [`ConnError::ListenerClosed`] once a shutdown was requested;
    /// the welcome socket is closed at that point and every later call fails
    /// the same way.  Handshake failures leave the welcome socket open.
    pub async fn accept(&mut self) -> Result<Connection<T>, ConnError> {
        let Some(welcome) = self.welcome.as_ref() else {
            return Err(ConnError::ListenerClosed);
        };
        let mut machine = Machine::listener(self.local_addr.port());
        let mut connection: Option<T> = None;

        let connection = loop {
            let effects = match machine.state() {
                ConnectionState::Listen => {
                    if self.shutdown.is_shutdown() {
                        break None;
                    }
                    match recv_within(welcome, Some(self.config.listen_poll)).await {
                        Ok((segment, from)) => {
                            log::debug!("[server] got message from {from}");
                            log::trace!("[server] <- {segment:?}");
                            machine.handle(Event::Segment { segment, from })?
                        }
                        Err(ConnError::ConnectionTimeout(_)) => continue,
                        Err(ConnError::MalformedSegment(e)) => {
                            log::warn!("[server] dropping malformed datagram: {e}");
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                ConnectionState::SynReceived if !machine.syn_ack_sent() => {
                    let socket = welcome.bind_sibling().await?;
                    let isn: u32 = self.rng.random();
                    log::debug!(
                        "[server] connection socket {} ISN {isn}",
                        socket.local_addr()
                    );
                    let effects = machine.handle(Event::Accept {
                        isn,
                        port: socket.local_addr().port(),
                    })?;
                    perform(effects, &socket, Some(welcome), "[server]").await?;
                    connection = Some(socket);
                    continue;
                }
                ConnectionState::SynReceived => {
                    let socket = connection.as_ref().ok_or(ConnError::InvalidStateTransition {
                        state: ConnectionState::SynReceived,
                        event: "await ACK",
                    })?;
                    log::debug!("[server] awaiting ACK");
                    let (segment, from) =
                        recv_within(socket, Some(self.config.handshake_timeout)).await?;
                    log::trace!("[server] <- {segment:?} from {from}");
                    machine.handle(Event::Segment { segment, from })?
                }
                ConnectionState::Established => break connection,
                state => {
                    return Err(ConnError::InvalidStateTransition {
                        state,
                        event: "accept",
                    })
                }
            };
            // Discards and the final ACK produce no sends.
            perform(effects, welcome, Some(welcome), "[server]").await?;
        };

        let Some(socket) = connection else {
            log::info!("[server] shutting down gracefully");
            self.welcome = None;
            return Err(ConnError::ListenerClosed);
        };
        let conn = Connection::established(socket, machine.into_tcb())?;
        log::info!(
            "[server] connection established with {} on {}",
            conn.peer_addr(),
            conn.local_addr()
        );
        Ok(conn)
    }
}
