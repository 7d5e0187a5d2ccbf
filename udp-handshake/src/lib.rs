//! `udp-handshake`: a TCP-style three-way handshake and stop-and-wait
//! segment exchange over UDP.
//!
//! # Architecture
//!
//! ```text
//!   client                                    server
//!   connect()                                 listen() + Acceptor::accept()
//!
//!   CLOSED ──── SYN ──────────────────────▶  LISTEN        (welcome socket)
//!   SYN_SENT ◀─ SYN-ACK (names new port) ──  SYN_RECEIVED
//!   ESTABLISHED ── ACK ───────────────────▶  ESTABLISHED   (connection socket)
//!
//!   Connection::send / Connection::recv: one unacknowledged segment at a time
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`seq`]: how far a segment moves the sequence counters
//! - [`addr`]: `(host, port)` endpoint names
//! - [`state`]: pure handshake state machine (no I/O)
//! - [`socket`]: transport trait and the tokio UDP implementation
//! - [`connection`]: active open and the established connection
//! - [`listener`]: passive open: welcome socket and accept loop
//! - [`config`]: timeouts and buffer sizes
//! - [`error`]: error taxonomy

pub mod addr;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod packet;
pub mod seq;
pub mod socket;
pub mod state;

use rand::rngs::StdRng;
use rand::SeedableRng;

pub use addr::Address;
pub use config::Config;
pub use connection::Connection;
pub use error::ConnError;
pub use listener::{Acceptor, ShutdownHandle};
pub use packet::{flags, Segment};
pub use state::ConnectionState;

use socket::Socket;

/// Bind `local` and perform an active open towards the listener at `peer`.
pub async fn connect(local: Address, peer: Address) -> Result<Connection, ConnError> {
    connect_with_config(local, peer, &Config::default()).await
}

/// [`connect`] with explicit timeouts.
pub async fn connect_with_config(
    local: Address,
    peer: Address,
    config: &Config,
) -> Result<Connection, ConnError> {
    let socket = Socket::bind(local.resolve().await?)
        .await?
        .with_recv_buffer(config.recv_buffer);
    let peer = peer.resolve().await?;
    Connection::connect_with(socket, peer, config, &mut StdRng::from_os_rng()).await
}

/// Bind the welcome socket on `local` and return an [`Acceptor`] for it.
pub async fn listen(local: Address) -> Result<Acceptor, ConnError> {
    listen_with_config(local, Config::default()).await
}

/// [`listen`] with explicit timeouts.
pub async fn listen_with_config(local: Address, config: Config) -> Result<Acceptor, ConnError> {
    let welcome = Socket::bind(local.resolve().await?)
        .await?
        .with_recv_buffer(config.recv_buffer);
    Ok(Acceptor::new(welcome, config, StdRng::from_os_rng()))
}
