//! Datagram transport seam.
//!
//! [`Transport`] is the only thing the handshake drivers and
//! [`crate::connection::Connection`] know about the network: bind a sibling
//! socket, send one segment, receive one segment.  [`Socket`] implements it
//! over `tokio::net::UdpSocket`; tests substitute an in-memory fake.
//!
//! Timeouts are not a property of the transport.  Callers bound a receive
//! with [`recv_within`].

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::config::MAX_DATAGRAM;
use crate::error::ConnError;
use crate::packet::Segment;

/// An unreliable, message-boundary-preserving segment transport.
///
/// Dropping a transport closes it.
pub trait Transport: Sized + Send + Sync {
    /// Address this transport is bound to, with any ephemeral port resolved.
    fn local_addr(&self) -> SocketAddr;

    /// Bind a fresh transport on the same host with an OS-assigned port.
    fn bind_sibling(&self) -> impl Future<Output = Result<Self, ConnError>> + Send;

    /// Encode `segment` and send it as a single datagram to `dest`.
    fn send_to(
        &self,
        segment: &Segment,
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), ConnError>> + Send;

    /// Receive the next datagram and decode it.
    ///
    /// A datagram too short to hold a header yields
    /// [`ConnError::MalformedSegment`]; the caller decides whether that is
    /// fatal.
    fn recv_from(&self) -> impl Future<Output = Result<(Segment, SocketAddr), ConnError>> + Send;
}

/// Receive one segment, giving up after `bound` when one is set.
pub async fn recv_within<T: Transport>(
    transport: &T,
    bound: Option<Duration>,
) -> Result<(Segment, SocketAddr), ConnError> {
    match bound {
        Some(limit) => tokio::time::timeout(limit, transport.recv_from())
            .await
            .map_err(|_elapsed| ConnError::ConnectionTimeout(limit))?,
        None => transport.recv_from().await,
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A segment-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    local_addr: SocketAddr,
    recv_buffer: usize,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, ConnError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::trace!("bound UDP socket on {local_addr}");
        Ok(Self {
            local_addr,
            recv_buffer: MAX_DATAGRAM,
            inner,
        })
    }

    /// Cap the size of datagrams read from this socket.
    pub fn with_recv_buffer(mut self, len: usize) -> Self {
        self.recv_buffer = len;
        self
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn bind_sibling(&self) -> Result<Self, ConnError> {
        let sibling = Socket::bind(SocketAddr::new(self.local_addr.ip(), 0)).await?;
        Ok(sibling.with_recv_buffer(self.recv_buffer))
    }

    async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> Result<(), ConnError> {
        self.inner.send_to(&segment.encode(), dest).await?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Segment, SocketAddr), ConnError> {
        let mut buf = vec![0u8; self.recv_buffer];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let segment = Segment::decode(&buf[..n])?;
        Ok((segment, addr))
    }
}
