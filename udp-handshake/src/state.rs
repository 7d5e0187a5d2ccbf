//! Connection finite-state machine (FSM).
//!
//! [`Machine`] holds the current [`ConnectionState`] and the connection's
//! [`Tcb`], and advances them in response to [`Event`]s.  It never touches a
//! socket: [`Machine::handle`] returns the [`Effect`]s the caller must carry
//! out (segments to transmit, segments to drop).  Drivers in
//! [`crate::connection`] and [`crate::listener`] own the I/O, which keeps every
//! transition testable with plain values.
//!
//! ```text
//!  client:  CLOSED ──Open/SYN──▶ SYN_SENT ──SYN-ACK/ACK──▶ ESTABLISHED
//!
//!  server:  LISTEN ──SYN──▶ SYN_RECEIVED ──Accept/SYN-ACK──▶ (awaiting ACK)
//!                                 │                              │
//!                                 └──────────── ACK ─────────────┴──▶ ESTABLISHED
//! ```
//!
//! No transitions out of ESTABLISHED exist; teardown is not modelled.

use std::fmt;
use std::net::SocketAddr;

use crate::error::ConnError;
use crate::packet::{flags, Segment};
use crate::seq::{advance, next_after};

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state of an active open.
    #[default]
    Closed,
    /// Waiting on the welcome socket for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received.  The SYN-ACK goes out once a per-connection socket is
    /// bound, then the state waits for the final ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Events and effects
// ---------------------------------------------------------------------------

/// Input to [`Machine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Active open with the given initial sequence number.
    Open { isn: u32 },
    /// A per-connection socket is bound on `port`; answer the recorded SYN
    /// with the given initial sequence number.
    Accept { isn: u32, port: u16 },
    /// A segment arrived from `from`.
    Segment { segment: Segment, from: SocketAddr },
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Accept { .. } => "accept",
            Self::Segment { .. } => "segment",
        }
    }
}

/// Which of the context's sockets an outbound segment leaves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    /// The listener's well-known socket.
    Welcome,
    /// The socket owned by this connection.
    Connection,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send {
        segment: Segment,
        to: SocketAddr,
        via: Via,
    },
    /// The segment does not advance the handshake and is dropped.
    Discard { segment: Segment, from: SocketAddr },
}

// ---------------------------------------------------------------------------
// Transmission control block
// ---------------------------------------------------------------------------

/// Per-connection counters and addressing.
///
/// Shared by the handshake and the established [`crate::connection::Connection`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tcb {
    /// Port written into `source_port` of outbound segments.
    pub local_port: u16,
    /// Where segments are sent.  For a client this moves once, from the
    /// listener's welcome port to its per-connection port.
    pub peer: Option<SocketAddr>,
    /// Our initial sequence number, once chosen.
    pub iss: Option<u32>,
    /// Next sequence number we will send (`SND.NXT`).
    pub snd_nxt: u32,
    /// Next sequence number expected from the peer (`RCV.NXT`); the value
    /// carried in our ACKs.
    pub rcv_nxt: u32,
    /// Most recently processed inbound segment.
    pub last_segment: Option<Segment>,
}

impl Tcb {
    /// Build an outbound segment from the current counters.
    pub fn segment(&self, seg_flags: u8, payload: Vec<u8>) -> Segment {
        Segment {
            source_port: self.local_port,
            destination_port: self.peer.map_or(0, |p| p.port()),
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: seg_flags,
            payload,
        }
    }

    /// Account for a segment we transmitted.
    pub fn on_sent(&mut self, segment: &Segment) {
        self.snd_nxt = self
            .snd_nxt
            .wrapping_add(advance(segment.flags, &segment.payload));
    }

    /// Require `segment` to carry exactly `expected` flags and to acknowledge
    /// everything we have sent.
    pub fn check(&self, segment: &Segment, expected: u8) -> Result<(), ConnError> {
        if !segment.has_exact_flags(expected) {
            return Err(ConnError::UnexpectedFlags {
                expected,
                got: segment.flags,
            });
        }
        if segment.ack != self.snd_nxt {
            return Err(ConnError::UnacknowledgedSegment {
                expected: self.snd_nxt,
                got: segment.ack,
            });
        }
        Ok(())
    }

    /// Account for a segment we accepted.  The ACK floor is computed from this
    /// segment before it replaces the previous one.
    pub fn on_received(&mut self, segment: &Segment) {
        self.rcv_nxt = next_after(segment);
        self.last_segment = Some(segment.clone());
    }

    fn peer_or(
        &self,
        state: ConnectionState,
        event: &'static str,
    ) -> Result<SocketAddr, ConnError> {
        self.peer
            .ok_or(ConnError::InvalidStateTransition { state, event })
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// The handshake state machine for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    state: ConnectionState,
    tcb: Tcb,
}

impl Machine {
    /// An active opener in CLOSED, bound on `local_port`, aiming at `peer`.
    pub fn client(local_port: u16, peer: SocketAddr) -> Self {
        Self {
            state: ConnectionState::Closed,
            tcb: Tcb {
                local_port,
                peer: Some(peer),
                ..Tcb::default()
            },
        }
    }

    /// A passive opener in LISTEN on the welcome port `local_port`.
    pub fn listener(local_port: u16) -> Self {
        Self {
            state: ConnectionState::Listen,
            tcb: Tcb {
                local_port,
                ..Tcb::default()
            },
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn tcb(&self) -> &Tcb {
        &self.tcb
    }

    pub fn into_tcb(self) -> Tcb {
        self.tcb
    }

    /// `true` once a SYN-ACK has been issued from SYN_RECEIVED.
    pub fn syn_ack_sent(&self) -> bool {
        self.state == ConnectionState::SynReceived && self.tcb.iss.is_some()
    }

    /// Apply `event` to the current state and return the resulting effects.
    ///
    /// On error the machine is left where it was; the attempt is over.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>, ConnError> {
        let before = self.state;
        let event_name = event.name();

        let effects = match (self.state, event) {
            (ConnectionState::Closed, Event::Open { isn }) => self.open(isn)?,
            (ConnectionState::Listen, Event::Segment { segment, from }) => {
                self.on_listen_segment(segment, from)
            }
            (ConnectionState::SynReceived, Event::Accept { isn, port })
                if self.tcb.iss.is_none() =>
            {
                self.answer_syn(isn, port)?
            }
            (ConnectionState::SynReceived, Event::Segment { segment, .. })
                if self.tcb.iss.is_some() =>
            {
                self.on_final_ack(segment)?
            }
            (ConnectionState::SynSent, Event::Segment { segment, from }) => {
                self.on_syn_ack(segment, from)?
            }
            (state, _) => {
                return Err(ConnError::InvalidStateTransition {
                    state,
                    event: event_name,
                })
            }
        };

        if self.state != before {
            log::debug!("state {before} -> {}", self.state);
        }
        Ok(effects)
    }

    // CLOSED: send SYN.
    fn open(&mut self, isn: u32) -> Result<Vec<Effect>, ConnError> {
        let peer = self.tcb.peer_or(self.state, "open")?;
        self.tcb.iss = Some(isn);
        self.tcb.snd_nxt = isn;

        let syn = self.tcb.segment(flags::SYN, Vec::new());
        self.tcb.on_sent(&syn);
        self.state = ConnectionState::SynSent;

        Ok(vec![Effect::Send {
            segment: syn,
            to: peer,
            via: Via::Connection,
        }])
    }

    // LISTEN: anything but a bare SYN is noise.
    fn on_listen_segment(&mut self, segment: Segment, from: SocketAddr) -> Vec<Effect> {
        if !segment.has_exact_flags(flags::SYN) {
            return vec![Effect::Discard { segment, from }];
        }
        self.tcb.peer = Some(from);
        self.tcb.on_received(&segment);
        self.state = ConnectionState::SynReceived;
        Vec::new()
    }

    // SYN_RECEIVED: SYN-ACK through the welcome socket, naming the new port.
    fn answer_syn(&mut self, isn: u32, port: u16) -> Result<Vec<Effect>, ConnError> {
        let peer = self.tcb.peer_or(self.state, "accept")?;
        self.tcb.local_port = port;
        self.tcb.iss = Some(isn);
        self.tcb.snd_nxt = isn;

        let syn_ack = self.tcb.segment(flags::SYN | flags::ACK, Vec::new());
        self.tcb.on_sent(&syn_ack);

        Ok(vec![Effect::Send {
            segment: syn_ack,
            to: peer,
            via: Via::Welcome,
        }])
    }

    // SYN_RECEIVED, SYN-ACK out: the client's ACK completes the handshake.
    fn on_final_ack(&mut self, segment: Segment) -> Result<Vec<Effect>, ConnError> {
        self.tcb.check(&segment, flags::ACK)?;
        self.tcb.on_received(&segment);
        self.state = ConnectionState::Established;
        Ok(Vec::new())
    }

    // SYN_SENT: validate SYN-ACK, move to the server's connection port, ACK.
    fn on_syn_ack(&mut self, segment: Segment, from: SocketAddr) -> Result<Vec<Effect>, ConnError> {
        self.tcb.check(&segment, flags::SYN | flags::ACK)?;
        let welcome = self.tcb.peer_or(self.state, "segment")?;
        log::trace!("SYN-ACK from {from} names connection port {}", segment.source_port);

        self.tcb.on_received(&segment);
        let peer = SocketAddr::new(welcome.ip(), segment.source_port);
        self.tcb.peer = Some(peer);

        let ack = self.tcb.segment(flags::ACK, Vec::new());
        self.tcb.on_sent(&ack);
        self.state = ConnectionState::Established;

        Ok(vec![Effect::Send {
            segment: ack,
            to: peer,
            via: Via::Connection,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_ISN: u32 = 1_000;
    const SERVER_ISN: u32 = 5_000;
    const CONN_PORT: u16 = 40_001;

    fn client_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn welcome_addr() -> SocketAddr {
        "127.0.0.1:8000".parse().unwrap()
    }

    fn sent(effects: &[Effect]) -> &Segment {
        match effects {
            [Effect::Send { segment, .. }] => segment,
            other => panic!("expected one Send effect, got {other:?}"),
        }
    }

    fn syn_sent_client() -> Machine {
        let mut m = Machine::client(4000, welcome_addr());
        m.handle(Event::Open { isn: CLIENT_ISN }).unwrap();
        m
    }

    fn syn_ack(ack: u32, seg_flags: u8) -> Event {
        Event::Segment {
            segment: Segment {
                source_port: CONN_PORT,
                destination_port: 4000,
                seq: SERVER_ISN,
                ack,
                flags: seg_flags,
                payload: Vec::new(),
            },
            from: welcome_addr(),
        }
    }

    fn syn_received_server() -> Machine {
        let mut m = Machine::listener(8000);
        let syn = Segment {
            source_port: 4000,
            destination_port: 8000,
            seq: CLIENT_ISN,
            flags: flags::SYN,
            ..Segment::default()
        };
        m.handle(Event::Segment {
            segment: syn,
            from: client_addr(),
        })
        .unwrap();
        m
    }

    #[test]
    fn open_sends_syn_and_consumes_one_slot() {
        let mut m = Machine::client(4000, welcome_addr());
        let effects = m.handle(Event::Open { isn: CLIENT_ISN }).unwrap();

        assert_eq!(
            effects,
            vec![Effect::Send {
                segment: Segment {
                    source_port: 4000,
                    destination_port: 8000,
                    seq: CLIENT_ISN,
                    ack: 0,
                    flags: flags::SYN,
                    payload: Vec::new(),
                },
                to: welcome_addr(),
                via: Via::Connection,
            }]
        );
        assert_eq!(m.state(), ConnectionState::SynSent);
        assert_eq!(m.tcb().snd_nxt, CLIENT_ISN + 1);
    }

    #[test]
    fn isn_at_top_of_sequence_space_wraps() {
        let mut m = Machine::client(4000, welcome_addr());
        m.handle(Event::Open { isn: u32::MAX }).unwrap();
        assert_eq!(m.tcb().snd_nxt, 0);
    }

    #[test]
    fn syn_ack_establishes_and_redirects_to_connection_port() {
        let mut m = syn_sent_client();
        let effects = m
            .handle(syn_ack(CLIENT_ISN + 1, flags::SYN | flags::ACK))
            .unwrap();

        let ack = sent(&effects);
        assert_eq!(ack.flags, flags::ACK);
        assert_eq!(ack.seq, CLIENT_ISN + 1);
        assert_eq!(ack.ack, SERVER_ISN + 1);
        assert_eq!(ack.destination_port, CONN_PORT);
        assert!(matches!(
            effects[0],
            Effect::Send { to, via: Via::Connection, .. } if to == "127.0.0.1:40001".parse::<SocketAddr>().unwrap()
        ));
        assert_eq!(m.state(), ConnectionState::Established);
        assert_eq!(m.tcb().rcv_nxt, SERVER_ISN + 1);
        assert_eq!(m.tcb().snd_nxt, CLIENT_ISN + 1);
    }

    #[test]
    fn syn_ack_superset_is_rejected() {
        let mut m = syn_sent_client();
        let err = m
            .handle(syn_ack(CLIENT_ISN + 1, flags::SYN | flags::ACK | flags::FIN))
            .unwrap_err();
        assert!(matches!(err, ConnError::UnexpectedFlags { got, .. } if got == flags::SYN | flags::ACK | flags::FIN));
        assert_eq!(m.state(), ConnectionState::SynSent);
    }

    #[test]
    fn syn_ack_with_wrong_ack_is_unacknowledged() {
        let mut m = syn_sent_client();
        let err = m
            .handle(syn_ack(CLIENT_ISN, flags::SYN | flags::ACK))
            .unwrap_err();
        assert!(matches!(
            err,
            ConnError::UnacknowledgedSegment { expected, got } if expected == CLIENT_ISN + 1 && got == CLIENT_ISN
        ));
    }

    #[test]
    fn listen_discards_everything_but_bare_syn() {
        let mut m = Machine::listener(8000);
        for noise in [flags::ACK, flags::SYN | flags::ACK, flags::FIN, flags::RST, flags::NONE] {
            let segment = Segment {
                flags: noise,
                seq: 77,
                ..Segment::default()
            };
            let effects = m
                .handle(Event::Segment {
                    segment: segment.clone(),
                    from: client_addr(),
                })
                .unwrap();
            assert_eq!(
                effects,
                vec![Effect::Discard {
                    segment,
                    from: client_addr()
                }]
            );
            assert_eq!(m, Machine::listener(8000));
        }

        m.handle(Event::Segment {
            segment: Segment {
                seq: CLIENT_ISN,
                flags: flags::SYN,
                ..Segment::default()
            },
            from: client_addr(),
        })
        .unwrap();
        assert_eq!(m.state(), ConnectionState::SynReceived);
        assert_eq!(m.tcb().peer, Some(client_addr()));
        assert_eq!(m.tcb().rcv_nxt, CLIENT_ISN + 1);
    }

    #[test]
    fn accept_sends_syn_ack_through_welcome_socket() {
        let mut m = syn_received_server();
        assert!(!m.syn_ack_sent());

        let effects = m
            .handle(Event::Accept {
                isn: SERVER_ISN,
                port: CONN_PORT,
            })
            .unwrap();

        assert!(matches!(effects[0], Effect::Send { via: Via::Welcome, to, .. } if to == client_addr()));
        let syn_ack = sent(&effects);
        assert_eq!(syn_ack.flags, flags::SYN | flags::ACK);
        assert_eq!(syn_ack.source_port, CONN_PORT);
        assert_eq!(syn_ack.seq, SERVER_ISN);
        assert_eq!(syn_ack.ack, CLIENT_ISN + 1);
        assert!(m.syn_ack_sent());
        assert_eq!(m.tcb().snd_nxt, SERVER_ISN + 1);
    }

    #[test]
    fn final_ack_establishes_server() {
        let mut m = syn_received_server();
        m.handle(Event::Accept {
            isn: SERVER_ISN,
            port: CONN_PORT,
        })
        .unwrap();

        let ack = Segment {
            seq: CLIENT_ISN + 1,
            ack: SERVER_ISN + 1,
            flags: flags::ACK,
            ..Segment::default()
        };
        let effects = m
            .handle(Event::Segment {
                segment: ack,
                from: client_addr(),
            })
            .unwrap();

        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::Established);
        assert_eq!(m.tcb().rcv_nxt, CLIENT_ISN + 1);
    }

    #[test]
    fn final_ack_must_be_bare_ack() {
        let mut m = syn_received_server();
        m.handle(Event::Accept {
            isn: SERVER_ISN,
            port: CONN_PORT,
        })
        .unwrap();

        let err = m
            .handle(Event::Segment {
                segment: Segment {
                    seq: CLIENT_ISN + 1,
                    ack: SERVER_ISN + 1,
                    flags: flags::SYN | flags::ACK,
                    ..Segment::default()
                },
                from: client_addr(),
            })
            .unwrap_err();
        assert!(matches!(err, ConnError::UnexpectedFlags { .. }));
    }

    #[test]
    fn undefined_transitions_are_rejected() {
        let mut m = syn_received_server();
        let err = m
            .handle(Event::Segment {
                segment: Segment::default(),
                from: client_addr(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ConnError::InvalidStateTransition {
                state: ConnectionState::SynReceived,
                event: "segment"
            }
        ));

        let mut m = Machine::listener(8000);
        assert!(matches!(
            m.handle(Event::Open { isn: 1 }),
            Err(ConnError::InvalidStateTransition { .. })
        ));

        let mut m = syn_sent_client();
        m.handle(syn_ack(CLIENT_ISN + 1, flags::SYN | flags::ACK))
            .unwrap();
        assert!(matches!(
            m.handle(Event::Open { isn: 1 }),
            Err(ConnError::InvalidStateTransition {
                state: ConnectionState::Established,
                ..
            })
        ));
    }

    #[test]
    fn both_sides_agree_after_handshake() {
        let mut client = Machine::client(4000, welcome_addr());
        let mut server = Machine::listener(8000);

        let syn = sent(&client.handle(Event::Open { isn: CLIENT_ISN }).unwrap()).clone();
        server
            .handle(Event::Segment {
                segment: syn,
                from: client_addr(),
            })
            .unwrap();
        let syn_ack = sent(
            &server
                .handle(Event::Accept {
                    isn: SERVER_ISN,
                    port: CONN_PORT,
                })
                .unwrap(),
        )
        .clone();
        let ack = sent(
            &client
                .handle(Event::Segment {
                    segment: syn_ack,
                    from: welcome_addr(),
                })
                .unwrap(),
        )
        .clone();
        server
            .handle(Event::Segment {
                segment: ack,
                from: client_addr(),
            })
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Established);
        assert_eq!(server.state(), ConnectionState::Established);
        assert_eq!(server.tcb().rcv_nxt, client.tcb().snd_nxt);
        assert_eq!(client.tcb().rcv_nxt, server.tcb().snd_nxt);
    }
}
