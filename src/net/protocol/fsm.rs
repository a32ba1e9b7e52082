//! TCP finite state machine (FSM) for an actively opened connection, as
//! described in [RFC 793].
//!
//! The [`Tcb`] holds no I/O: it is fed inbound segments and asked for the
//! next outbound one, so the threads driving a connection only move bytes
//! between it, the transport, and the consumer.
//!
//! Not implemented: retransmission timers, congestion control, TCP option
//! negotiation beyond MSS, and `TIME_WAIT`.
//!
//! [RFC 793]: https://www.rfc-editor.org/rfc/rfc793

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use super::{Socket, TcpSegment};
use crate::net::headers::TcpHeader;
use crate::{Config, Error, Result};

/// Different TCP connection states.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
pub enum ConnectionState {
    /// Represents no connection state at all.
    CLOSED,
    /// Represents waiting for a matching connection request after having sent a
    /// connection request.
    SYN_SENT,
    /// Represents an open connection, data received can be delivered to the
    /// user. The normal state for the data transfer phase of the connection.
    ESTABLISHED,
    /// Represents waiting for a connection termination request from the remote
    /// TCP, or an acknowledgment of the connection termination request
    /// previously sent.
    FIN_WAIT_1,
    /// Represents waiting for a connection termination request from the remote
    /// TCP.
    FIN_WAIT_2,
    /// Represents waiting for a connection termination request from the local
    /// user.
    CLOSE_WAIT,
    /// Represents waiting for an acknowledgment of the connection termination
    /// request previously sent to the remote TCP (which includes an
    /// acknowledgment of its connection termination request).
    LAST_ACK,
    /// The peer did not answer the connection request with a SYN+ACK.
    REFUSED,
    /// The peer reset the connection.
    RESET,
    /// The device failed too many times in a row.
    FAILED,
}

impl ConnectionState {
    /// Returns `true` once no further segments will be exchanged.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CLOSED | Self::REFUSED | Self::RESET | Self::FAILED
        )
    }

    /// Returns `true` if the local side may still queue data.
    pub fn can_send(self) -> bool {
        matches!(self, Self::ESTABLISHED | Self::CLOSE_WAIT)
    }

    fn accepts_data(self) -> bool {
        matches!(
            self,
            Self::ESTABLISHED | Self::FIN_WAIT_1 | Self::FIN_WAIT_2
        )
    }
}

/// Send Sequence Space.
///
/// (RFC 793 3.2)
///
/// ```text
///                   1         2          3          4
///              ----------|----------|----------|----------
///                     SND.UNA    SND.NXT    SND.UNA
///                                          +SND.WND
///
///        1 - old sequence numbers which have been acknowledged
///        2 - sequence numbers of unacknowledged data
///        3 - sequence numbers allowed for new data transmission
///        4 - future sequence numbers which are not yet allowed
/// ```
#[derive(Debug)]
struct SendSeqSpace {
    /// SND.UNA - send unacknowledged
    una: u32,
    /// SND.NXT - send next
    nxt: u32,
    /// SND.WND - send window
    wnd: u16,
}

/// Receive Sequence Space.
///
/// (RFC 793 3.2)
///
/// ```text
///                       1          2          3
///                   ----------|----------|----------
///                          RCV.NXT    RCV.NXT
///                                    +RCV.WND
///
///        1 - old sequence numbers which have been acknowledged
///        2 - sequence numbers allowed for new reception
///        3 - future sequence numbers which are not yet allowed
/// ```
#[derive(Debug)]
struct RecvSeqSpace {
    /// RCV.NXT - receive next
    nxt: u32,
    /// RCV.WND - receive window
    wnd: u16,
    /// IRS     - initial receive sequence number
    irs: u32,
}

/// What an inbound segment produced for the consumer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Bytes that became contiguous, in stream order.
    pub data: Vec<u8>,
    /// The peer finished sending; the stream reached its end.
    pub fin: bool,
    /// The peer reset the connection.
    pub reset: bool,
}

/// Transmission Control Block (TCB).
#[derive(Debug)]
pub struct Tcb {
    /// Current state of the TCP connection.
    state: ConnectionState,
    /// Socket addresses of the local and remote TCPs.
    sock: Socket,
    /// Send Sequence Space for the TCP connection.
    snd: SendSeqSpace,
    /// Receive Sequence Space for the TCP connection.
    rcv: RecvSeqSpace,
    /// Acknowledgment number carried by the last segment we sent.
    last_ack_sent: u32,
    /// Set when the peer must be acknowledged even though RCV.NXT did not
    /// move (a retransmitted SYN+ACK).
    ack_requested: bool,
    /// Chunks written by the application, sent first-in-first-out.
    snd_queue: VecDeque<Vec<u8>>,
    /// Total bytes in `snd_queue`.
    queued: usize,
    /// Buffer to store out-of-order data received from peer.
    ///
    /// BTreeMap used so out of order segments can be retrieved by sequence
    /// number when merging with the contiguous stream.
    rcv_buf: BTreeMap<u32, Vec<u8>>,
    /// Total bytes in `rcv_buf`.
    held: usize,
    /// Sequence number of a FIN seen ahead of RCV.NXT.
    pending_fin: Option<u32>,
    fin_received: bool,
    close_requested: bool,
    failure: Option<String>,
    mss: usize,
    queue_capacity: usize,
    reassembly_capacity: usize,
}

impl Tcb {
    /// Initiates a new TCP connection with the provided socket information and
    /// initial send sequence number, returning a newly created TCB and `SYN`
    /// segment pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SYN` segment could not be constructed.
    pub fn open(sock: Socket, iss: u32, config: &Config) -> Result<(Self, TcpSegment)> {
        let tcb = Self {
            state: ConnectionState::SYN_SENT,
            sock,
            snd: SendSeqSpace {
                una: iss,
                // Incremented to account for the SYN being transmitted.
                nxt: iss.wrapping_add(1),
                // Will be updated when peer responds.
                wnd: 0,
            },
            rcv: RecvSeqSpace {
                // Will be updated when peer responds.
                nxt: 0,
                wnd: config.window,
                irs: 0,
            },
            last_ack_sent: 0,
            ack_requested: false,
            snd_queue: VecDeque::new(),
            queued: 0,
            rcv_buf: BTreeMap::new(),
            held: 0,
            pending_fin: None,
            fin_received: false,
            close_requested: false,
            failure: None,
            mss: config.mss.max(1),
            queue_capacity: config.send_queue_capacity,
            reassembly_capacity: config.reassembly_capacity,
        };

        // <SEQ=ISS><CTL=SYN>
        let mut syn = TcpHeader::new(sock.src.port, sock.dst.port, iss, tcb.rcv.wnd);
        syn.set_syn();

        let mss = tcb.mss.min(u16::MAX as usize) as u16;
        let [hi, lo] = mss.to_be_bytes();
        syn.set_options(vec![0x02, 0x04, hi, lo])?;

        debug!("[{sock}] (CLOSED) sending SYN: CLOSED -> SYN_SENT");

        Ok((tcb, TcpSegment::new(syn, &[])))
    }

    /// Processes the reply to our `SYN`, returning the `ACK` completing the
    /// handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] unless both SYN and ACK are set.
    pub fn on_syn_ack(&mut self, seg: &TcpSegment) -> Result<TcpSegment> {
        if !(seg.tcp.syn() && seg.tcp.ack()) {
            self.set_state(ConnectionState::REFUSED, &format!("expected SYN+ACK, got {seg}"));
            return Err(Error::ConnectionRefused);
        }

        let ackn = seg.tcp.ack_number();

        if ackn != self.snd.nxt {
            warn!(
                "[{}] (SYN_SENT) SYN+ACK acknowledges {ackn}, expected {}",
                self.sock, self.snd.nxt
            );
        }

        self.rcv.irs = seg.tcp.seq_number();
        self.rcv.nxt = self.rcv.irs.wrapping_add(1);

        // The ACK's sequence number is the one the peer asked for.
        self.snd.una = ackn;
        self.snd.nxt = ackn;
        self.snd.wnd = seg.tcp.window();

        if let Some(peer_mss) = seg.tcp.mss() {
            self.mss = self.mss.min(peer_mss as usize).max(1);
        }

        // <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>
        let ack = self.create_ack(&[]);
        self.last_ack_sent = self.rcv.nxt;

        self.set_state(
            ConnectionState::ESTABLISHED,
            &format!("received SYN+ACK, peer window {}", self.snd.wnd),
        );

        Ok(ack)
    }

    /// Processes a segment received once the handshake completed.
    pub fn on_segment(&mut self, seg: &TcpSegment) -> Delivery {
        let mut delivery = Delivery::default();

        if self.state.is_terminal() || self.state == ConnectionState::SYN_SENT {
            debug!("[{}] ({:?}) ignoring {seg}", self.sock, self.state);
            return delivery;
        }

        if seg.tcp.rst() {
            self.set_state(ConnectionState::RESET, "received RST");
            self.discard();
            delivery.reset = true;
            return delivery;
        }

        if seg.tcp.syn() {
            // Our handshake ACK was lost and the peer retransmitted.
            if seg.tcp.seq_number() == self.rcv.irs {
                self.ack_requested = true;
            } else {
                debug!("[{}] ({:?}) ignoring unexpected {seg}", self.sock, self.state);
            }
            return delivery;
        }

        self.snd.wnd = seg.tcp.window();

        if seg.tcp.ack() {
            self.on_ack(seg.tcp.ack_number());
        }

        if self.state.accepts_data() && !self.fin_received {
            self.on_data(seg, &mut delivery);
        }

        delivery
    }

    /// Returns the next segment to transmit, if any.
    ///
    /// A pending acknowledgment is sent on its own before queued data; data
    /// chunks leave in the order they were written; the FIN follows the last
    /// chunk once a close was requested.
    pub fn next_segment(&self) -> Option<TcpSegment> {
        use ConnectionState::*;

        if matches!(self.state, SYN_SENT | REFUSED | RESET | FAILED) {
            return None;
        }

        if self.needs_ack() {
            return Some(self.create_ack(&[]));
        }

        if !self.state.can_send() {
            return None;
        }

        match self.snd_queue.front() {
            Some(chunk) => Some(self.create_ack(chunk)),
            None if self.close_requested => Some(self.create_fin_ack()),
            None => None,
        }
    }

    /// Records that `seg`, obtained from [`Tcb::next_segment`], reached the
    /// device.
    pub fn on_segment_sent(&mut self, seg: &TcpSegment) {
        if seg.tcp.ack() {
            self.last_ack_sent = seg.tcp.ack_number();
            self.ack_requested = false;
        }

        if !seg.payload.is_empty() {
            if let Some(chunk) = self.snd_queue.pop_front() {
                self.queued -= chunk.len();
            }

            self.snd.nxt = self.snd.nxt.wrapping_add(seg.payload.len() as u32);
        }

        if seg.tcp.fin() {
            self.snd.nxt = self.snd.nxt.wrapping_add(1);

            match self.state {
                ConnectionState::ESTABLISHED => {
                    self.set_state(ConnectionState::FIN_WAIT_1, "sent FIN");
                }
                ConnectionState::CLOSE_WAIT => {
                    self.set_state(ConnectionState::LAST_ACK, "sent FIN");
                }
                _ => {}
            }
        }
    }

    /// Returns `true` if RCV.NXT moved since the last acknowledgment we sent.
    pub fn needs_ack(&self) -> bool {
        self.rcv.nxt != self.last_ack_sent || self.ack_requested
    }

    /// Queues as much of `data` as fits, split into MSS-sized chunks.
    ///
    /// Returns the number of bytes queued.
    pub fn enqueue(&mut self, data: &[u8]) -> usize {
        let nbytes = data.len().min(self.queue_space());

        for chunk in data[..nbytes].chunks(self.mss) {
            self.snd_queue.push_back(chunk.to_vec());
        }

        self.queued += nbytes;

        nbytes
    }

    /// Returns the number of bytes the outbound queue can still take.
    pub fn queue_space(&self) -> usize {
        self.queue_capacity.saturating_sub(self.queued)
    }

    /// Asks for a FIN to follow the queued data.
    ///
    /// Returns `false` if the connection is past the point of sending one.
    pub fn request_close(&mut self) -> bool {
        if !self.state.can_send() {
            return false;
        }

        self.close_requested = true;

        true
    }

    /// Returns `true` once a close was requested.
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Moves the connection to `FAILED`, discarding buffered data.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();

        self.set_state(ConnectionState::FAILED, &reason);
        self.failure = Some(reason);
        self.discard();
    }

    /// Returns the error subsequent operations must report, if the connection
    /// ended abnormally.
    pub fn error(&self) -> Option<Error> {
        match self.state {
            ConnectionState::REFUSED => Some(Error::ConnectionRefused),
            ConnectionState::RESET => Some(Error::ConnectionReset),
            ConnectionState::FAILED => Some(Error::ConnectionFailed(
                self.failure.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the connection's socket pair.
    pub fn sock(&self) -> Socket {
        self.sock
    }

    /// SND.UNA, the oldest unacknowledged sequence number.
    pub fn snd_una(&self) -> u32 {
        self.snd.una
    }

    /// SND.NXT, the next sequence number to send.
    pub fn snd_nxt(&self) -> u32 {
        self.snd.nxt
    }

    /// RCV.NXT, the next sequence number expected from the peer.
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv.nxt
    }

    /// The acknowledgment number last sent to the peer.
    pub fn last_ack_sent(&self) -> u32 {
        self.last_ack_sent
    }

    /// The effective maximum segment payload.
    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Bytes waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Bytes held out of order.
    pub fn held(&self) -> usize {
        self.held
    }

    fn on_ack(&mut self, ackn: u32) {
        if ackn == self.snd.una {
            return;
        }

        // SND.UNA < SEG.ACK =< SND.NXT
        if !is_between_wrapped(self.snd.una, ackn, self.snd.nxt.wrapping_add(1)) {
            warn!(
                "[{}] ({:?}) ignoring ACK {ackn} outside ({}, {}]",
                self.sock, self.state, self.snd.una, self.snd.nxt
            );
            return;
        }

        self.snd.una = ackn;

        // Our FIN occupies the last sequence number sent.
        if ackn == self.snd.nxt {
            match self.state {
                ConnectionState::FIN_WAIT_1 if self.fin_received => {
                    self.set_state(ConnectionState::CLOSED, "FIN acknowledged");
                }
                ConnectionState::FIN_WAIT_1 => {
                    self.set_state(ConnectionState::FIN_WAIT_2, "FIN acknowledged");
                }
                ConnectionState::LAST_ACK => {
                    self.set_state(ConnectionState::CLOSED, "FIN acknowledged");
                }
                _ => {}
            }
        }
    }

    fn on_data(&mut self, seg: &TcpSegment, delivery: &mut Delivery) {
        let seqn = seg.tcp.seq_number();
        let payload = &seg.payload[..];
        let end = seqn.wrapping_add(payload.len() as u32);

        // The FIN occupies the sequence number right after the data, and only
        // counts when that number lies in [RCV.NXT, RCV.NXT + RCV.WND).
        if seg.tcp.fin()
            && self.pending_fin.is_none()
            && end.wrapping_sub(self.rcv.nxt) < self.rcv.wnd as u32
        {
            self.pending_fin = Some(end);
        }

        if !payload.is_empty() {
            if seqn == self.rcv.nxt {
                self.deliver(payload, delivery);
            } else if wrapping_lt(seqn, self.rcv.nxt) {
                if wrapping_lt(self.rcv.nxt, end) {
                    let offset = self.rcv.nxt.wrapping_sub(seqn) as usize;

                    debug!(
                        "[{}] ({:?}) trimming {offset} already received bytes from {seg}",
                        self.sock, self.state
                    );

                    self.deliver(&payload[offset..], delivery);
                } else {
                    debug!(
                        "[{}] ({:?}) dropping duplicate {seg} (RCV.NXT = {})",
                        self.sock, self.state, self.rcv.nxt
                    );
                }
            } else {
                self.hold(seqn, payload);
            }

            self.reassemble(delivery);
        }

        if self.pending_fin == Some(self.rcv.nxt) {
            self.on_fin(delivery);
        }
    }

    fn deliver(&mut self, bytes: &[u8], delivery: &mut Delivery) {
        delivery.data.extend_from_slice(bytes);
        self.rcv.nxt = self.rcv.nxt.wrapping_add(bytes.len() as u32);
    }

    /// Holds a segment that arrived ahead of RCV.NXT until the gap closes.
    fn hold(&mut self, seqn: u32, payload: &[u8]) {
        let offset = seqn.wrapping_sub(self.rcv.nxt);

        if offset >= self.rcv.wnd as u32 {
            debug!(
                "[{}] ({:?}) dropping segment at {seqn} outside the receive window",
                self.sock, self.state
            );
            return;
        }

        let replaced = self.rcv_buf.get(&seqn).map_or(0, Vec::len);

        if replaced >= payload.len() {
            return;
        }

        if self.held - replaced + payload.len() > self.reassembly_capacity {
            debug!(
                "[{}] ({:?}) reassembly full, dropping segment at {seqn}",
                self.sock, self.state
            );
            return;
        }

        debug!(
            "[{}] ({:?}) holding {} bytes at {seqn} (RCV.NXT = {})",
            self.sock,
            self.state,
            payload.len(),
            self.rcv.nxt
        );

        self.held = self.held - replaced + payload.len();
        self.rcv_buf.insert(seqn, payload.to_vec());
    }

    /// Merges held segments that became contiguous with RCV.NXT.
    fn reassemble(&mut self, delivery: &mut Delivery) {
        loop {
            let nxt = self.rcv.nxt;

            let Some(seqn) = self
                .rcv_buf
                .keys()
                .copied()
                .find(|&seqn| !wrapping_lt(nxt, seqn))
            else {
                break;
            };

            let Some(chunk) = self.rcv_buf.remove(&seqn) else {
                break;
            };

            self.held -= chunk.len();

            let end = seqn.wrapping_add(chunk.len() as u32);

            if wrapping_lt(nxt, end) {
                let offset = nxt.wrapping_sub(seqn) as usize;
                self.deliver(&chunk[offset..], delivery);
            }
        }
    }

    fn on_fin(&mut self, delivery: &mut Delivery) {
        self.pending_fin = None;
        self.fin_received = true;
        self.rcv.nxt = self.rcv.nxt.wrapping_add(1);
        delivery.fin = true;

        match self.state {
            ConnectionState::ESTABLISHED => {
                self.set_state(ConnectionState::CLOSE_WAIT, "received FIN");
            }
            ConnectionState::FIN_WAIT_2 => {
                self.set_state(ConnectionState::CLOSED, "received FIN");
            }
            // Closes once our own FIN is acknowledged.
            _ => {
                debug!("[{}] ({:?}) received FIN", self.sock, self.state);
            }
        }
    }

    fn discard(&mut self) {
        self.snd_queue.clear();
        self.queued = 0;
        self.rcv_buf.clear();
        self.held = 0;
        self.pending_fin = None;
    }

    fn set_state(&mut self, next: ConnectionState, reason: &str) {
        debug!(
            "[{}] ({:?}) {reason}: {:?} -> {next:?}",
            self.sock, self.state, self.state
        );

        self.state = next;
    }

    /// Creates an `ACK` segment, carrying `payload` if not empty.
    fn create_ack(&self, payload: &[u8]) -> TcpSegment {
        let mut ack = TcpHeader::new(
            self.sock.src.port,
            self.sock.dst.port,
            self.snd.nxt,
            self.rcv.wnd,
        );

        ack.set_ack_number(self.rcv.nxt);
        ack.set_ack();

        if !payload.is_empty() {
            ack.set_psh();
        }

        TcpSegment::new(ack, payload)
    }

    /// Creates a `FIN_ACK` segment terminating our side of the stream.
    fn create_fin_ack(&self) -> TcpSegment {
        let mut fin_ack = self.create_ack(&[]);
        fin_ack.tcp.set_fin();

        fin_ack
    }
}

#[inline]
fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    // RFC 1323 (2.3)
    //
    // TCP determines if a data segment is "old" or "new" by testing whether
    // its sequence number is within 2**31 bytes of the left edge of the window,
    // and if it is not, discarding the data as "old".
    lhs.wrapping_sub(rhs) > (1 << 31)
}

/// Returns `true` is the value `x` is in between the values `start` and `end`,
/// using wrapping arithmetic.
#[inline]
fn is_between_wrapped(start: u32, x: u32, end: u32) -> bool {
    wrapping_lt(start, x) && wrapping_lt(x, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::headers::Flag;
    use crate::net::protocol::SocketAddr;

    const LOCAL_PORT: u16 = 40000;
    const REMOTE_PORT: u16 = 8080;

    fn sock() -> Socket {
        Socket {
            src: SocketAddr::new([10, 12, 0, 2], LOCAL_PORT),
            dst: SocketAddr::new([10, 12, 0, 1], REMOTE_PORT),
        }
    }

    fn peer(seq: u32, ack: u32, flags: &[Flag], payload: &[u8]) -> TcpSegment {
        let mut tcp = TcpHeader::new(REMOTE_PORT, LOCAL_PORT, seq, 65535);
        tcp.set_ack_number(ack);

        for flag in flags {
            tcp.set_flag(*flag);
        }

        TcpSegment::new(tcp, payload)
    }

    /// Returns a TCB in ESTABLISHED with SND.NXT = 501 and RCV.NXT = `rcv_nxt`.
    fn established_with(config: &Config, rcv_nxt: u32) -> Tcb {
        let (mut tcb, _) = Tcb::open(sock(), 500, config).unwrap();
        tcb.on_syn_ack(&peer(
            rcv_nxt.wrapping_sub(1),
            501,
            &[Flag::SYN, Flag::ACK],
            &[],
        ))
        .unwrap();
        tcb
    }

    fn established(rcv_nxt: u32) -> Tcb {
        established_with(&Config::default(), rcv_nxt)
    }

    #[test]
    fn open_sends_syn() {
        let (tcb, syn) = Tcb::open(sock(), 500, &Config::default()).unwrap();

        assert_eq!(tcb.state(), ConnectionState::SYN_SENT);
        assert_eq!(syn.tcp.seq_number(), 500);
        assert!(syn.tcp.syn());
        assert!(!syn.tcp.ack());
        assert_eq!(syn.tcp.mss(), Some(1460));
        assert_eq!(syn.tcp.window(), 32768);
        assert_eq!(syn.tcp.src_port(), LOCAL_PORT);
        assert_eq!(syn.tcp.dst_port(), REMOTE_PORT);
        assert!(syn.payload.is_empty());
    }

    #[test]
    fn handshake_establishes() {
        let (mut tcb, _) = Tcb::open(sock(), 500, &Config::default()).unwrap();

        let ack = tcb
            .on_syn_ack(&peer(1000, 501, &[Flag::SYN, Flag::ACK], &[]))
            .unwrap();

        assert_eq!(tcb.state(), ConnectionState::ESTABLISHED);
        assert_eq!(tcb.snd_nxt(), 501);
        assert_eq!(tcb.rcv_nxt(), 1001);
        assert_eq!(tcb.last_ack_sent(), 1001);

        assert_eq!(ack.tcp.seq_number(), 501);
        assert_eq!(ack.tcp.ack_number(), 1001);
        assert!(ack.tcp.ack());
        assert!(!ack.tcp.syn());
        assert!(ack.payload.is_empty());

        assert!(!tcb.needs_ack());
        assert!(tcb.next_segment().is_none());
    }

    #[test]
    fn handshake_refused_without_ack() {
        let (mut tcb, _) = Tcb::open(sock(), 500, &Config::default()).unwrap();

        let result = tcb.on_syn_ack(&peer(1000, 0, &[Flag::SYN], &[]));

        assert!(matches!(result, Err(Error::ConnectionRefused)));
        assert_eq!(tcb.state(), ConnectionState::REFUSED);
        assert!(tcb.next_segment().is_none());
    }

    #[test]
    fn handshake_refused_on_rst() {
        let (mut tcb, _) = Tcb::open(sock(), 500, &Config::default()).unwrap();

        let result = tcb.on_syn_ack(&peer(0, 501, &[Flag::RST, Flag::ACK], &[]));

        assert!(matches!(result, Err(Error::ConnectionRefused)));
        assert!(matches!(tcb.error(), Some(Error::ConnectionRefused)));
    }

    #[test]
    fn handshake_adopts_smaller_peer_mss() {
        let (mut tcb, _) = Tcb::open(sock(), 500, &Config::default()).unwrap();

        let mut syn_ack = peer(1000, 501, &[Flag::SYN, Flag::ACK], &[]);
        syn_ack.tcp.set_options(vec![0x02, 0x04, 0x02, 0x18]).unwrap();
        tcb.on_syn_ack(&syn_ack).unwrap();

        assert_eq!(tcb.mss(), 536);
    }

    #[test]
    fn duplicate_segment_is_dropped() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(1990, 501, &[Flag::ACK], &[b'x'; 10]));

        assert!(delivery.data.is_empty());
        assert_eq!(tcb.rcv_nxt(), 2000);
        assert!(!tcb.needs_ack());
    }

    #[test]
    fn in_order_segment_is_delivered() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::ACK, Flag::PSH], b"abc"));

        assert_eq!(delivery.data, b"abc");
        assert_eq!(tcb.rcv_nxt(), 2003);
        assert!(tcb.needs_ack());

        let ack = tcb.next_segment().unwrap();
        assert_eq!(ack.tcp.seq_number(), 501);
        assert_eq!(ack.tcp.ack_number(), 2003);
        assert!(ack.payload.is_empty());

        tcb.on_segment_sent(&ack);
        assert!(!tcb.needs_ack());
        assert_eq!(tcb.last_ack_sent(), 2003);
    }

    #[test]
    fn out_of_order_segment_is_held_until_gap_closes() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(2010, 501, &[Flag::ACK], b"xyz"));

        assert!(delivery.data.is_empty());
        assert_eq!(tcb.rcv_nxt(), 2000);
        assert_eq!(tcb.held(), 3);

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::ACK], b"0123456789"));

        assert_eq!(delivery.data, b"0123456789xyz");
        assert_eq!(tcb.rcv_nxt(), 2013);
        assert_eq!(tcb.held(), 0);
    }

    #[test]
    fn overlapping_held_segments_merge() {
        let mut tcb = established(2000);

        tcb.on_segment(&peer(2004, 501, &[Flag::ACK], b"efgh"));
        tcb.on_segment(&peer(2002, 501, &[Flag::ACK], b"cdef"));

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::ACK], b"ab"));

        assert_eq!(delivery.data, b"abcdefgh");
        assert_eq!(tcb.rcv_nxt(), 2008);
        assert_eq!(tcb.held(), 0);
    }

    #[test]
    fn reassembly_is_bounded() {
        let config = Config::default().with_reassembly_capacity(4);
        let mut tcb = established_with(&config, 2000);

        tcb.on_segment(&peer(2010, 501, &[Flag::ACK], b"abc"));
        tcb.on_segment(&peer(2020, 501, &[Flag::ACK], b"def"));

        assert_eq!(tcb.held(), 3);

        // Outside the advertised window.
        tcb.on_segment(&peer(2000 + 40000, 501, &[Flag::ACK], b"z"));
        assert_eq!(tcb.held(), 3);
    }

    #[test]
    fn straddling_segment_is_trimmed() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(1998, 501, &[Flag::ACK], b"zzabc"));

        assert_eq!(delivery.data, b"abc");
        assert_eq!(tcb.rcv_nxt(), 2003);
    }

    #[test]
    fn sequence_numbers_wrap() {
        let mut tcb = established(u32::MAX - 1);

        let delivery = tcb.on_segment(&peer(u32::MAX - 1, 501, &[Flag::ACK], b"wrap"));
        assert_eq!(delivery.data, b"wrap");
        assert_eq!(tcb.rcv_nxt(), 2);

        let delivery = tcb.on_segment(&peer(u32::MAX - 1, 501, &[Flag::ACK], b"wr"));
        assert!(delivery.data.is_empty());
        assert_eq!(tcb.rcv_nxt(), 2);

        let delivery = tcb.on_segment(&peer(6, 501, &[Flag::ACK], b"ahead"));
        assert!(delivery.data.is_empty());

        let delivery = tcb.on_segment(&peer(2, 501, &[Flag::ACK], b"four"));
        assert_eq!(delivery.data, b"fourahead");
        assert_eq!(tcb.rcv_nxt(), 11);
    }

    #[test]
    fn rst_resets_connection() {
        let mut tcb = established(2000);
        tcb.enqueue(b"pending");

        let delivery = tcb.on_segment(&peer(2000, 0, &[Flag::RST], &[]));

        assert!(delivery.reset);
        assert_eq!(tcb.state(), ConnectionState::RESET);
        assert!(matches!(tcb.error(), Some(Error::ConnectionReset)));
        assert_eq!(tcb.queued(), 0);
        assert!(tcb.next_segment().is_none());

        // Nothing is processed after a reset.
        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::ACK], b"late"));
        assert!(delivery.data.is_empty());
    }

    #[test]
    fn writes_leave_first_in_first_out() {
        let mut tcb = established(2000);

        assert_eq!(tcb.enqueue(b"first"), 5);
        assert_eq!(tcb.enqueue(b"second"), 6);

        let seg = tcb.next_segment().unwrap();
        assert_eq!(seg.payload, b"first");
        assert_eq!(seg.tcp.seq_number(), 501);
        assert!(seg.tcp.ack());
        assert!(seg.tcp.psh());
        tcb.on_segment_sent(&seg);

        let seg = tcb.next_segment().unwrap();
        assert_eq!(seg.payload, b"second");
        assert_eq!(seg.tcp.seq_number(), 506);
        tcb.on_segment_sent(&seg);

        assert_eq!(tcb.snd_nxt(), 512);
        assert_eq!(tcb.queued(), 0);
        assert!(tcb.next_segment().is_none());
    }

    #[test]
    fn pending_ack_goes_before_data() {
        let mut tcb = established(2000);
        tcb.enqueue(b"reply");
        tcb.on_segment(&peer(2000, 501, &[Flag::ACK], b"abc"));

        let seg = tcb.next_segment().unwrap();
        assert!(seg.payload.is_empty());
        assert_eq!(seg.tcp.ack_number(), 2003);
        tcb.on_segment_sent(&seg);

        let seg = tcb.next_segment().unwrap();
        assert_eq!(seg.payload, b"reply");
        assert_eq!(seg.tcp.ack_number(), 2003);
    }

    #[test]
    fn enqueue_respects_capacity_and_mss() {
        let config = Config::default().with_mss(4).with_send_queue_capacity(10);
        let mut tcb = established_with(&config, 2000);

        assert_eq!(tcb.enqueue(b"0123456789ab"), 10);
        assert_eq!(tcb.queue_space(), 0);
        assert_eq!(tcb.enqueue(b"more"), 0);

        let mut sizes = Vec::new();
        while let Some(seg) = tcb.next_segment() {
            sizes.push(seg.payload.len());
            tcb.on_segment_sent(&seg);
        }

        assert_eq!(sizes, [4, 4, 2]);
        assert_eq!(tcb.queue_space(), 10);
    }

    #[test]
    fn peer_ack_advances_una() {
        let mut tcb = established(2000);
        tcb.enqueue(b"hello");
        let seg = tcb.next_segment().unwrap();
        tcb.on_segment_sent(&seg);

        tcb.on_segment(&peer(2000, 600, &[Flag::ACK], &[]));
        assert_eq!(tcb.snd_una(), 501);

        tcb.on_segment(&peer(2000, 506, &[Flag::ACK], &[]));
        assert_eq!(tcb.snd_una(), 506);
    }

    #[test]
    fn active_close() {
        let mut tcb = established(2000);
        tcb.enqueue(b"bye");
        assert!(tcb.request_close());

        let data = tcb.next_segment().unwrap();
        assert!(!data.tcp.fin());
        tcb.on_segment_sent(&data);

        let fin = tcb.next_segment().unwrap();
        assert!(fin.tcp.fin());
        assert!(fin.tcp.ack());
        assert_eq!(fin.tcp.seq_number(), 504);
        tcb.on_segment_sent(&fin);

        assert_eq!(tcb.state(), ConnectionState::FIN_WAIT_1);
        assert_eq!(tcb.snd_nxt(), 505);
        assert!(tcb.next_segment().is_none());

        tcb.on_segment(&peer(2000, 505, &[Flag::ACK], &[]));
        assert_eq!(tcb.state(), ConnectionState::FIN_WAIT_2);

        let delivery = tcb.on_segment(&peer(2000, 505, &[Flag::FIN, Flag::ACK], &[]));
        assert!(delivery.fin);
        assert_eq!(tcb.state(), ConnectionState::CLOSED);

        // The peer's FIN is still acknowledged.
        let ack = tcb.next_segment().unwrap();
        assert_eq!(ack.tcp.ack_number(), 2001);
        tcb.on_segment_sent(&ack);
        assert!(tcb.next_segment().is_none());
    }

    #[test]
    fn simultaneous_fin_closes_once_acked() {
        let mut tcb = established(2000);
        tcb.request_close();
        let fin = tcb.next_segment().unwrap();
        tcb.on_segment_sent(&fin);

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::FIN, Flag::ACK], &[]));
        assert!(delivery.fin);
        assert_eq!(tcb.state(), ConnectionState::FIN_WAIT_1);

        tcb.on_segment(&peer(2001, 502, &[Flag::ACK], &[]));
        assert_eq!(tcb.state(), ConnectionState::CLOSED);
    }

    #[test]
    fn passive_close() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::FIN, Flag::ACK], b"end"));
        assert_eq!(delivery.data, b"end");
        assert!(delivery.fin);
        assert_eq!(tcb.state(), ConnectionState::CLOSE_WAIT);
        assert_eq!(tcb.rcv_nxt(), 2004);

        // Writing is still allowed after the peer closed its side.
        assert_eq!(tcb.enqueue(b"late reply"), 10);
        assert!(tcb.request_close());

        let mut fin = None;
        while let Some(seg) = tcb.next_segment() {
            tcb.on_segment_sent(&seg);
            if seg.tcp.fin() {
                fin = Some(seg);
            }
        }

        let fin = fin.unwrap();
        assert_eq!(fin.tcp.ack_number(), 2004);
        assert_eq!(tcb.state(), ConnectionState::LAST_ACK);

        let snd_nxt = tcb.snd_nxt();
        tcb.on_segment(&peer(2004, snd_nxt, &[Flag::ACK], &[]));
        assert_eq!(tcb.state(), ConnectionState::CLOSED);
    }

    #[test]
    fn out_of_order_fin_waits_for_data() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(2003, 501, &[Flag::FIN, Flag::ACK], b"def"));
        assert!(!delivery.fin);
        assert_eq!(tcb.state(), ConnectionState::ESTABLISHED);

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::ACK], b"abc"));
        assert_eq!(delivery.data, b"abcdef");
        assert!(delivery.fin);
        assert_eq!(tcb.rcv_nxt(), 2007);
        assert_eq!(tcb.state(), ConnectionState::CLOSE_WAIT);
    }

    #[test]
    fn fin_outside_window_is_ignored() {
        let mut tcb = established(2000);

        let delivery = tcb.on_segment(&peer(52000, 501, &[Flag::FIN, Flag::ACK], b"x"));
        assert_eq!(delivery, Delivery::default());
        assert_eq!(tcb.held(), 0);

        let delivery = tcb.on_segment(&peer(2000, 501, &[Flag::FIN, Flag::ACK], b"abc"));
        assert_eq!(delivery.data, b"abc");
        assert!(delivery.fin);
        assert_eq!(tcb.rcv_nxt(), 2004);
        assert_eq!(tcb.state(), ConnectionState::CLOSE_WAIT);
    }

    #[test]
    fn retransmitted_syn_ack_is_reacknowledged() {
        let mut tcb = established(2000);

        tcb.on_segment(&peer(1999, 501, &[Flag::SYN, Flag::ACK], &[]));

        let ack = tcb.next_segment().unwrap();
        assert_eq!(ack.tcp.seq_number(), 501);
        assert_eq!(ack.tcp.ack_number(), 2000);
        tcb.on_segment_sent(&ack);
        assert!(tcb.next_segment().is_none());
    }

    #[test]
    fn failure_is_reported() {
        let mut tcb = established(2000);
        tcb.fail("device gone");

        assert_eq!(tcb.state(), ConnectionState::FAILED);
        assert!(matches!(
            tcb.error(),
            Some(Error::ConnectionFailed(ref reason)) if reason == "device gone"
        ));
        assert!(!tcb.request_close());
    }

    #[test]
    fn wrapping_comparisons() {
        assert!(wrapping_lt(1, 2));
        assert!(!wrapping_lt(2, 1));
        assert!(!wrapping_lt(5, 5));
        assert!(wrapping_lt(u32::MAX, 0));
        assert!(wrapping_lt(u32::MAX - 10, 10));
        assert!(is_between_wrapped(u32::MAX, 0, 1));
        assert!(!is_between_wrapped(1, 1, 2));
    }
}
