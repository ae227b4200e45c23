use std::mem;
use std::net;
use std::time;

use tracing::{debug, info, trace, warn};

use super::buffer::{Receipt, ReorderBuffer};
use super::error::{ChannelError, Error, Result};
use super::segment::{self, Segment, SegmentType};
use super::socket::Channel;
use super::timer::{self, Timer};

mod segment_tx;

use segment_tx::SegmentTx;

const WINDOW_SIZE_DEFAULT: u32 = 8;
const WINDOW_SIZE_MAX: u32 = 1 << 30;

const RTO_DEFAULT_MS: u64 = 500;

const LINGER_DEFAULT_MS: u64 = 1_000;

/// Configuration for an [`Endpoint`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of segments which may be in flight, and the span of the receive window.
    ///
    /// Minimum value: 1 \
    /// Maximum value: 2^30 \
    /// Default value: 8
    pub window_size: u32,

    /// Fixed retransmission timeout, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 500
    pub rto_ms: u64,

    /// Largest payload carried by a single DATA segment.
    ///
    /// Minimum value: 1 \
    /// Maximum value: 1,456 \
    /// Default value: 1,456
    pub chunk_size: usize,

    /// Time after which [`Endpoint::connect`] gives up waiting for a handshake reply, in
    /// milliseconds. `None` waits forever.
    pub handshake_timeout_ms: Option<u64>,

    /// Number of consecutive retransmission timeouts without progress after which a transfer or
    /// teardown fails. `None` retries forever.
    pub retry_limit: Option<u32>,

    /// Time the acceptor keeps answering retransmitted END segments after accepting the first,
    /// in milliseconds.
    ///
    /// Default value: 1,000
    pub linger_ms: u64,

    /// Time [`Endpoint::recv`] waits for any segment from the peer before failing, in
    /// milliseconds. `None` waits forever.
    pub peer_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE_DEFAULT,
            rto_ms: RTO_DEFAULT_MS,
            chunk_size: segment::MAX_CHUNK,
            handshake_timeout_ms: None,
            retry_limit: None,
            linger_ms: LINGER_DEFAULT_MS,
            peer_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > WINDOW_SIZE_MAX {
            return Err(Error::InvalidConfig(format!(
                "window_size must be within 1..={WINDOW_SIZE_MAX}, got {}",
                self.window_size
            )));
        }

        if self.rto_ms == 0 {
            return Err(Error::InvalidConfig("rto_ms must be nonzero".into()));
        }

        if self.chunk_size == 0 || self.chunk_size > segment::MAX_CHUNK {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be within 1..={}, got {}",
                segment::MAX_CHUNK,
                self.chunk_size
            )));
        }

        Ok(())
    }

    fn rto(&self) -> time::Duration {
        time::Duration::from_millis(self.rto_ms)
    }
}

/// Which side of the handshake an endpoint played.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Sent START; transmits the stream.
    Initiator,
    /// Answered START; receives the stream.
    Acceptor,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    Handshaking,
    Established,
    Closing,
}

/// Counters kept by an endpoint over its lifetime.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Segments handed to the channel, retransmissions included.
    pub segments_sent: u64,
    /// Segments sent again after a timeout.
    pub retransmissions: u64,
    /// Retransmission timeouts which fired.
    pub timeouts: u64,
    /// Segments dropped for a checksum mismatch.
    pub corrupt_dropped: u64,
    /// Datagrams which could not be decoded.
    pub malformed_dropped: u64,
    /// Well-formed segments which made no sense in the current state.
    pub protocol_dropped: u64,
    /// Repeated DATA, or ACKs which acknowledged nothing new.
    pub duplicates: u64,
    /// Largest number of segments held in the reorder buffer at once.
    pub reorder_peak: usize,
}

struct Inbound {
    buffer: ReorderBuffer,
    // Assembled stream
    stream: Vec<u8>,
}

enum Flow {
    Outbound(SegmentTx),
    Inbound(Inbound),
}

// Channel plus the peer it is bound to
struct Link<C> {
    channel: C,
    peer_addr: net::SocketAddr,
    stats: Stats,
}

/// Reads one datagram and returns it if it holds an intact segment. Timeouts, undecodable
/// datagrams, and corrupted segments all yield `Ok(None)`.
fn read_segment<C: Channel>(
    channel: &mut C,
    timeout: Option<time::Duration>,
    stats: &mut Stats,
) -> Result<Option<(Segment, net::SocketAddr)>> {
    let (bytes, addr) = match channel.receive_from(timeout) {
        Ok(received) => received,
        Err(ChannelError::Timeout) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let segment = match Segment::from_bytes(bytes) {
        Ok(segment) => segment,
        Err(err) => {
            stats.malformed_dropped += 1;
            trace!(%addr, %err, "dropping malformed datagram");
            return Ok(None);
        }
    };

    if !segment.is_intact() {
        // We don't negotiate with entropy
        stats.corrupt_dropped += 1;
        trace!(%addr, seq = segment.seq(), "dropping corrupted segment");
        return Ok(None);
    }

    Ok(Some((segment, addr)))
}

impl<C: Channel> Link<C> {
    fn transmit(&mut self, segment: &Segment) -> Result<()> {
        self.channel.send_to(&segment.to_bytes(), self.peer_addr)?;
        self.stats.segments_sent += 1;
        Ok(())
    }

    fn send_control(&mut self, segment_type: SegmentType, seq: u32) -> Result<()> {
        trace!(?segment_type, seq, "sending control segment");
        self.transmit(&Segment::control(segment_type, seq))
    }

    /// Waits up to `timeout` for an intact segment from the peer.
    fn poll(&mut self, timeout: Option<time::Duration>) -> Result<Option<Segment>> {
        match read_segment(&mut self.channel, timeout, &mut self.stats)? {
            Some((segment, addr)) if addr == self.peer_addr => Ok(Some(segment)),
            Some((segment, addr)) => {
                self.stats.protocol_dropped += 1;
                debug!(%addr, seq = segment.seq(), "dropping segment from unknown address");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn discard(&mut self, segment: &Segment, context: &'static str) {
        self.stats.protocol_dropped += 1;
        debug!(
            segment_type = ?segment.segment_type(),
            seq = segment.seq(),
            context,
            "dropping unexpected segment"
        );
    }

    /// Counts an expired retransmission timer. Fails once more than `limit` have expired in a row.
    fn note_timeout(&mut self, retries: &mut u32, limit: Option<u32>) -> Result<()> {
        *retries += 1;
        self.stats.timeouts += 1;

        match limit {
            Some(limit) if *retries > limit => {
                warn!(
                    peer_addr = %self.peer_addr,
                    retries = limit,
                    "giving up after repeated retransmission timeouts"
                );

                Err(Error::ConnectionFailed {
                    addr: self.peer_addr,
                    retries: limit,
                })
            }
            _ => Ok(()),
        }
    }

    /// Answers retransmitted copies of the accepted END until `duration` elapses or the peer
    /// goes away.
    fn linger(&mut self, end_id: u32, duration: time::Duration) -> Result<()> {
        let until = time::Instant::now() + duration;

        loop {
            let remaining = until.saturating_duration_since(time::Instant::now());

            if remaining.is_zero() {
                return Ok(());
            }

            match self.poll(Some(remaining)) {
                Ok(Some(segment))
                    if segment.segment_type() == SegmentType::End && segment.seq() == end_id =>
                {
                    self.stats.duplicates += 1;
                    self.send_control(SegmentType::EndAck, end_id)?;
                }
                Ok(Some(segment)) => self.discard(&segment, "lingering after END"),
                Ok(None) => {}
                Err(Error::Channel(ChannelError::Closed)) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}

/// One end of a reliable, in-order byte stream over an unreliable [`Channel`].
///
/// The initiator ([`Endpoint::connect`]) transmits with [`Endpoint::send`] and finishes with
/// [`Endpoint::close`]. The acceptor ([`Endpoint::accept`]) collects the stream with
/// [`Endpoint::recv`], which returns once the initiator's END has been accepted.
pub struct Endpoint<C> {
    config: Config,
    role: Role,
    state: State,
    // Sequence number of the START which opened the connection
    start_id: u32,
    link: Link<C>,
    flow: Flow,
    rto_timer: Timer,
}

impl<C: Channel> Endpoint<C> {
    /// Opens a connection to the acceptor at `peer_addr`, blocking until the handshake completes.
    ///
    /// START is resent every retransmission timeout. If `handshake_timeout_ms` is configured and
    /// elapses first, fails with [`Error::HandshakeTimeout`].
    pub fn connect(channel: C, peer_addr: net::SocketAddr, config: Config) -> Result<Self> {
        config.validate()?;

        let start_id = rand::random::<u32>();

        let mut endpoint = Self {
            role: Role::Initiator,
            state: State::Handshaking,
            start_id,
            link: Link {
                channel,
                peer_addr,
                stats: Stats::default(),
            },
            flow: Flow::Outbound(SegmentTx::new(start_id.wrapping_add(1), config.window_size)),
            rto_timer: Timer::new(),
            config,
        };

        endpoint.handshake()?;

        Ok(endpoint)
    }

    /// Waits for a START from any address and answers it, returning the endpoint and the
    /// initiator's address. Anything other than START is dropped.
    pub fn accept(mut channel: C, config: Config) -> Result<(Self, net::SocketAddr)> {
        config.validate()?;

        let mut stats = Stats::default();

        loop {
            let Some((segment, peer_addr)) = read_segment(&mut channel, None, &mut stats)? else {
                continue;
            };

            if segment.segment_type() != SegmentType::Start {
                stats.protocol_dropped += 1;
                debug!(
                    %peer_addr,
                    segment_type = ?segment.segment_type(),
                    seq = segment.seq(),
                    "dropping segment while awaiting START"
                );
                continue;
            }

            let start_id = segment.seq();

            let mut endpoint = Self {
                role: Role::Acceptor,
                state: State::Handshaking,
                start_id,
                link: Link {
                    channel,
                    peer_addr,
                    stats,
                },
                flow: Flow::Inbound(Inbound {
                    buffer: ReorderBuffer::new(start_id.wrapping_add(1), config.window_size),
                    stream: Vec::new(),
                }),
                rto_timer: Timer::new(),
                config,
            };

            // Echoing the START sequence lets the initiator tell this reply from a stale one
            endpoint.link.send_control(SegmentType::Ack, start_id)?;
            endpoint.state = State::Established;

            info!(%peer_addr, start_id, "accepted connection");

            return Ok((endpoint, peer_addr));
        }
    }

    fn handshake(&mut self) -> Result<()> {
        let start = Segment::control(SegmentType::Start, self.start_id);
        let rto = self.config.rto();

        let give_up = self
            .config
            .handshake_timeout_ms
            .map(|ms| time::Instant::now() + time::Duration::from_millis(ms));

        self.link.transmit(&start)?;
        self.rto_timer.set(rto);

        loop {
            let now = time::Instant::now();

            if let Some(give_up) = give_up {
                if now >= give_up {
                    self.state = State::Closed;
                    self.rto_timer.unset();
                    return Err(Error::HandshakeTimeout(self.link.peer_addr));
                }
            }

            if self.rto_timer.expired() {
                trace!(start_id = self.start_id, "resending START");
                self.link.stats.timeouts += 1;
                self.link.stats.retransmissions += 1;
                self.link.transmit(&start)?;
                self.rto_timer.set(rto);
            }

            let wait = timer::min_timeout(
                self.rto_timer.remaining(),
                give_up.map(|t| t.saturating_duration_since(now)),
            );

            match self.link.poll(wait)? {
                Some(segment)
                    if segment.segment_type() == SegmentType::Ack
                        && segment.seq() == self.start_id =>
                {
                    self.rto_timer.unset();
                    self.state = State::Established;

                    info!(peer_addr = %self.link.peer_addr, start_id = self.start_id, "connected");

                    return Ok(());
                }
                Some(segment) => self.link.discard(&segment, "awaiting handshake ACK"),
                None => {}
            }
        }
    }

    fn expect_state(&self, expected: State) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Transmits `payload` and blocks until every byte has been acknowledged.
    ///
    /// The payload is split into chunks of at most `chunk_size` bytes, each carried by a DATA
    /// segment. Up to `window_size` segments are in flight at once. When the retransmission timer
    /// expires, every unacknowledged segment in the window is sent again.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.expect_state(State::Established)?;

        let Flow::Outbound(ref mut tx) = self.flow else {
            return Err(Error::WrongRole {
                operation: "send",
                role: self.role,
            });
        };

        let chunks: Vec<&[u8]> = payload.chunks(self.config.chunk_size).collect();

        let first_id = tx.next_id();
        let end_id = first_id.wrapping_add(chunks.len() as u32);

        let data_segment = |id: u32| {
            let chunk = chunks[id.wrapping_sub(first_id) as usize];
            Segment::new(SegmentType::Data, id, chunk)
        };

        let rto = self.config.rto();
        let mut retries = 0;

        debug!(first_id, count = chunks.len(), bytes = payload.len(), "sending payload");

        while tx.base_id() != end_id {
            // Fill the window with segments not yet sent
            while tx.can_send() && tx.next_id() != end_id {
                let id = tx.mark_sent();
                self.link.transmit(&data_segment(id))?;
            }

            if !self.rto_timer.is_set() {
                self.rto_timer.set(rto);
            }

            if self.rto_timer.expired() {
                if let Err(err) = self.link.note_timeout(&mut retries, self.config.retry_limit) {
                    self.state = State::Closed;
                    self.rto_timer.unset();
                    return Err(err);
                }

                debug!(
                    base_id = tx.base_id(),
                    count = tx.in_transit_count(),
                    "retransmission timeout, resending window"
                );

                // Go back N: everything unacknowledged goes out again
                for id in tx.in_transit() {
                    self.link.transmit(&data_segment(id))?;
                    self.link.stats.retransmissions += 1;
                }

                self.rto_timer.set(rto);
                continue;
            }

            match self.link.poll(self.rto_timer.remaining())? {
                Some(segment) if segment.segment_type() == SegmentType::Ack => {
                    if tx.acknowledge(segment.seq()) {
                        trace!(ack = segment.seq(), "window advanced");
                        retries = 0;
                        self.rto_timer.set(rto);
                    } else {
                        self.link.stats.duplicates += 1;
                        trace!(ack = segment.seq(), base_id = tx.base_id(), "stale ACK");
                    }
                }
                Some(segment) => self.link.discard(&segment, "sending data"),
                None => {}
            }
        }

        self.rto_timer.unset();

        Ok(())
    }

    /// Collects the peer's stream, blocking until its END has been accepted. Returns every byte
    /// sent, in order.
    ///
    /// The endpoint lingers for `linger_ms` afterwards to answer retransmitted ENDs, and is then
    /// closed.
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        self.expect_state(State::Established)?;

        let Flow::Inbound(ref mut rx) = self.flow else {
            return Err(Error::WrongRole {
                operation: "recv",
                role: self.role,
            });
        };

        let peer_timeout = self.config.peer_timeout_ms.map(time::Duration::from_millis);
        let mut last_heard = time::Instant::now();

        loop {
            let wait = peer_timeout.map(|limit| limit.saturating_sub(last_heard.elapsed()));

            if wait.is_some_and(|wait| wait.is_zero()) {
                self.state = State::Closed;
                return Err(Error::PeerTimeout(self.link.peer_addr));
            }

            let Some(segment) = self.link.poll(wait)? else {
                continue;
            };

            last_heard = time::Instant::now();

            let seq = segment.seq();
            let expected_id = rx.buffer.next_expected_id();

            match segment.segment_type() {
                SegmentType::Data => {
                    let stream = &mut rx.stream;

                    let receipt = rx.buffer.receive(seq, &segment.payload, |data| {
                        stream.extend_from_slice(data);
                    });

                    match receipt {
                        Receipt::Delivered(count) => {
                            trace!(seq, count, "delivered");
                        }
                        Receipt::Buffered => {
                            self.link.stats.reorder_peak =
                                self.link.stats.reorder_peak.max(rx.buffer.len());
                            trace!(seq, expected_id, "buffered ahead of gap");
                        }
                        Receipt::Duplicate | Receipt::Stale => {
                            self.link.stats.duplicates += 1;
                            trace!(seq, expected_id, "duplicate DATA");
                        }
                        Receipt::OutOfWindow => {
                            self.link.stats.protocol_dropped += 1;
                            trace!(seq, expected_id, "DATA beyond receive window");
                            continue;
                        }
                    }

                    // Cumulative ACK; unchanged if this segment filled no gap
                    self.link
                        .send_control(SegmentType::Ack, rx.buffer.next_expected_id())?;
                }
                SegmentType::End if seq == expected_id => {
                    self.link.send_control(SegmentType::EndAck, seq)?;

                    rx.buffer.receive(seq, &[], |_| ());
                    self.state = State::Closing;

                    let stream = mem::take(&mut rx.stream);

                    info!(
                        peer_addr = %self.link.peer_addr,
                        bytes = stream.len(),
                        "stream complete"
                    );

                    // END_ACK is out and the stream is whole, so failures from here on are only
                    // reported
                    let linger = time::Duration::from_millis(self.config.linger_ms);

                    if let Err(err) = self.link.linger(seq, linger) {
                        warn!(peer_addr = %self.link.peer_addr, %err, "linger after END failed");
                    }

                    self.state = State::Closed;

                    if let Err(err) = self.link.channel.close() {
                        warn!(%err, "failed to close channel");
                    }

                    return Ok(stream);
                }
                SegmentType::End => {
                    // Data is still missing; the sender will time out and fill the gap first
                    self.link.stats.protocol_dropped += 1;
                    debug!(seq, expected_id, "dropping early END");
                }
                SegmentType::Start if seq == self.start_id => {
                    // Our handshake ACK was lost
                    self.link.stats.duplicates += 1;
                    self.link.send_control(SegmentType::Ack, seq)?;
                }
                _ => self.link.discard(&segment, "receiving data"),
            }
        }
    }

    /// Ends the stream: sends END and blocks until the matching END_ACK arrives, resending on
    /// every retransmission timeout. Valid only for the initiator, once its data is acknowledged.
    pub fn close(&mut self) -> Result<()> {
        self.expect_state(State::Established)?;

        let Flow::Outbound(ref mut tx) = self.flow else {
            return Err(Error::WrongRole {
                operation: "close",
                role: self.role,
            });
        };

        // send() returns only with an empty window, so there is room
        let end_id = tx.mark_sent();
        let end = Segment::control(SegmentType::End, end_id);
        let rto = self.config.rto();

        self.state = State::Closing;

        self.link.transmit(&end)?;
        self.rto_timer.set(rto);

        let mut retries = 0;

        loop {
            if self.rto_timer.expired() {
                if let Err(err) = self.link.note_timeout(&mut retries, self.config.retry_limit) {
                    self.state = State::Closed;
                    self.rto_timer.unset();
                    return Err(err);
                }

                trace!(end_id, "resending END");
                self.link.stats.retransmissions += 1;
                self.link.transmit(&end)?;
                self.rto_timer.set(rto);
            }

            match self.link.poll(self.rto_timer.remaining())? {
                Some(segment)
                    if segment.segment_type() == SegmentType::EndAck && segment.seq() == end_id =>
                {
                    break;
                }
                Some(segment) => self.link.discard(&segment, "awaiting END_ACK"),
                None => {}
            }
        }

        tx.acknowledge(end_id.wrapping_add(1));

        self.rto_timer.unset();
        self.state = State::Closed;
        self.link.channel.close()?;

        info!(peer_addr = %self.link.peer_addr, "connection closed");

        Ok(())
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.link.peer_addr
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.link.channel.local_addr()
    }

    pub fn stats(&self) -> &Stats {
        &self.link.stats
    }
}
