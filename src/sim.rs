//! In-memory channels with deterministic fault injection.
//!
//! [`pair`] returns two [`SimChannel`]s wired to each other. Each channel applies a [`Faults`]
//! policy to the datagrams it sends, so the two directions of a link can be impaired
//! independently:
//!
//! | Fault       | Effect                                                              |
//! |-------------|---------------------------------------------------------------------|
//! | `Drop`      | The datagram never arrives.                                         |
//! | `Corrupt`   | One bit of the checksum-covered region is flipped.                  |
//! | `Duplicate` | The datagram arrives twice.                                         |
//! | `Delay(n)`  | The datagram is held back until `n` later datagrams have been sent. |
//!
//! Randomized impairment draws from a seeded RNG, so a failing run can be replayed exactly.

use std::net;
use std::sync::mpsc;
use std::time;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::error::ChannelError;
use crate::segment::{serial, Header, HEADER_SIZE};
use crate::socket::Channel;

/// What happens to one datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fault {
    Deliver,
    Drop,
    Corrupt,
    Duplicate,
    Delay(usize),
}

/// A datagram about to be sent, as seen by a fault script.
#[derive(Debug)]
pub struct Datagram<'a> {
    /// Position of this datagram among those sent by the channel, starting at 0.
    pub index: u64,
    /// The decoded header, if the bytes hold a well-formed segment.
    pub header: Option<Header>,
    pub bytes: &'a [u8],
}

/// Probabilities for randomized impairment. Each is in `[0.0, 1.0]` and they are tested in the
/// order listed.
#[derive(Clone, Debug)]
pub struct Impairment {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub duplicate_rate: f64,
    pub delay_rate: f64,
    /// Upper bound on how many later datagrams a delayed one waits for.
    pub delay_span: usize,
    pub seed: u64,
}

impl Default for Impairment {
    fn default() -> Self {
        // No faults by default - a transparent pass-through
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            delay_rate: 0.0,
            delay_span: 3,
            seed: 0,
        }
    }
}

type Script = Box<dyn FnMut(&Datagram) -> Fault + Send>;

/// The policy a [`SimChannel`] applies to outbound datagrams.
#[derive(Default)]
pub enum Faults {
    #[default]
    None,
    Random(Impairment),
    Script(Script),
}

impl Faults {
    /// Wraps a closure which decides the fate of every datagram.
    pub fn script<F>(f: F) -> Self
    where
        F: FnMut(&Datagram) -> Fault + Send + 'static,
    {
        Self::Script(Box::new(f))
    }
}

struct Held {
    remaining: usize,
    bytes: Vec<u8>,
}

/// One end of an in-memory link.
pub struct SimChannel {
    local_addr: net::SocketAddr,
    peer_addr: net::SocketAddr,
    outbound: Option<mpsc::Sender<Vec<u8>>>,
    inbound: mpsc::Receiver<Vec<u8>>,
    faults: Faults,
    rng: StdRng,
    held: Vec<Held>,
    sent_count: u64,
    recv_buffer: Vec<u8>,
    closed: bool,
}

/// Creates two channels bound to `addr_a` and `addr_b`, each addressed to the other.
pub fn pair(addr_a: net::SocketAddr, addr_b: net::SocketAddr) -> (SimChannel, SimChannel) {
    let (tx_ab, rx_ab) = mpsc::channel();
    let (tx_ba, rx_ba) = mpsc::channel();

    let a = SimChannel::new(addr_a, addr_b, tx_ab, rx_ba);
    let b = SimChannel::new(addr_b, addr_a, tx_ba, rx_ab);

    (a, b)
}

impl SimChannel {
    fn new(
        local_addr: net::SocketAddr,
        peer_addr: net::SocketAddr,
        outbound: mpsc::Sender<Vec<u8>>,
        inbound: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            local_addr,
            peer_addr,
            outbound: Some(outbound),
            inbound,
            faults: Faults::None,
            rng: StdRng::seed_from_u64(0),
            held: Vec::new(),
            sent_count: 0,
            recv_buffer: Vec::new(),
            closed: false,
        }
    }

    /// Replaces the policy applied to datagrams sent from this end.
    pub fn set_faults(&mut self, faults: Faults) {
        if let Faults::Random(ref impairment) = faults {
            self.rng = StdRng::seed_from_u64(impairment.seed);
        }

        self.faults = faults;
    }

    /// Builder form of [`SimChannel::set_faults`].
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.set_faults(faults);
        self
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }

    fn decide(&mut self, bytes: &[u8]) -> Fault {
        match &mut self.faults {
            Faults::None => Fault::Deliver,
            Faults::Script(script) => {
                let datagram = Datagram {
                    index: self.sent_count,
                    header: serial::decode(bytes).ok().map(|(header, _)| header),
                    bytes,
                };

                script(&datagram)
            }
            Faults::Random(impairment) => {
                let roll: f64 = self.rng.gen();

                let mut threshold = impairment.loss_rate;
                if roll < threshold {
                    return Fault::Drop;
                }
                threshold += impairment.corrupt_rate;
                if roll < threshold {
                    return Fault::Corrupt;
                }
                threshold += impairment.duplicate_rate;
                if roll < threshold {
                    return Fault::Duplicate;
                }
                threshold += impairment.delay_rate;
                if roll < threshold {
                    let span = impairment.delay_span.max(1);
                    return Fault::Delay(self.rng.gen_range(1..=span));
                }

                Fault::Deliver
            }
        }
    }

    // Flips one bit in the region a receiver checks: the payload, or the checksum field itself if
    // there is no payload.
    fn corrupt(&mut self, bytes: &mut [u8]) {
        let region = if bytes.len() > HEADER_SIZE {
            HEADER_SIZE..bytes.len()
        } else if bytes.len() == HEADER_SIZE {
            8..12
        } else {
            0..bytes.len()
        };

        if region.is_empty() {
            return;
        }

        let idx = self.rng.gen_range(region);
        let bit = self.rng.gen_range(0..8);
        bytes[idx] ^= 1 << bit;
    }

    fn deliver(&self, bytes: Vec<u8>) {
        if let Some(outbound) = &self.outbound {
            // The receiving end may already be gone, same as sending into the void
            let _ = outbound.send(bytes);
        }
    }

    // Counts down held datagrams, releasing those whose wait is over
    fn age_held(&mut self) {
        let mut i = 0;

        while i < self.held.len() {
            self.held[i].remaining -= 1;

            if self.held[i].remaining == 0 {
                let held = self.held.remove(i);
                self.deliver(held.bytes);
            } else {
                i += 1;
            }
        }
    }
}

impl Channel for SimChannel {
    fn send_to(&mut self, bytes: &[u8], addr: net::SocketAddr) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        if addr != self.peer_addr {
            trace!(%addr, "no route in simulated link, datagram discarded");
            return Ok(());
        }

        let fault = self.decide(bytes);
        let index = self.sent_count;
        self.sent_count += 1;

        trace!(index, ?fault, len = bytes.len(), "simulated send");

        match fault {
            Fault::Deliver => self.deliver(bytes.to_vec()),
            Fault::Drop => {}
            Fault::Corrupt => {
                let mut bytes = bytes.to_vec();
                self.corrupt(&mut bytes);
                self.deliver(bytes);
            }
            Fault::Duplicate => {
                self.deliver(bytes.to_vec());
                self.deliver(bytes.to_vec());
            }
            Fault::Delay(count) => {
                self.age_held();
                self.held.push(Held {
                    remaining: count.max(1),
                    bytes: bytes.to_vec(),
                });
                return Ok(());
            }
        }

        self.age_held();

        Ok(())
    }

    fn receive_from(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> Result<(&[u8], net::SocketAddr), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let bytes = match timeout {
            Some(timeout) => self.inbound.recv_timeout(timeout).map_err(|err| match err {
                mpsc::RecvTimeoutError::Timeout => ChannelError::Timeout,
                mpsc::RecvTimeoutError::Disconnected => ChannelError::Closed,
            })?,
            None => self.inbound.recv().map_err(|_| ChannelError::Closed)?,
        };

        self.recv_buffer = bytes;

        Ok((&self.recv_buffer[..], self.peer_addr))
    }

    fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        self.closed = true;
        // Datagrams still held back are lost with the link
        self.held.clear();
        self.outbound = None;
        Ok(())
    }
}
