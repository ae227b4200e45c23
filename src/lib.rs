/*

rdt provides reliable, in-order, exactly-once delivery of a byte stream over a channel which may
drop, corrupt, duplicate, delay, or reorder datagrams.

# Segments

Every datagram carries exactly one segment: a 16-byte big-endian header followed by up to 1456
bytes of payload.

  type     u32    START = 0, END = 1, DATA = 2, ACK = 3, END_ACK = 4
  seq      u32
  checksum u32    CRC-32 of the payload
  length   u32    payload length in bytes

Control segments carry no payload. A segment whose payload does not match its checksum is dropped
without reply, as is any datagram which cannot be decoded.

# Sequence numbers

The initiator picks a random initial sequence number s. START carries s, DATA segments carry s+1,
s+2, ... in stream order, and END carries the number following the last DATA. All arithmetic wraps
modulo 2^32; windows are compared by offset from their base, never by magnitude.

# Handshake

  initiator               acceptor
      START(s)    ---->
                  <----   ACK(s)

START is resent every retransmission timeout until ACK(s) arrives. The acceptor answers repeated
copies of START(s) with ACK(s) for as long as it is receiving, since the first reply may have been
lost.

# Transfer

Go-back-N. The sender keeps up to W segments in flight. On expiry of its single retransmission
timer, every unacknowledged segment is sent again.

The receiver holds a reorder buffer spanning W sequence numbers from the next expected one.
Segments ahead of a gap are stored; when the gap fills, the stored run is delivered at once. Every
DATA received within or behind the window is answered with a cumulative ACK carrying the next
expected sequence number. An ACK thus acknowledges everything before it, and ACK(s+1) is the
smallest possible acknowledgement of data.

Case 0: in order

v              v
a _ _ _ _ => _ _ _ _ _  deliver a, ACK(b)

Case 1: gap

v              v
_ c _ _ _ => _ c _ _ _  store c, ACK(b)

Case 2: gap filled

v                  v
b c d _ _ => _ _ _ _ _  deliver b c d, ACK(e)

DATA beyond the window is dropped without reply.

# Teardown

The initiator sends END once all of its data has been acknowledged, and resends it every timeout
until END_ACK arrives. The acceptor accepts END only at the next expected sequence number, so END
cannot overtake missing data. Having sent END_ACK, the acceptor lingers for a while, answering
retransmitted copies of END, then closes.

*/

mod buffer;
mod timer;

pub mod endpoint;
pub mod error;
pub mod logging;
pub mod segment;
pub mod sim;
pub mod socket;

pub use endpoint::Config;
pub use endpoint::Endpoint;
pub use endpoint::Role;
pub use endpoint::State;
pub use endpoint::Stats;

pub use error::ChannelError;
pub use error::Error;
pub use error::Result;

pub use socket::Channel;
pub use socket::UdpChannel;
