use std::io;
use std::net;
use std::time;

use crate::error::ChannelError;
use crate::segment;

const SOCKET_POLLING_KEY: usize = 0;

/// An unreliable datagram transport.
///
/// Implementations may drop, corrupt, duplicate, delay, or reorder datagrams. Endpoints rely on
/// nothing else.
pub trait Channel {
    /// Sends a single datagram to `addr`. Delivery is not guaranteed.
    fn send_to(&mut self, bytes: &[u8], addr: net::SocketAddr) -> Result<(), ChannelError>;

    /// Blocks for up to `timeout` (forever if `None`) for an inbound datagram. Fails with
    /// [`ChannelError::Timeout`] if nothing arrived in time. Implementations may also report a
    /// timeout early after a spurious wakeup; callers re-check their own deadlines.
    fn receive_from(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> Result<(&[u8], net::SocketAddr), ChannelError>;

    fn local_addr(&self) -> net::SocketAddr;

    /// Releases the channel. Further sends and receives fail with [`ChannelError::Closed`].
    fn close(&mut self) -> Result<(), ChannelError>;
}

/// A [`Channel`] over a real UDP socket.
pub struct UdpChannel {
    socket: net::UdpSocket,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    // Polling objects
    poller: polling::Poller,
    poller_events: polling::Events,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
    closed: bool,
}

impl UdpChannel {
    /// Equivalent to calling [`UdpChannel::bind_with_frame_size`] with the protocol MTU.
    pub fn bind<A>(bind_address: A) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::bind_with_frame_size(bind_address, segment::MTU)
    }

    /// Binds a non-blocking UDP socket. Datagrams larger than `frame_size_max` are truncated on
    /// receipt, and so fail to decode.
    pub fn bind_with_frame_size<A>(bind_address: A, frame_size_max: usize) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let socket = net::UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        Ok(Self {
            socket,
            local_addr,
            poller,
            poller_events: polling::Events::new(),
            recv_buffer: vec![0; frame_size_max].into_boxed_slice(),
            closed: false,
        })
    }

    /// If a frame can be read from the socket, returns its length and sender. Returns Ok(None)
    /// otherwise.
    fn try_read_frame(&mut self) -> io::Result<Option<(usize, net::SocketAddr)>> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((frame_len, sender_addr)) => Ok(Some((frame_len, sender_addr))),
            Err(err) => match err.kind() {
                // The only acceptable error is WouldBlock, indicating no packet
                io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }

    /// Blocks for a duration of up to `timeout` for an incoming frame. Returns Ok(None) if no
    /// frame could be read in the allotted time, or if polling awoke spuriously.
    fn wait_for_frame(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        // A datagram may already be queued
        if let Some(frame) = self.try_read_frame()? {
            return Ok(Some(frame));
        }

        // Wait for a readable event (must be done prior to each wait() call)
        self.poller
            .modify(&self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            // The socket is readable - read in confidence
            self.try_read_frame()
        } else {
            Ok(None)
        }
    }
}

impl Channel for UdpChannel {
    fn send_to(&mut self, bytes: &[u8], addr: net::SocketAddr) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        match self.socket.send_to(bytes, addr) {
            Ok(_) => Ok(()),
            // A full send buffer is indistinguishable from loss
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn receive_from(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> Result<(&[u8], net::SocketAddr), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        match self.wait_for_frame(timeout)? {
            Some((frame_len, sender_addr)) => Ok((&self.recv_buffer[..frame_len], sender_addr)),
            None => Err(ChannelError::Timeout),
        }
    }

    fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if !self.closed {
            self.closed = true;
            self.poller.delete(&self.socket)?;
        }

        Ok(())
    }
}
