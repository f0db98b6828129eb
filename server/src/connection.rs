//! Listening socket and client connection lifecycle.
//!
//! Only the coordinator rank ever holds a [`ConnectionManager`]. It moves
//! through `Unstarted → Listening → (Idle ⇄ Connected) → Closed`:
//! - `Listening`: the socket is bound, no client has been seen yet
//! - `Idle`: a previous attempt failed or a client left; still accepting
//! - `Connected`: a client completed the handshake and sent `Go`
//! - `Closed`: the session is over, the listening socket is released
//!
//! The step loop must never stall on the network, so the listener is
//! non-blocking and the client stream is only read after a zero-wait
//! readiness check. The only bounded waits are the `Go` wait right after
//! the handshake and message reads. Each message read has one overall
//! deadline, so a client trickling bytes cannot stretch it.

use crate::config::{CONNECT_WAIT, IO_TIMEOUT};
use crate::error::ImdError;
use crate::stop::StopCondition;
use imd_shared::codec::{self, encode_handshake, read_header};
use imd_shared::{CodecError, EnergyRecord, ForceBatch, Header, MessageKind, PayloadOrder, Vec3};
use log::{debug, warn};
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unstarted,
    Listening,
    Idle,
    Connected,
    Closed,
}

/// Reads from a stream until a fixed deadline, whatever the pace of the
/// peer. Past the deadline every read fails with `TimedOut`.
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(ErrorKind::TimedOut, "read deadline passed"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// An accepted client that completed the handshake.
#[derive(Debug)]
pub struct PeerConnection {
    stream: TcpStream,
    /// Remote address, for log records
    pub addr: SocketAddr,
    /// When the client sent `Go`
    pub connected_at: Instant,
}

impl PeerConnection {
    fn new(stream: TcpStream, addr: SocketAddr) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            addr,
            connected_at: Instant::now(),
        })
    }

    /// Whether bytes can be read right now without waiting.
    ///
    /// A closed or broken stream counts as readable: the following read
    /// fails and the failure is handled like any other transport error.
    pub fn has_pending(&self) -> bool {
        if self.stream.set_nonblocking(true).is_err() {
            return true;
        }
        let mut probe = [0u8; 1];
        let pending = match self.stream.peek(&mut probe) {
            Ok(_) => true,
            Err(e) => e.kind() != ErrorKind::WouldBlock,
        };
        if self.stream.set_nonblocking(false).is_err() {
            return true;
        }
        pending
    }

    /// Waits up to `timeout` for bytes to arrive.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        if self.stream.set_read_timeout(Some(timeout)).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let readable = match self.stream.peek(&mut probe) {
            Ok(_) => true,
            Err(e) => !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        };
        let _ = self.stream.set_read_timeout(Some(IO_TIMEOUT));
        readable
    }

    /// Reads under a single [`IO_TIMEOUT`] budget, then restores the
    /// per-read timeout.
    fn read_within_budget<T>(&self, read: impl FnOnce(&mut DeadlineReader<'_>) -> T) -> T {
        let mut reader = DeadlineReader {
            stream: &self.stream,
            deadline: Instant::now() + IO_TIMEOUT,
        };
        let result = read(&mut reader);
        let _ = self.stream.set_read_timeout(Some(IO_TIMEOUT));
        result
    }

    pub fn read_header(&mut self) -> Header {
        self.read_within_budget(|reader| read_header(reader))
    }

    /// Reads the payload of a force message announcing `count` entries.
    /// Counts above `max` are refused without reading.
    pub fn read_forces(&mut self, count: i32, max: usize) -> Result<ForceBatch, CodecError> {
        self.read_within_budget(|reader| codec::read_forces(reader, count, max, PayloadOrder::Native))
    }

    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        codec::write_message(&mut self.stream, bytes)
    }

    pub fn send_energies(&mut self, record: &EnergyRecord) -> io::Result<()> {
        self.send(&codec::encode_energies(record))
    }

    /// Sends positions given in nm; they are converted on the way out.
    pub fn send_positions(&mut self, positions: &[Vec3]) -> io::Result<()> {
        self.send(&codec::encode_positions(positions))
    }

    fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("IMD: Shutting down client socket of {} failed: {}", self.addr, e);
        }
    }
}

/// Owns the listening socket and at most one client.
#[derive(Debug)]
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    peer: Option<PeerConnection>,
    state: ConnectionState,
    port: u16,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            listener: None,
            peer: None,
            state: ConnectionState::Unstarted,
            port: 0,
        }
    }

    /// Binds the listening socket on all interfaces. Port 0 picks a free
    /// port; the port actually bound is returned.
    ///
    /// Any failure here is fatal: a session that was asked for but cannot
    /// accept clients points to a misconfigured run.
    pub fn listen(&mut self, port: u16) -> Result<u16, ImdError> {
        warn!("IMD: Setting up incoming socket.");
        let socket_error = |source: io::Error| ImdError::Socket { port, source };

        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(socket_error)?;
        listener.set_nonblocking(true).map_err(socket_error)?;
        let bound = listener.local_addr().map_err(socket_error)?.port();

        warn!("IMD: Listening for IMD connection on port {}.", bound);
        self.listener = Some(listener);
        self.port = bound;
        self.state = ConnectionState::Listening;
        Ok(bound)
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Bound and without a client.
    pub fn is_accepting(&self) -> bool {
        matches!(self.state, ConnectionState::Listening | ConnectionState::Idle)
    }

    /// Single non-blocking connection attempt.
    ///
    /// Accepts a waiting client, sends the handshake and then requires `Go`
    /// as the very first message within [`CONNECT_WAIT`]. Anything else
    /// drops the client and leaves the manager idle. Returns whether a
    /// client is connected afterwards.
    pub fn try_connect(&mut self) -> bool {
        if !self.is_accepting() {
            return self.is_connected();
        }
        let Some(listener) = &self.listener else {
            return false;
        };

        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
            Err(e) => {
                warn!("IMD: Accepting the connection on the socket failed: {}", e);
                return false;
            }
        };

        let mut peer = match PeerConnection::new(stream, addr) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("IMD: Configuring the client socket failed: {}", e);
                self.state = ConnectionState::Idle;
                return false;
            }
        };

        if let Err(e) = peer.send(&encode_handshake()) {
            warn!("IMD: Connection failed: {}", e);
            peer.shutdown();
            warn!("IMD: disconnected.");
            self.state = ConnectionState::Idle;
            return false;
        }

        warn!(
            "IMD: Connection established with {}, checking if I got IMD_GO orders.",
            addr
        );

        let go = peer.wait_readable(CONNECT_WAIT) && peer.read_header().kind == MessageKind::Go;
        if !go {
            warn!("IMD: No IMD_GO order received. IMD connection failed.");
            peer.shutdown();
            warn!("IMD: disconnected.");
            self.state = ConnectionState::Idle;
            return false;
        }

        peer.connected_at = Instant::now();
        self.peer = Some(peer);
        self.state = ConnectionState::Connected;
        true
    }

    /// Repeats [`try_connect`](Self::try_connect) every `poll` until a
    /// client is connected or a stop is requested.
    pub fn block_connect(&mut self, stop: &StopCondition, poll: Duration) {
        if stop.is_requested() {
            return;
        }

        warn!("IMD: Will wait until I have a connection and IMD_GO orders.");
        while !self.is_connected() && !stop.is_requested() {
            if !self.is_accepting() {
                break;
            }
            if !self.try_connect() {
                thread::sleep(poll);
            }
        }
    }

    pub fn peer_mut(&mut self) -> Option<&mut PeerConnection> {
        self.peer.as_mut()
    }

    /// Drops the client, if any, and goes back to listening.
    pub fn disconnect(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.shutdown();
            debug!(
                "IMD: Client {} was connected for {:?}",
                peer.addr,
                peer.connected_at.elapsed()
            );
        }
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Idle;
        }
    }

    /// Drops the client and releases the listening socket.
    pub fn close(&mut self) {
        self.disconnect();
        self.listener = None;
        self.state = ConnectionState::Closed;
    }
}
