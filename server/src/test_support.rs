//! Loopback helpers shared by the unit tests.

use crate::config::ImdOptions;
use crate::connection::ConnectionManager;
use crate::coordinator::Coordinator;
use crate::stop::StopCondition;
use imd_shared::codec::{encode_forces, encode_header};
use imd_shared::{ForceBatch, MessageKind, PayloadOrder, Vec3, HEADER_SIZE};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

/// A coordinator with a client that already sent `Go`, plus the client's
/// end of the stream.
pub fn connected_coordinator(
    options: &ImdOptions,
    default_interval: i32,
    tracked_count: usize,
) -> (Coordinator, TcpStream) {
    let mut connection = ConnectionManager::new();
    let port = connection.listen(0).unwrap();
    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut handshake = [0u8; HEADER_SIZE];
        stream.read_exact(&mut handshake).unwrap();
        stream.write_all(&encode_header(MessageKind::Go, 0)).unwrap();
        stream
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !connection.try_connect() {
        assert!(Instant::now() < deadline, "client never connected");
        thread::sleep(Duration::from_millis(10));
    }
    let stream = client.join().unwrap();
    let coordinator = Coordinator::new(connection, default_interval, options, tracked_count, None);
    (coordinator, stream)
}

/// Writes `bytes` from the client side and lets the coordinator drain them.
pub fn deliver(coordinator: &mut Coordinator, stream: &mut TcpStream, bytes: &[u8], stop: &StopCondition) {
    stream.write_all(bytes).unwrap();
    let peer = coordinator.connection_mut().peer_mut().unwrap();
    assert!(peer.wait_readable(Duration::from_secs(2)));
    coordinator.drain_commands(stop);
}

pub fn forces_message(indices: Vec<i32>, forces: Vec<Vec3>) -> Vec<u8> {
    encode_forces(&ForceBatch::new(indices, forces).unwrap(), PayloadOrder::Native)
}
