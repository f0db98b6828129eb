//! Coordinator-only half of the session: the client connection, command
//! dispatch and everything that is decided before it is broadcast.
//!
//! Nothing in here is visible to workers. Whatever they need (connection
//! flag, update interval, forces) leaves through the group synchronizer.

use crate::config::{ImdOptions, LOOP_WAIT, PAUSE_POLL};
use crate::connection::ConnectionManager;
use crate::force_log::ForceLog;
use crate::stop::StopCondition;
use imd_shared::{EnergyRecord, ForceBatch, Header, MessageKind, Vec3};
use log::{debug, warn};
use std::thread;

pub struct Coordinator {
    connection: ConnectionManager,
    /// Interval restored on disconnect or a rate request of 0
    default_interval: i32,
    /// Interval requested by the client, adopted at the next sync
    pending_interval: i32,
    received: ForceBatch,
    new_forces: bool,
    terminatable: bool,
    wait_for_client: bool,
    terminated: bool,
    tracked_count: usize,
    energies: EnergyRecord,
    force_log: Option<ForceLog>,
}

impl Coordinator {
    pub fn new(
        connection: ConnectionManager,
        default_interval: i32,
        options: &ImdOptions,
        tracked_count: usize,
        force_log: Option<ForceLog>,
    ) -> Self {
        Self {
            connection,
            default_interval,
            pending_interval: default_interval,
            received: ForceBatch::default(),
            new_forces: false,
            terminatable: options.terminatable,
            wait_for_client: options.wait,
            terminated: false,
            tracked_count,
            energies: EnergyRecord::default(),
            force_log,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn default_interval(&self) -> i32 {
        self.default_interval
    }

    pub fn pending_interval(&self) -> i32 {
        self.pending_interval
    }

    pub fn received(&self) -> &ForceBatch {
        &self.received
    }

    pub fn has_new_forces(&self) -> bool {
        self.new_forces
    }

    /// Batch size of fresh forces, or its negation if nothing new arrived
    /// since the last broadcast.
    pub fn signed_force_count(&self) -> i32 {
        let count = self.received.len() as i32;
        if self.new_forces {
            count
        } else {
            -count
        }
    }

    pub fn clear_new_forces(&mut self) {
        self.new_forces = false;
    }

    pub fn energies_mut(&mut self) -> &mut EnergyRecord {
        &mut self.energies
    }

    /// Connects a client if none is present, then works through its
    /// commands. With `--imdwait` this blocks until a client shows up.
    pub fn poll(&mut self, stop: &StopCondition) {
        if !self.connection.is_connected() {
            if self.wait_for_client {
                self.connection.block_connect(stop, LOOP_WAIT);
            } else {
                self.connection.try_connect();
            }
        }

        if self.connection.is_connected() {
            self.drain_commands(stop);
        }
    }

    /// Handles every message that is already waiting. While paused the
    /// step loop is held here until the client unpauses, leaves, or a stop
    /// is requested.
    pub fn drain_commands(&mut self, stop: &StopCondition) {
        let mut paused = false;

        loop {
            let Some(peer) = self.connection.peer_mut() else {
                break;
            };

            if !peer.has_pending() {
                if !paused {
                    break;
                }
                if stop.is_requested() {
                    warn!("IMD: Stop requested while paused, resuming.");
                    break;
                }
                thread::sleep(PAUSE_POLL);
                continue;
            }

            let header = peer.read_header();
            self.dispatch(header, &mut paused, stop);
        }
    }

    fn dispatch(&mut self, header: Header, paused: &mut bool, stop: &StopCondition) {
        debug!("IMD: Received {} ({})", header.kind, header.length);

        match header.kind {
            MessageKind::Kill => {
                if self.terminatable {
                    warn!("IMD: Terminating connection and running simulation (if supported by integrator).");
                    self.terminated = true;
                    self.wait_for_client = false;
                    stop.request();
                    self.disconnect();
                } else {
                    warn!("IMD: Set --imdterm command line switch to allow termination from within IMD.");
                }
            }

            MessageKind::Disconnect => {
                warn!("IMD: Disconnecting client.");
                self.disconnect();
            }

            MessageKind::Forces => self.read_forces(header.length),

            MessageKind::Pause => {
                if *paused {
                    warn!("IMD: Un-pause command received.");
                } else {
                    warn!("IMD: Pause command received.");
                }
                *paused = !*paused;
            }

            MessageKind::TransferRate => {
                self.pending_interval = if header.length > 0 {
                    header.length
                } else {
                    self.default_interval
                };
                warn!("IMD: Update frequency will be set to {}.", self.pending_interval);
            }

            other => {
                warn!("IMD: Received unexpected {}.", other);
                self.fatal("Terminating connection");
            }
        }
    }

    /// Replaces the received batch, or disconnects and leaves it untouched
    /// if the count exceeds the tracked atoms, the payload is short or an
    /// index points outside the tracked atoms.
    fn read_forces(&mut self, count: i32) {
        let Some(peer) = self.connection.peer_mut() else {
            return;
        };

        let batch = match peer.read_forces(count, self.tracked_count) {
            Ok(batch) => batch,
            Err(e) => {
                debug!("IMD: Force payload rejected: {}", e);
                self.fatal("Error while reading forces from remote. Disconnecting");
                return;
            }
        };

        let tracked = self.tracked_count;
        if let Some(index) = batch
            .indices()
            .iter()
            .find(|&&i| i < 0 || i as usize >= tracked)
        {
            debug!("IMD: Force index {} outside of {} tracked atoms", index, tracked);
            self.fatal("Received force on an atom outside the IMD group. Disconnecting");
            return;
        }

        self.received = batch;
        self.new_forces = true;
    }

    /// Sends the energy record followed by the positions. A failed send
    /// drops the client.
    pub fn send_frame(&mut self, positions: &[Vec3]) {
        let Some(peer) = self.connection.peer_mut() else {
            return;
        };

        if peer.send_energies(&self.energies).is_err() {
            self.fatal("Error sending updated energies. Disconnecting client.");
            return;
        }

        let Some(peer) = self.connection.peer_mut() else {
            return;
        };
        if peer.send_positions(positions).is_err() {
            self.fatal("Error sending updated positions. Disconnecting client.");
        }
    }

    /// Appends the applied forces to the force log, if one is kept.
    pub fn log_forces(&mut self, time: f64, applied: &ForceBatch, tracked: &[usize]) {
        let Some(log) = self.force_log.as_mut() else {
            return;
        };
        if let Err(e) = log.record(time, applied, tracked) {
            warn!("IMD: Writing to the force log failed: {}", e);
        }
    }

    fn flush_log(&mut self) {
        if let Some(log) = self.force_log.as_mut() {
            if let Err(e) = log.flush() {
                warn!("IMD: Flushing the force log failed: {}", e);
            }
        }
    }

    /// Drops the client. A later client starts from the default interval.
    pub fn disconnect(&mut self) {
        self.flush_log();
        self.connection.disconnect();
        self.pending_interval = self.default_interval;
    }

    /// Logs `msg` and drops the client; the simulation carries on.
    pub fn fatal(&mut self, msg: &str) {
        warn!("IMD: {}", msg);
        self.disconnect();
        warn!("IMD: disconnected.");
    }

    pub fn close(&mut self) {
        self.flush_log();
        self.connection.close();
        self.force_log = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connected_coordinator, deliver, forces_message};
    use crate::config::IO_TIMEOUT;
    use imd_shared::codec::encode_header;
    use imd_shared::HEADER_SIZE;
    use std::io::Write;
    use std::net::{Shutdown, TcpStream};
    use std::time::{Duration, Instant};

    const DEFAULT: i32 = 10;

    fn connected(terminatable: bool) -> (Coordinator, TcpStream) {
        let options = ImdOptions {
            terminatable,
            pull: true,
            ..ImdOptions::default()
        };
        connected_coordinator(&options, DEFAULT, 20)
    }

    #[test]
    fn test_rate_requests_alternate_with_reset() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();

        for (requested, expected) in [(5, 5), (0, DEFAULT), (7, 7), (0, DEFAULT)] {
            let message = encode_header(MessageKind::TransferRate, requested);
            deliver(&mut coordinator, &mut stream, &message, &stop);
            assert_eq!(coordinator.pending_interval(), expected);
        }
        assert!(coordinator.is_connected());
    }

    #[test]
    fn test_forces_are_stored_as_new() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();

        let message = forces_message(vec![5, 9], vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        deliver(&mut coordinator, &mut stream, &message, &stop);

        assert!(coordinator.has_new_forces());
        assert_eq!(coordinator.received().indices(), &[5, 9]);
        assert_eq!(coordinator.signed_force_count(), 2);
        coordinator.clear_new_forces();
        assert_eq!(coordinator.signed_force_count(), -2);
    }

    #[test]
    fn test_short_force_payload_disconnects_without_update() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        let first = forces_message(vec![1], vec![[1.0, 1.0, 1.0]]);
        deliver(&mut coordinator, &mut stream, &first, &stop);
        coordinator.clear_new_forces();

        // Announces three forces but delivers a single index.
        let mut message = encode_header(MessageKind::Forces, 3).to_vec();
        message.extend_from_slice(&4i32.to_ne_bytes());
        stream.write_all(&message).unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let peer = coordinator.connection.peer_mut().unwrap();
        assert!(peer.wait_readable(Duration::from_secs(2)));
        coordinator.drain_commands(&stop);

        assert!(!coordinator.is_connected());
        assert!(!coordinator.has_new_forces());
        assert_eq!(coordinator.received().indices(), &[1]);
    }

    #[test]
    fn test_oversized_force_count_disconnects_without_update() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        let first = forces_message(vec![2], vec![[0.5, 0.0, 0.0]]);
        deliver(&mut coordinator, &mut stream, &first, &stop);
        coordinator.clear_new_forces();

        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Forces, i32::MAX), &stop);

        assert!(!coordinator.is_connected());
        assert!(!coordinator.has_new_forces());
        assert_eq!(coordinator.received().indices(), &[2]);
    }

    #[test]
    fn test_trickled_force_payload_is_cut_off() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        let message = forces_message(vec![0], vec![[1.0, 2.0, 3.0]]);
        let (header, payload) = message.split_at(HEADER_SIZE);
        let payload = payload.to_vec();

        let mut writer = stream.try_clone().unwrap();
        let sender = thread::spawn(move || {
            for byte in payload {
                thread::sleep(Duration::from_millis(400));
                if writer.write_all(&[byte]).is_err() {
                    break;
                }
            }
        });

        let start = Instant::now();
        deliver(&mut coordinator, &mut stream, header, &stop);
        let elapsed = start.elapsed();

        assert!(elapsed < IO_TIMEOUT + Duration::from_millis(800), "drain took {:?}", elapsed);
        assert!(!coordinator.is_connected());
        assert!(coordinator.received().is_empty());
        sender.join().unwrap();
    }

    #[test]
    fn test_force_outside_tracked_set_disconnects() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();

        let message = forces_message(vec![3, 20], vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        deliver(&mut coordinator, &mut stream, &message, &stop);

        assert!(!coordinator.is_connected());
        assert!(coordinator.received().is_empty());
    }

    #[test]
    fn test_kill_requires_terminatable() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Kill, 0), &stop);
        assert!(coordinator.is_connected());
        assert!(!coordinator.is_terminated());
        assert!(!stop.is_requested());

        let (mut coordinator, mut stream) = connected(true);
        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Kill, 0), &stop);
        assert!(!coordinator.is_connected());
        assert!(coordinator.is_terminated());
        assert!(stop.is_requested());
    }

    #[test]
    fn test_disconnect_restores_default_interval() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        let mut message = encode_header(MessageKind::TransferRate, 3).to_vec();
        message.extend_from_slice(&encode_header(MessageKind::Disconnect, 0));
        deliver(&mut coordinator, &mut stream, &message, &stop);

        assert!(!coordinator.is_connected());
        assert_eq!(coordinator.pending_interval(), DEFAULT);
    }

    #[test]
    fn test_unexpected_message_disconnects() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Energies, 1), &stop);
        assert!(!coordinator.is_connected());
    }

    #[test]
    fn test_pause_holds_until_unpause() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        let mut writer = stream.try_clone().unwrap();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            let mut message = encode_header(MessageKind::TransferRate, 4).to_vec();
            message.extend_from_slice(&encode_header(MessageKind::Pause, 0));
            writer.write_all(&message).unwrap();
        });

        let start = Instant::now();
        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Pause, 0), &stop);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(coordinator.pending_interval(), 4);
        assert!(coordinator.is_connected());
        sender.join().unwrap();
    }

    #[test]
    fn test_stop_ends_pause() {
        let (mut coordinator, mut stream) = connected(false);
        let stop = StopCondition::new();
        let remote = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.request();
        });

        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Pause, 0), &stop);
        assert!(coordinator.is_connected());
        stopper.join().unwrap();
    }
}
