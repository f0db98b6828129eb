//! Per-step agreement between all ranks on what the coordinator decided.
//!
//! Every rank calls [`synchronize`] once per step, in the same order relative
//! to its other collective calls. The sequence of broadcasts is fixed:
//! connection flag, update interval, signed force count and, only when new
//! forces arrived, the force batch itself.

use crate::coordinator::Coordinator;
use crate::error::GroupError;
use crate::group::GroupComm;
use imd_shared::{ForceBatch, FORCE_CONVERSION};
use log::debug;

/// Session state every rank holds its own copy of.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedState {
    pub connected: bool,
    /// Steps between two transmissions.
    pub interval: i32,
    /// Interval in force while no client is connected
    pub default_interval: i32,
    pub forces_enabled: bool,
    /// Forces in simulation units, indices into the tracked atom list.
    pub applied: ForceBatch,
}

impl SharedState {
    pub fn new(interval: i32, forces_enabled: bool) -> Self {
        Self {
            connected: false,
            interval,
            default_interval: interval,
            forces_enabled,
            applied: ForceBatch::default(),
        }
    }

    /// Whether `step` is a transmission step for the current interval.
    pub fn is_transmission_step(&self, step: i64) -> bool {
        self.interval > 0 && step % i64::from(self.interval) == 0
    }
}

/// Brings `shared` on every rank in line with the coordinator.
///
/// `coordinator` must be `Some` on rank 0 and `None` elsewhere. When the
/// coordinator is not connected only the flag is exchanged, the interval
/// falls back to the default and the forces stay as they are. New forces are converted to simulation units, written to the
/// force log and broadcast as one batch; the coordinator's "new forces" mark
/// is cleared once that broadcast went out.
pub fn synchronize<G: GroupComm>(
    group: &mut G,
    shared: &mut SharedState,
    mut coordinator: Option<&mut Coordinator>,
    tracked: &[usize],
    time: f64,
) -> Result<(), GroupError> {
    let mut connected = coordinator
        .as_deref()
        .map_or(shared.connected, Coordinator::is_connected);
    group.broadcast(&mut connected)?;
    shared.connected = connected;
    if !connected {
        shared.interval = shared.default_interval;
        return Ok(());
    }

    let mut interval = coordinator
        .as_deref()
        .map_or(shared.interval, Coordinator::pending_interval);
    group.broadcast(&mut interval)?;
    shared.interval = interval;

    if !shared.forces_enabled {
        return Ok(());
    }

    let mut count = coordinator
        .as_deref()
        .map_or(0, Coordinator::signed_force_count);
    group.broadcast(&mut count)?;
    if count < 0 {
        return Ok(());
    }

    let mut batch = match coordinator.as_deref_mut() {
        Some(coordinator) => {
            let batch = coordinator.received().scaled(FORCE_CONVERSION);
            coordinator.log_forces(time, &batch, tracked);
            batch
        }
        None => ForceBatch::default(),
    };
    group.broadcast(&mut batch)?;
    if batch.len() != count as usize {
        return Err(GroupError::LengthMismatch {
            expected: count as usize,
            got: batch.len(),
        });
    }

    debug!("IMD: {} pull forces now applied", batch.len());
    shared.applied = batch;
    if let Some(coordinator) = coordinator {
        coordinator.clear_new_forces();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImdOptions;
    use crate::group::{ChannelGroup, Role, SerialGroup};
    use crate::stop::StopCondition;
    use crate::test_support::{connected_coordinator, deliver, forces_message};
    use assert_approx_eq::assert_approx_eq;
    use imd_shared::codec::encode_header;
    use imd_shared::MessageKind;
    use std::thread;

    fn pull_options() -> ImdOptions {
        ImdOptions {
            pull: true,
            ..ImdOptions::default()
        }
    }

    #[test]
    fn test_transmission_step() {
        let shared = SharedState::new(5, false);
        assert!(shared.is_transmission_step(0));
        assert!(!shared.is_transmission_step(3));
        assert!(shared.is_transmission_step(10));
    }

    #[test]
    fn test_disconnected_coordinator_changes_nothing_else() {
        let tracked: Vec<usize> = (0..4).collect();
        let batch = ForceBatch::new(vec![1], vec![[2.0, 0.0, 0.0]]).unwrap();

        let handles: Vec<_> = ChannelGroup::create(3)
            .into_iter()
            .map(|mut group| {
                let tracked = tracked.clone();
                let batch = batch.clone();
                thread::spawn(move || {
                    let mut shared = SharedState::new(3, true);
                    shared.connected = true;
                    shared.interval = 7;
                    shared.applied = batch;
                    let mut coordinator = (group.role() == Role::Coordinator).then(|| {
                        let mut connection = crate::connection::ConnectionManager::new();
                        connection.listen(0).unwrap();
                        Coordinator::new(connection, 3, &pull_options(), 4, None)
                    });
                    synchronize(&mut group, &mut shared, coordinator.as_mut(), &tracked, 0.0).unwrap();
                    shared
                })
            })
            .collect();

        for handle in handles {
            let shared = handle.join().unwrap();
            assert!(!shared.connected);
            assert_eq!(shared.interval, 3);
            assert_eq!(shared.applied.indices(), &[1]);
        }
    }

    #[test]
    fn test_new_forces_reach_every_rank_once() {
        let tracked: Vec<usize> = (0..12).collect();

        let handles: Vec<_> = ChannelGroup::create(3)
            .into_iter()
            .map(|mut group| {
                let tracked = tracked.clone();
                thread::spawn(move || {
                    let mut shared = SharedState::new(10, true);
                    let mut client = None;
                    let mut coordinator = None;
                    if group.role() == Role::Coordinator {
                        let (mut c, mut stream) = connected_coordinator(&pull_options(), 10, 12);
                        let stop = StopCondition::new();
                        let mut message = encode_header(MessageKind::TransferRate, 2).to_vec();
                        message.extend(forces_message(
                            vec![5, 9],
                            vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                        ));
                        deliver(&mut c, &mut stream, &message, &stop);
                        coordinator = Some(c);
                        client = Some(stream);
                    }

                    synchronize(&mut group, &mut shared, coordinator.as_mut(), &tracked, 0.0).unwrap();
                    let first = shared.clone();
                    let still_new = coordinator.as_ref().map(|c| c.has_new_forces());

                    // Nothing new: only the negative count travels.
                    synchronize(&mut group, &mut shared, coordinator.as_mut(), &tracked, 0.1).unwrap();
                    drop(client);
                    (first, shared, still_new)
                })
            })
            .collect();

        for (rank, handle) in handles.into_iter().enumerate() {
            let (first, second, still_new) = handle.join().unwrap();
            assert!(first.connected);
            assert_eq!(first.interval, 2);
            assert_eq!(first.applied.indices(), &[5, 9]);
            assert_approx_eq!(first.applied.forces()[0][0], FORCE_CONVERSION, 1e-5);
            assert_approx_eq!(first.applied.forces()[1][1], FORCE_CONVERSION, 1e-5);
            assert_eq!(second.applied, first.applied);
            if rank == 0 {
                assert_eq!(still_new, Some(false));
            }
        }
    }

    #[test]
    fn test_disconnect_restores_default_interval_on_ranks() {
        let (mut coordinator, mut stream) = connected_coordinator(&pull_options(), 5, 4);
        let stop = StopCondition::new();
        let mut group = SerialGroup::new();
        let mut shared = SharedState::new(5, true);

        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::TransferRate, 2), &stop);
        synchronize(&mut group, &mut shared, Some(&mut coordinator), &[0, 1, 2, 3], 0.0).unwrap();
        assert_eq!(shared.interval, 2);
        assert!(shared.is_transmission_step(2));

        deliver(&mut coordinator, &mut stream, &encode_header(MessageKind::Disconnect, 0), &stop);
        synchronize(&mut group, &mut shared, Some(&mut coordinator), &[0, 1, 2, 3], 0.1).unwrap();
        assert!(!shared.connected);
        assert_eq!(shared.interval, 5);
        assert!(!shared.is_transmission_step(2));
    }

    #[test]
    fn test_forces_disabled_skips_batch() {
        let options = ImdOptions::default();
        let (mut coordinator, mut stream) = connected_coordinator(&options, 5, 4);
        let stop = StopCondition::new();
        let message = forces_message(vec![0], vec![[1.0, 1.0, 1.0]]);
        deliver(&mut coordinator, &mut stream, &message, &stop);

        let mut shared = SharedState::new(5, false);
        synchronize(&mut SerialGroup::new(), &mut shared, Some(&mut coordinator), &[0, 1, 2, 3], 0.0)
            .unwrap();
        assert!(shared.connected);
        assert!(shared.applied.is_empty());
        assert!(coordinator.has_new_forces());
    }
}
