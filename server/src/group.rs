//! Process-group communication used to keep every rank consistent.
//!
//! Rank 0 is the coordinator: it owns the client socket and is the source of
//! every broadcast and the sink of every gather. All ranks must issue the same
//! sequence of collective calls.

use crate::error::GroupError;
use bincode::{deserialize, serialize};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

pub trait GroupComm {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn role(&self) -> Role {
        if self.rank() == 0 {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }

    fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    /// Replaces `value` on every rank with the coordinator's value.
    fn broadcast<T>(&mut self, value: &mut T) -> Result<(), GroupError>
    where
        T: Serialize + DeserializeOwned;

    /// Collects one value per rank on the coordinator, ordered by rank.
    /// Workers get `None`.
    fn gather<T>(&mut self, local: T) -> Result<Option<Vec<T>>, GroupError>
    where
        T: Serialize + DeserializeOwned;
}

/// A run with a single process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialGroup;

impl SerialGroup {
    pub fn new() -> Self {
        Self
    }
}

impl GroupComm for SerialGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast<T>(&mut self, _value: &mut T) -> Result<(), GroupError>
    where
        T: Serialize + DeserializeOwned,
    {
        Ok(())
    }

    fn gather<T>(&mut self, local: T) -> Result<Option<Vec<T>>, GroupError>
    where
        T: Serialize + DeserializeOwned,
    {
        Ok(Some(vec![local]))
    }
}

enum Links {
    Coordinator {
        to_workers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
        from_workers: Vec<mpsc::UnboundedReceiver<Vec<u8>>>,
    },
    Worker {
        from_coordinator: mpsc::UnboundedReceiver<Vec<u8>>,
        to_coordinator: mpsc::UnboundedSender<Vec<u8>>,
    },
}

/// Ranks living on separate threads of one process, linked by channels.
///
/// Calls block the calling thread, so they must not be made from inside an
/// async task.
pub struct ChannelGroup {
    rank: usize,
    size: usize,
    links: Links,
}

impl ChannelGroup {
    /// Creates a connected group of `size` ranks; element `i` is rank `i`.
    pub fn create(size: usize) -> Vec<ChannelGroup> {
        let size = size.max(1);
        let mut to_workers = Vec::with_capacity(size - 1);
        let mut from_workers = Vec::with_capacity(size - 1);
        let mut workers = Vec::with_capacity(size - 1);

        for rank in 1..size {
            let (down_tx, down_rx) = mpsc::unbounded_channel();
            let (up_tx, up_rx) = mpsc::unbounded_channel();
            to_workers.push(down_tx);
            from_workers.push(up_rx);
            workers.push(ChannelGroup {
                rank,
                size,
                links: Links::Worker {
                    from_coordinator: down_rx,
                    to_coordinator: up_tx,
                },
            });
        }

        let mut group = Vec::with_capacity(size);
        group.push(ChannelGroup {
            rank: 0,
            size,
            links: Links::Coordinator {
                to_workers,
                from_workers,
            },
        });
        group.extend(workers);
        group
    }
}

impl GroupComm for ChannelGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast<T>(&mut self, value: &mut T) -> Result<(), GroupError>
    where
        T: Serialize + DeserializeOwned,
    {
        match &mut self.links {
            Links::Coordinator { to_workers, .. } => {
                let bytes = serialize(value)?;
                for (i, worker) in to_workers.iter().enumerate() {
                    worker
                        .send(bytes.clone())
                        .map_err(|_| GroupError::Disconnected { rank: i + 1 })?;
                }
                Ok(())
            }
            Links::Worker {
                from_coordinator, ..
            } => {
                let bytes = from_coordinator
                    .blocking_recv()
                    .ok_or(GroupError::Disconnected { rank: 0 })?;
                *value = deserialize(&bytes)?;
                Ok(())
            }
        }
    }

    fn gather<T>(&mut self, local: T) -> Result<Option<Vec<T>>, GroupError>
    where
        T: Serialize + DeserializeOwned,
    {
        match &mut self.links {
            Links::Coordinator { from_workers, .. } => {
                let mut values = Vec::with_capacity(self.size);
                values.push(local);
                for (i, worker) in from_workers.iter_mut().enumerate() {
                    let bytes = worker
                        .blocking_recv()
                        .ok_or(GroupError::Disconnected { rank: i + 1 })?;
                    values.push(deserialize(&bytes)?);
                }
                Ok(Some(values))
            }
            Links::Worker { to_coordinator, .. } => {
                to_coordinator
                    .send(serialize(&local)?)
                    .map_err(|_| GroupError::Disconnected { rank: 0 })?;
                Ok(None)
            }
        }
    }
}
