use crate::config::Integrator;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a collective operation. The run cannot continue after one of
/// these since the ranks no longer agree on what happened.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("rank {rank} left the process group")]
    Disconnected { rank: usize },

    #[error("failed to encode or decode broadcast payload: {0}")]
    Payload(#[from] bincode::Error),

    #[error("collective delivered {got} entries but {expected} were expected")]
    LengthMismatch { expected: usize, got: usize },
}

/// Fatal session errors, raised before the step loop starts.
#[derive(Debug, Error)]
pub enum ImdError {
    #[error("energy minimization via {0:?} in parallel is currently not supported by IMD")]
    UnsupportedParallelIntegrator(Integrator),

    #[error("IMD index is not sorted (entry {position}: {previous} > {next}); this is not supported")]
    UnsortedIndex {
        position: usize,
        previous: usize,
        next: usize,
    },

    #[error("IMD index {index} is out of range for a system of {total} atoms")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("failed to set up listening socket on port {port}: {source}")]
    Socket {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to open IMD force log {}: {source}", path.display())]
    ForceLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Group(#[from] GroupError),
}
