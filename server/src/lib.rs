//! # IMD Session Library
//!
//! This library is the simulation side of an Interactive Molecular Dynamics
//! session. It lets a running, possibly multi-rank, simulation talk to one
//! external client (a molecular viewer) while the step loop keeps going.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! The coordinator rank listens for a client and checks for one once per
//! step without blocking. A client is accepted only after the handshake and
//! a `Go` message; any transport error simply drops it and the simulation
//! carries on as if nobody had been connected.
//!
//! ### Command Processing
//! Pause, disconnect, kill, transfer-rate and force messages are drained
//! every step. Pausing holds the step loop until the client resumes.
//!
//! ### Rank Consistency
//! Workers never see the socket. Every step the coordinator broadcasts
//! whether a client is connected, the update interval and, when they
//! changed, the pull forces. All ranks therefore apply identical forces.
//!
//! ### Position Streaming
//! On transmission steps the tracked atoms are gathered on the coordinator,
//! molecules that crossed a periodic boundary are made whole, and the
//! positions follow an energy record to the client.
//!
//! ## Module Organization
//!
//! - `connection`: listening socket, handshake and client stream
//! - `coordinator`: command dispatch and coordinator-only state
//! - `sync`: per-step broadcasts shared by all ranks
//! - `assembler`: position gather and molecule unwrapping
//! - `session`: the aggregate the simulation loop drives
//! - `group`, `domain`, `energy`, `pbc`, `stop`: the simulation-facing
//!   seams (process group, atom ownership, energy terms, periodic box,
//!   cooperative stop)
//! - `config`, `error`, `force_log`: run options, error types and the
//!   pull force log
//! - `sim`: the toy engine behind the demo binary

pub mod assembler;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod domain;
pub mod energy;
pub mod error;
pub mod force_log;
pub mod group;
pub mod pbc;
pub mod session;
pub mod sim;
pub mod stop;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use config::{ImdOptions, RunConfig};
pub use error::{GroupError, ImdError};
pub use group::{ChannelGroup, GroupComm, Role, SerialGroup};
pub use session::Session;
pub use stop::StopCondition;
