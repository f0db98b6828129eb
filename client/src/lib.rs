//! # IMD Client Library
//!
//! A small asynchronous client for the IMD session served by `imd-server`.
//! It plays the part a molecular viewer normally plays: it connects, checks
//! the handshake, releases the simulation with `Go` and then receives
//! energies and positions while sending commands and pull forces back.
//!
//! ## Architecture Overview
//!
//! ### Handshake
//! The server announces the protocol version in its own byte order. The
//! client compares it against both byte orders and remembers whether the
//! fixed-width payloads must be swapped. Force batches are written in the
//! server's order so the server never has to swap anything.
//!
//! ### Frames
//! After `Go` the server sends, on every transmission step, one energy
//! record followed by the positions of the tracked atoms (in Å).
//! [`ImdClient::next_frame`] yields them one at a time.
//!
//! ### Commands
//! `Pause` toggles, `TransferRate` changes how often frames arrive,
//! `Kill` asks the simulation to stop (honoured only when the server allows
//! termination) and `Disconnect` leaves the simulation running.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - [`ImdClient`], generic over the transport so tests can use mock streams
//! - [`Frame`] and [`ClientError`]
//!
//! ## Usage Example
//!
//! ```no_run
//! use imd_client::{Frame, ImdClient};
//! use imd_shared::ForceBatch;
//!
//! # async fn demo() -> Result<(), imd_client::ClientError> {
//! let mut client = ImdClient::connect("127.0.0.1:8888").await?;
//! client.go().await?;
//! client.set_rate(5).await?;
//!
//! // Pull the first tracked atom along +x.
//! let batch = ForceBatch::new(vec![0], vec![[10.0, 0.0, 0.0]])?;
//! client.send_forces(&batch).await?;
//!
//! if let Frame::Positions(x) = client.next_frame().await? {
//!     println!("{} atoms", x.len());
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod network;

pub use network::{ClientError, Frame, ImdClient};
