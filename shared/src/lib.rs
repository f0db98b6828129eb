//! # IMD Wire Protocol
//!
//! Types and codecs shared by the simulation-side session layer and the
//! interactive client. The protocol is the one spoken by VMD/NAMD style
//! Interactive Molecular Dynamics clients: every message starts with a fixed
//! 8-byte header (message kind + length, both in network byte order), some
//! messages carry a fixed-width payload.
//!
//! ## Message flow
//!
//! 1. Server accepts, sends a handshake whose length field carries the
//!    protocol version in *host* byte order (the client uses it to detect
//!    whether it has to byte-swap payloads).
//! 2. Client answers with `Go`.
//! 3. Server streams `Energies` and `Coordinates` at the negotiated rate;
//!    client may send `Pause`, `TransferRate`, `Forces`, `Kill` or
//!    `Disconnect` at any time.
//!
//! Payloads are never versioned; their shape is fixed by [`PROTOCOL_VERSION`].

pub mod codec;
pub mod records;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::CodecError;
pub use records::{EnergyRecord, ForceBatch};

/// Size of the message header on the wire.
pub const HEADER_SIZE: usize = 8;

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: i32 = 2;

/// Nanometres to Ångström, applied to positions on their way out.
pub const NM_TO_ANGSTROM: f32 = 10.0;

/// Calories to Joules.
pub const CAL_TO_JOULE: f32 = 4.184;

/// Client forces arrive in kcal mol⁻¹ Å⁻¹; the simulation wants kJ mol⁻¹ nm⁻¹.
pub const FORCE_CONVERSION: f32 = CAL_TO_JOULE * NM_TO_ANGSTROM;

/// Energies leave in kJ/mol, so the client shows simulation units.
pub const ENERGY_CONVERSION: f32 = 1.0;

/// Three Cartesian components.
pub type Vec3 = [f32; 3];

/// Kind of an IMD message. Codes match the NAMD/VMD numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Disconnect,
    Energies,
    Coordinates,
    Go,
    Handshake,
    Kill,
    Forces,
    Pause,
    TransferRate,
    /// Produced locally when a header could not be read completely.
    IoError,
    /// A code outside the known set.
    Unknown(i32),
}

impl MessageKind {
    pub fn code(self) -> i32 {
        match self {
            MessageKind::Disconnect => 0,
            MessageKind::Energies => 1,
            MessageKind::Coordinates => 2,
            MessageKind::Go => 3,
            MessageKind::Handshake => 4,
            MessageKind::Kill => 5,
            MessageKind::Forces => 6,
            MessageKind::Pause => 7,
            MessageKind::TransferRate => 8,
            MessageKind::IoError => 9,
            MessageKind::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => MessageKind::Disconnect,
            1 => MessageKind::Energies,
            2 => MessageKind::Coordinates,
            3 => MessageKind::Go,
            4 => MessageKind::Handshake,
            5 => MessageKind::Kill,
            6 => MessageKind::Forces,
            7 => MessageKind::Pause,
            8 => MessageKind::TransferRate,
            9 => MessageKind::IoError,
            other => MessageKind::Unknown(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Disconnect => write!(f, "IMD_DISCONNECT"),
            MessageKind::Energies => write!(f, "IMD_ENERGIES"),
            MessageKind::Coordinates => write!(f, "IMD_FCOORDS"),
            MessageKind::Go => write!(f, "IMD_GO"),
            MessageKind::Handshake => write!(f, "IMD_HANDSHAKE"),
            MessageKind::Kill => write!(f, "IMD_KILL"),
            MessageKind::Forces => write!(f, "IMD_MDCOMM"),
            MessageKind::Pause => write!(f, "IMD_PAUSE"),
            MessageKind::TransferRate => write!(f, "IMD_TRATE"),
            MessageKind::IoError => write!(f, "IMD_IOERROR"),
            MessageKind::Unknown(code) => write!(f, "unknown message type {}", code),
        }
    }
}

/// A decoded message header. `length` means atom/force count, requested
/// rate or protocol version depending on `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: MessageKind,
    pub length: i32,
}

impl Header {
    pub fn new(kind: MessageKind, length: i32) -> Self {
        Self { kind, length }
    }

    pub fn io_error() -> Self {
        Self::new(MessageKind::IoError, 0)
    }
}

/// Byte order of the fixed-width payloads as seen by the reader.
///
/// The server always writes payloads in its own byte order; a client on a
/// machine of the other endianness learns this from the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadOrder {
    #[default]
    Native,
    Swapped,
}

impl PayloadOrder {
    pub fn read_i32(self, bytes: [u8; 4]) -> i32 {
        let value = i32::from_ne_bytes(bytes);
        match self {
            PayloadOrder::Native => value,
            PayloadOrder::Swapped => value.swap_bytes(),
        }
    }

    pub fn read_f32(self, bytes: [u8; 4]) -> f32 {
        f32::from_bits(self.read_i32(bytes) as u32)
    }

    pub fn write_i32(self, value: i32) -> [u8; 4] {
        match self {
            PayloadOrder::Native => value.to_ne_bytes(),
            PayloadOrder::Swapped => value.swap_bytes().to_ne_bytes(),
        }
    }

    pub fn write_f32(self, value: f32) -> [u8; 4] {
        self.write_i32(value.to_bits() as i32)
    }
}
