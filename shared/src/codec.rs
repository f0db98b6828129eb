//! Byte-level encoding of IMD messages.
//!
//! Header integers travel in network byte order. Payloads are written in the
//! sender's byte order; readers pass the [`PayloadOrder`] learnt from the
//! handshake.

use crate::records::{EnergyRecord, ForceBatch, ENERGY_RECORD_SIZE};
use crate::{Header, MessageKind, PayloadOrder, Vec3, HEADER_SIZE, NM_TO_ANGSTROM, PROTOCOL_VERSION};
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;

const TUPLE_SIZE: usize = 3 * 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("negative element count {0}")]
    NegativeCount(i32),

    #[error("{count} entries announced, at most {max} accepted")]
    TooManyEntries { count: usize, max: usize },

    #[error("{indices} indices paired with {forces} force vectors")]
    MismatchedBatch { indices: usize, forces: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub fn encode_header(kind: MessageKind, length: i32) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[..4].copy_from_slice(&kind.code().to_be_bytes());
    bytes[4..].copy_from_slice(&length.to_be_bytes());
    bytes
}

/// Decodes a header; anything shorter than [`HEADER_SIZE`] yields an
/// `IoError` header.
pub fn decode_header(bytes: &[u8]) -> Header {
    if bytes.len() < HEADER_SIZE {
        return Header::io_error();
    }
    let kind = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let length = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Header::new(MessageKind::from_code(kind), length)
}

/// Handshake header. The version is deliberately left in host byte order so
/// the peer can tell whether it must swap payloads.
pub fn encode_handshake() -> [u8; HEADER_SIZE] {
    let mut bytes = encode_header(MessageKind::Handshake, 0);
    bytes[4..].copy_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
    bytes
}

/// Interprets a handshake from the receiving side. Returns the payload byte
/// order to use, or `None` if this is not a handshake of our version.
pub fn decode_handshake(bytes: &[u8]) -> Option<PayloadOrder> {
    if bytes.len() < HEADER_SIZE || decode_header(bytes).kind != MessageKind::Handshake {
        return None;
    }
    let version = i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version == PROTOCOL_VERSION {
        Some(PayloadOrder::Native)
    } else if version.swap_bytes() == PROTOCOL_VERSION {
        Some(PayloadOrder::Swapped)
    } else {
        None
    }
}

/// Header plus energy record, ready to be written.
pub fn encode_energies(record: &EnergyRecord) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + ENERGY_RECORD_SIZE);
    buffer.extend_from_slice(&encode_header(MessageKind::Energies, 1));
    buffer.extend_from_slice(&PayloadOrder::Native.write_i32(record.step));
    for term in record.terms() {
        buffer.extend_from_slice(&PayloadOrder::Native.write_f32(term));
    }
    buffer
}

pub fn decode_energies(payload: &[u8], order: PayloadOrder) -> Result<EnergyRecord, CodecError> {
    if payload.len() < ENERGY_RECORD_SIZE {
        return Err(CodecError::ShortRead {
            expected: ENERGY_RECORD_SIZE,
            got: payload.len(),
        });
    }
    let word = |i: usize| [payload[4 * i], payload[4 * i + 1], payload[4 * i + 2], payload[4 * i + 3]];
    let step = order.read_i32(word(0));
    let mut terms = [0.0f32; 9];
    for (i, term) in terms.iter_mut().enumerate() {
        *term = order.read_f32(word(i + 1));
    }
    Ok(EnergyRecord::from_terms(step, terms))
}

/// Header plus position batch. Positions are given in nm and leave in Å.
pub fn encode_positions(positions: &[Vec3]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + TUPLE_SIZE * positions.len());
    buffer.extend_from_slice(&encode_header(
        MessageKind::Coordinates,
        positions.len() as i32,
    ));
    for x in positions {
        for component in x {
            buffer.extend_from_slice(&PayloadOrder::Native.write_f32(component * NM_TO_ANGSTROM));
        }
    }
    buffer
}

/// Decodes `count` positions, leaving them in the wire unit (Å).
pub fn decode_positions(
    payload: &[u8],
    count: usize,
    order: PayloadOrder,
) -> Result<Vec<Vec3>, CodecError> {
    let expected = count * TUPLE_SIZE;
    if payload.len() < expected {
        return Err(CodecError::ShortRead {
            expected,
            got: payload.len(),
        });
    }
    Ok(read_vectors(&payload[..expected], order))
}

/// Number of payload bytes that follow a force header announcing `count`.
pub fn forces_payload_size(count: usize) -> usize {
    count * 4 + count * TUPLE_SIZE
}

/// Header plus force payload, as a client sends it.
pub fn encode_forces(batch: &ForceBatch, order: PayloadOrder) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + forces_payload_size(batch.len()));
    buffer.extend_from_slice(&encode_header(MessageKind::Forces, batch.len() as i32));
    for index in batch.indices() {
        buffer.extend_from_slice(&order.write_i32(*index));
    }
    for force in batch.forces() {
        for component in force {
            buffer.extend_from_slice(&order.write_f32(*component));
        }
    }
    buffer
}

/// Decodes a force payload: `count` indices followed by `count` vectors.
pub fn decode_forces(
    payload: &[u8],
    count: usize,
    order: PayloadOrder,
) -> Result<ForceBatch, CodecError> {
    let expected = forces_payload_size(count);
    if payload.len() < expected {
        return Err(CodecError::ShortRead {
            expected,
            got: payload.len(),
        });
    }
    let (index_bytes, force_bytes) = payload[..expected].split_at(count * 4);
    let indices = index_bytes
        .chunks_exact(4)
        .map(|c| order.read_i32([c[0], c[1], c[2], c[3]]))
        .collect();
    ForceBatch::new(indices, read_vectors(force_bytes, order))
}

fn read_vectors(bytes: &[u8], order: PayloadOrder) -> Vec<Vec3> {
    bytes
        .chunks_exact(TUPLE_SIZE)
        .map(|tuple| {
            let component =
                |i: usize| order.read_f32([tuple[4 * i], tuple[4 * i + 1], tuple[4 * i + 2], tuple[4 * i + 3]]);
            [component(0), component(1), component(2)]
        })
        .collect()
}

/// Reads until `buffer` is full, the peer closes, or a non-retryable error
/// occurs. Returns the number of bytes read.
pub fn read_multiple<R: Read>(reader: &mut R, buffer: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    filled
}

/// Reads one header; a short read becomes an `IoError` header.
pub fn read_header<R: Read>(reader: &mut R) -> Header {
    let mut bytes = [0u8; HEADER_SIZE];
    if read_multiple(reader, &mut bytes) != HEADER_SIZE {
        return Header::io_error();
    }
    decode_header(&bytes)
}

/// Reads exactly `len` payload bytes or fails with [`CodecError::ShortRead`].
pub fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, CodecError> {
    let mut buffer = vec![0u8; len];
    let got = read_multiple(reader, &mut buffer);
    if got != len {
        return Err(CodecError::ShortRead { expected: len, got });
    }
    Ok(buffer)
}

/// Reads the payload of a force message whose header announced `count`.
/// Counts above `max` are rejected before anything is read or allocated.
pub fn read_forces<R: Read>(
    reader: &mut R,
    count: i32,
    max: usize,
    order: PayloadOrder,
) -> Result<ForceBatch, CodecError> {
    let count = usize::try_from(count).map_err(|_| CodecError::NegativeCount(count))?;
    if count > max {
        return Err(CodecError::TooManyEntries { count, max });
    }
    let payload = read_payload(reader, forces_payload_size(count))?;
    decode_forces(&payload, count, order)
}

pub fn write_message<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes)?;
    writer.flush()
}
