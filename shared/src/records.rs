//! Payload records exchanged with the client.

use crate::codec::CodecError;
use crate::Vec3;
use serde::{Deserialize, Serialize};

/// Number of bytes an [`EnergyRecord`] occupies on the wire.
pub const ENERGY_RECORD_SIZE: usize = 40;

/// Energy summary sent ahead of every position batch.
///
/// Field order is the wire order: the step as a 4-byte integer followed by
/// nine 4-byte floats.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub step: i32,
    pub temperature: f32,
    pub total: f32,
    pub potential: f32,
    pub van_der_waals: f32,
    pub coulomb: f32,
    pub bonds: f32,
    pub angles: f32,
    pub dihedrals: f32,
    pub impropers: f32,
}

impl EnergyRecord {
    /// The floating point fields in wire order.
    pub fn terms(&self) -> [f32; 9] {
        [
            self.temperature,
            self.total,
            self.potential,
            self.van_der_waals,
            self.coulomb,
            self.bonds,
            self.angles,
            self.dihedrals,
            self.impropers,
        ]
    }

    pub fn from_terms(step: i32, terms: [f32; 9]) -> Self {
        Self {
            step,
            temperature: terms[0],
            total: terms[1],
            potential: terms[2],
            van_der_waals: terms[3],
            coulomb: terms[4],
            bonds: terms[5],
            angles: terms[6],
            dihedrals: terms[7],
            impropers: terms[8],
        }
    }
}

/// Externally injected forces: positions in the tracked atom list paired
/// with one force vector each.
///
/// The two arrays always have the same length; a batch is only ever
/// replaced as a whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawForceBatch")]
pub struct ForceBatch {
    indices: Vec<i32>,
    forces: Vec<Vec3>,
}

#[derive(Deserialize)]
struct RawForceBatch {
    indices: Vec<i32>,
    forces: Vec<Vec3>,
}

impl TryFrom<RawForceBatch> for ForceBatch {
    type Error = CodecError;

    fn try_from(raw: RawForceBatch) -> Result<Self, Self::Error> {
        ForceBatch::new(raw.indices, raw.forces)
    }
}

impl ForceBatch {
    pub fn new(indices: Vec<i32>, forces: Vec<Vec3>) -> Result<Self, CodecError> {
        if indices.len() != forces.len() {
            return Err(CodecError::MismatchedBatch {
                indices: indices.len(),
                forces: forces.len(),
            });
        }
        Ok(Self { indices, forces })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[i32] {
        &self.indices
    }

    pub fn forces(&self) -> &[Vec3] {
        &self.forces
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, Vec3)> + '_ {
        self.indices.iter().copied().zip(self.forces.iter().copied())
    }

    /// Copy with every force vector multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            indices: self.indices.clone(),
            forces: self
                .forces
                .iter()
                .map(|f| [f[0] * factor, f[1] * factor, f[2] * factor])
                .collect(),
        }
    }
}
