//! Toy engine for the demo binary: Brownian dynamics of harmonic bead
//! chains in a periodic cubic box.
//!
//! Each rank owns whole molecules. Positions drift freely between
//! repartition steps and are put back into the box on those steps, which
//! is what makes the coordinate assembler's image tracking necessary.

use crate::domain::{Domain, OwnedRange};
use crate::energy::EnergyTerm;
use crate::pbc::SimBox;
use imd_shared::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::ops::Range;

/// Boltzmann constant in kJ mol⁻¹ K⁻¹.
const BOLTZMANN: f64 = 0.008_314_462_618;

#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    /// Rest length of a bond (nm)
    pub bond_length: f32,
    /// Spring constant (kJ mol⁻¹ nm⁻²)
    pub spring: f32,
    /// Friction coefficient (ps⁻¹, per unit mass)
    pub friction: f32,
    pub temperature: f32,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            bond_length: 0.15,
            spring: 5000.0,
            friction: 100.0,
            temperature: 300.0,
        }
    }
}

/// Molecule ranges for `molecules` chains of `atoms_per_molecule` beads.
pub fn chain_topology(molecules: usize, atoms_per_molecule: usize) -> Vec<Range<usize>> {
    (0..molecules)
        .map(|m| m * atoms_per_molecule..(m + 1) * atoms_per_molecule)
        .collect()
}

/// Initial positions of the whole system, identical on every rank for the
/// same seed. Chains start straight along a random direction.
pub fn initial_layout(
    molecules: usize,
    atoms_per_molecule: usize,
    sim_box: &SimBox,
    params: &ChainParams,
    seed: u64,
) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Vec::with_capacity(molecules * atoms_per_molecule);
    for _ in 0..molecules {
        let start: Vec3 = [
            rng.gen_range(0.0..sim_box.vectors[0][0]),
            rng.gen_range(0.0..sim_box.vectors[1][1]),
            rng.gen_range(0.0..sim_box.vectors[2][2]),
        ];
        let mut direction: Vec3 = [
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        ];
        let norm = direction.iter().map(|c| c * c).sum::<f32>().sqrt().max(1e-6);
        direction.iter_mut().for_each(|c| *c /= norm);

        for bead in 0..atoms_per_molecule {
            let offset = bead as f32 * params.bond_length;
            x.push([
                start[0] + offset * direction[0],
                start[1] + offset * direction[1],
                start[2] + offset * direction[2],
            ]);
        }
    }
    x
}

/// The part of the system owned by one rank.
pub struct ChainSystem {
    pub domain: OwnedRange,
    pub positions: Vec<Vec3>,
    pub forces: Vec<Vec3>,
    atoms_per_molecule: usize,
    sim_box: SimBox,
    params: ChainParams,
    rng: StdRng,
}

impl ChainSystem {
    /// Takes this rank's slice of `layout`. `domain` must start and end on
    /// molecule boundaries.
    pub fn new(
        layout: &[Vec3],
        domain: OwnedRange,
        atoms_per_molecule: usize,
        sim_box: SimBox,
        params: ChainParams,
        seed: u64,
    ) -> Self {
        let positions = layout[domain.range.clone()].to_vec();
        let count = positions.len();
        Self {
            rng: StdRng::seed_from_u64(seed ^ domain.range.start as u64),
            domain,
            positions,
            forces: vec![[0.0; 3]; count],
            atoms_per_molecule: atoms_per_molecule.max(1),
            sim_box,
            params,
        }
    }

    /// Bond vector from `a` to the nearest image of `b`.
    fn bond(&self, a: Vec3, b: Vec3) -> Vec3 {
        let mut image = b;
        self.sim_box
            .apply_shift(&mut image, self.sim_box.image_towards(b, a));
        [image[0] - a[0], image[1] - a[1], image[2] - a[2]]
    }

    /// Recomputes the bond forces and returns the local bond energy.
    pub fn compute_forces(&mut self) -> f64 {
        self.forces.iter_mut().for_each(|f| *f = [0.0; 3]);
        let mut energy = 0.0f64;

        for start in (0..self.positions.len()).step_by(self.atoms_per_molecule) {
            let end = (start + self.atoms_per_molecule).min(self.positions.len());
            for i in start..end.saturating_sub(1) {
                let d = self.bond(self.positions[i], self.positions[i + 1]);
                let r = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
                if r < 1e-9 {
                    continue;
                }
                let stretch = r - self.params.bond_length;
                energy += 0.5 * f64::from(self.params.spring) * f64::from(stretch * stretch);
                let magnitude = self.params.spring * stretch / r;
                for m in 0..3 {
                    self.forces[i][m] += magnitude * d[m];
                    self.forces[i + 1][m] -= magnitude * d[m];
                }
            }
        }
        energy
    }

    /// One overdamped Langevin step of length `dt` (ps).
    pub fn integrate(&mut self, dt: f32) {
        let kt = (BOLTZMANN * f64::from(self.params.temperature)) as f32;
        let mobility = 1.0 / self.params.friction;
        // Uniform noise on [-1, 1) scaled to unit variance.
        let noise = (2.0 * kt * mobility * dt).sqrt() * 3.0f32.sqrt();

        for (x, f) in self.positions.iter_mut().zip(&self.forces) {
            for m in 0..3 {
                x[m] += mobility * f[m] * dt + noise * self.rng.gen_range(-1.0f32..1.0);
            }
        }
    }

    /// Puts every atom back into the central box.
    pub fn wrap(&mut self) {
        for x in &mut self.positions {
            self.sim_box.wrap(x);
        }
    }

    pub fn sim_box(&self) -> &SimBox {
        &self.sim_box
    }

    pub fn owns(&self, global: usize) -> bool {
        self.domain.local_index(global).is_some()
    }
}

/// Energy terms reported to the client for a summed bond energy.
pub fn energy_terms(bonds: f64, temperature: f32) -> HashMap<EnergyTerm, f64> {
    [
        (EnergyTerm::Temperature, f64::from(temperature)),
        (EnergyTerm::Bonds, bonds),
        (EnergyTerm::Potential, bonds),
        (EnergyTerm::Total, bonds),
    ]
    .into_iter()
    .collect()
}
