//! Collects the tracked atoms' positions on the coordinator and keeps the
//! molecules whole across periodic boundaries.

use crate::domain::Domain;
use crate::error::{GroupError, ImdError};
use crate::group::GroupComm;
use crate::pbc::{IVec3, SimBox};
use imd_shared::Vec3;
use std::ops::Range;

/// Molecules expressed as ranges into the tracked atom list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoleculeGrouping {
    bounds: Vec<Range<usize>>,
}

impl MoleculeGrouping {
    /// Keeps the molecules that have at least one tracked atom. `tracked`
    /// must be sorted, so every molecule maps onto a contiguous range.
    pub fn from_topology(tracked: &[usize], molecules: &[Range<usize>]) -> Self {
        let bounds = molecules
            .iter()
            .map(|molecule| {
                let start = tracked.partition_point(|&g| g < molecule.start);
                let end = tracked.partition_point(|&g| g < molecule.end);
                start..end
            })
            .filter(|slots| !slots.is_empty())
            .collect();
        Self { bounds }
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// Shift that moves a molecule back towards the central cell without
/// tearing it apart: per axis, only the part all atoms have in common.
pub fn molecule_shift(shifts: &[IVec3]) -> IVec3 {
    let mut shift = [0; 3];
    let Some(first) = shifts.first() else {
        return shift;
    };
    let mut smallest = *first;
    let mut largest = *first;
    for s in &shifts[1..] {
        for d in 0..3 {
            smallest[d] = smallest[d].min(s[d]);
            largest[d] = largest[d].max(s[d]);
        }
    }
    for d in 0..3 {
        if smallest[d] > 0 {
            shift[d] = smallest[d];
        }
        if largest[d] < 0 {
            shift[d] = largest[d];
        }
    }
    shift
}

pub struct CoordinateAssembler {
    tracked: Vec<usize>,
    molecules: MoleculeGrouping,
    positions: Vec<Vec3>,
    shifts: Vec<IVec3>,
    reference: Vec<Vec3>,
}

impl CoordinateAssembler {
    pub fn new(tracked: Vec<usize>, molecules: MoleculeGrouping) -> Self {
        let count = tracked.len();
        Self {
            tracked,
            molecules,
            positions: vec![[0.0; 3]; count],
            shifts: vec![[0; 3]; count],
            reference: vec![[0.0; 3]; count],
        }
    }

    /// Assembled positions in tracked order; only meaningful on the coordinator.
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn shifts(&self) -> &[IVec3] {
        &self.shifts
    }

    /// Every rank sends (tracked slot, position) for the atoms it owns.
    fn collect<G, D>(&mut self, group: &mut G, x_local: &[Vec3], domain: &D) -> Result<bool, ImdError>
    where
        G: GroupComm,
        D: Domain + ?Sized,
    {
        let local: Vec<(u32, Vec3)> = self
            .tracked
            .iter()
            .enumerate()
            .filter_map(|(slot, &global)| {
                let l = domain.local_index(global)?;
                x_local.get(l).map(|x| (slot as u32, *x))
            })
            .collect();

        let Some(parts) = group.gather(local)? else {
            return Ok(false);
        };

        let mut seen = 0;
        for (slot, x) in parts.into_iter().flatten() {
            if let Some(target) = self.positions.get_mut(slot as usize) {
                *target = x;
                seen += 1;
            }
        }
        if seen != self.positions.len() {
            return Err(GroupError::LengthMismatch {
                expected: self.positions.len(),
                got: seen,
            }
            .into());
        }
        Ok(true)
    }

    /// First gather of the run; the configuration is taken as whole and
    /// becomes the reference for later image tracking.
    pub fn initialize<G, D>(&mut self, group: &mut G, x_local: &[Vec3], domain: &D) -> Result<(), ImdError>
    where
        G: GroupComm,
        D: Domain + ?Sized,
    {
        if self.collect(group, x_local, domain)? {
            self.reference.clone_from(&self.positions);
            self.shifts.iter_mut().for_each(|s| *s = [0; 3]);
        }
        Ok(())
    }

    /// Gathers the current positions and makes them continuous with the
    /// reference. On repartition steps atoms may have been wrapped anew, so
    /// their image shifts are re-derived and the reference is refreshed.
    pub fn gather<G, D>(
        &mut self,
        group: &mut G,
        x_local: &[Vec3],
        domain: &D,
        sim_box: &SimBox,
        repartition: bool,
    ) -> Result<(), ImdError>
    where
        G: GroupComm,
        D: Domain + ?Sized,
    {
        if !self.collect(group, x_local, domain)? {
            return Ok(());
        }

        for i in 0..self.positions.len() {
            let raw = self.positions[i];
            if repartition {
                let mut candidate = raw;
                sim_box.apply_shift(&mut candidate, self.shifts[i]);
                let extra = sim_box.image_towards(candidate, self.reference[i]);
                for d in 0..3 {
                    self.shifts[i][d] += extra[d];
                }
            }
            let mut whole = raw;
            sim_box.apply_shift(&mut whole, self.shifts[i]);
            self.positions[i] = whole;
            if repartition {
                self.reference[i] = whole;
            }
        }
        Ok(())
    }

    /// Moves every molecule that drifted out of the central cell back in
    /// as one piece.
    pub fn remove_molecule_shifts(&mut self, sim_box: &SimBox) {
        for range in self.molecules.ranges() {
            let Some(shifts) = self.shifts.get(range.clone()) else {
                continue;
            };
            let shift = molecule_shift(shifts);
            if shift == [0; 3] {
                continue;
            }
            for x in &mut self.positions[range.clone()] {
                sim_box.remove_shift(x, shift);
            }
        }
    }
}
