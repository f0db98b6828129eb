//! Energy terms as provided by the physics engine.

use imd_shared::{EnergyRecord, ENERGY_CONVERSION};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergyTerm {
    Temperature,
    Total,
    Potential,
    LennardJones,
    CoulombShortRange,
    Bonds,
    Angles,
    ProperDihedrals,
    ImproperDihedrals,
}

/// Latest energies of the engine, looked up by term.
pub trait EnergySource {
    fn energy_term(&self, term: EnergyTerm) -> f64;
}

impl EnergySource for HashMap<EnergyTerm, f64> {
    fn energy_term(&self, term: EnergyTerm) -> f64 {
        self.get(&term).copied().unwrap_or(0.0)
    }
}

/// Stamps `record` with `step` and, if new values are available, replaces
/// its terms. Without new values the previous terms stay on display.
pub fn refresh_record(record: &mut EnergyRecord, step: i64, source: Option<&dyn EnergySource>) {
    record.step = step as i32;

    let Some(source) = source else {
        return;
    };
    let term = |t: EnergyTerm| (source.energy_term(t) as f32) * ENERGY_CONVERSION;

    record.temperature = source.energy_term(EnergyTerm::Temperature) as f32;
    record.total = term(EnergyTerm::Total);
    record.potential = term(EnergyTerm::Potential);
    record.van_der_waals = term(EnergyTerm::LennardJones);
    record.coulomb = term(EnergyTerm::CoulombShortRange);
    record.bonds = term(EnergyTerm::Bonds);
    record.angles = term(EnergyTerm::Angles);
    record.dihedrals = term(EnergyTerm::ProperDihedrals);
    record.impropers = term(EnergyTerm::ImproperDihedrals);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HashMap<EnergyTerm, f64> {
        [
            (EnergyTerm::Temperature, 300.0),
            (EnergyTerm::Total, -120.0),
            (EnergyTerm::Potential, -150.0),
            (EnergyTerm::LennardJones, -40.0),
            (EnergyTerm::CoulombShortRange, -130.0),
            (EnergyTerm::Bonds, 20.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_refresh_with_new_values() {
        let mut record = EnergyRecord::default();
        let energies = sample();
        refresh_record(&mut record, 40, Some(&energies));

        assert_eq!(record.step, 40);
        assert_eq!(record.temperature, 300.0);
        assert_eq!(record.potential, -150.0);
        assert_eq!(record.coulomb, -130.0);
        assert_eq!(record.bonds, 20.0);
        assert_eq!(record.angles, 0.0);
    }

    #[test]
    fn test_refresh_without_values_keeps_previous_terms() {
        let mut record = EnergyRecord::default();
        let energies = sample();
        refresh_record(&mut record, 10, Some(&energies));
        refresh_record(&mut record, 11, None);

        assert_eq!(record.step, 11);
        assert_eq!(record.temperature, 300.0);
        assert_eq!(record.total, -120.0);
    }
}
