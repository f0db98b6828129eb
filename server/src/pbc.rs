//! Periodic box bookkeeping.
//!
//! An image shift `s` moves a position by whole box vectors:
//! `x + s[0]·a + s[1]·b + s[2]·c`. Box vectors form a lower triangular
//! matrix (`a` along x, `b` in the xy plane), as for triclinic simulation
//! cells.

use imd_shared::Vec3;

pub type IVec3 = [i32; 3];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimBox {
    /// Rows are the box vectors a, b, c.
    pub vectors: [Vec3; 3],
}

impl SimBox {
    pub fn new(vectors: [Vec3; 3]) -> Self {
        Self { vectors }
    }

    pub fn rectangular(x: f32, y: f32, z: f32) -> Self {
        Self::new([[x, 0.0, 0.0], [0.0, y, 0.0], [0.0, 0.0, z]])
    }

    pub fn cubic(edge: f32) -> Self {
        Self::rectangular(edge, edge, edge)
    }

    /// `x + shift·box`
    pub fn apply_shift(&self, x: &mut Vec3, shift: IVec3) {
        for (d, &s) in shift.iter().enumerate() {
            if s != 0 {
                for m in 0..3 {
                    x[m] += s as f32 * self.vectors[d][m];
                }
            }
        }
    }

    /// `x - shift·box`
    pub fn remove_shift(&self, x: &mut Vec3, shift: IVec3) {
        self.apply_shift(x, [-shift[0], -shift[1], -shift[2]]);
    }

    /// Integer shift bringing `x` to the periodic image nearest `reference`.
    ///
    /// Dimensions are handled from z down to x so the off-diagonal parts of
    /// the later box vectors are accounted for.
    pub fn image_towards(&self, x: Vec3, reference: Vec3) -> IVec3 {
        let mut shifted = x;
        let mut shift = [0; 3];
        for d in (0..3).rev() {
            let length = self.vectors[d][d];
            if length <= 0.0 {
                continue;
            }
            let n = ((reference[d] - shifted[d]) / length).round() as i32;
            if n != 0 {
                let mut single = [0; 3];
                single[d] = n;
                self.apply_shift(&mut shifted, single);
                shift[d] = n;
            }
        }
        shift
    }

    /// Puts `x` back into the unit cell.
    pub fn wrap(&self, x: &mut Vec3) {
        for d in (0..3).rev() {
            let length = self.vectors[d][d];
            if length <= 0.0 {
                continue;
            }
            let n = (x[d] / length).floor() as i32;
            if n != 0 {
                let mut single = [0; 3];
                single[d] = n;
                self.remove_shift(x, single);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_shift_roundtrip() {
        let sim_box = SimBox::cubic(3.0);
        let mut x = [0.5, 1.0, 2.5];
        sim_box.apply_shift(&mut x, [1, -2, 0]);
        assert_eq!(x, [3.5, -5.0, 2.5]);
        sim_box.remove_shift(&mut x, [1, -2, 0]);
        assert_eq!(x, [0.5, 1.0, 2.5]);
    }

    #[test]
    fn test_triclinic_shift_uses_full_vectors() {
        let sim_box = SimBox::new([[4.0, 0.0, 0.0], [1.0, 4.0, 0.0], [0.5, 0.5, 4.0]]);
        let mut x = [0.0, 0.0, 0.0];
        sim_box.apply_shift(&mut x, [0, 1, 1]);
        assert_eq!(x, [1.5, 4.5, 4.0]);
    }

    #[test]
    fn test_image_towards_reference() {
        let sim_box = SimBox::cubic(2.0);
        // Atom wrapped to the low side while its reference sits near the top.
        let shift = sim_box.image_towards([0.1, 1.0, 1.9], [1.95, 1.0, 0.05]);
        assert_eq!(shift, [1, 0, -1]);

        let mut x = [0.1, 1.0, 1.9];
        sim_box.apply_shift(&mut x, shift);
        assert_approx_eq!(x[0], 2.1, 1e-6);
        assert_approx_eq!(x[2], -0.1, 1e-6);
    }

    #[test]
    fn test_image_towards_triclinic() {
        let sim_box = SimBox::new([[4.0, 0.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 4.0]]);
        // Reference one b-vector away.
        let reference = [2.5, 4.2, 1.0];
        let shift = sim_box.image_towards([0.5, 0.2, 1.0], reference);
        assert_eq!(shift, [0, 1, 0]);
    }

    #[test]
    fn test_wrap_into_cell() {
        let sim_box = SimBox::cubic(2.0);
        let mut x = [-0.5, 4.5, 1.0];
        sim_box.wrap(&mut x);
        assert_approx_eq!(x[0], 1.5, 1e-6);
        assert_approx_eq!(x[1], 0.5, 1e-6);
        assert_approx_eq!(x[2], 1.0, 1e-6);
    }
}
