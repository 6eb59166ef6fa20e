// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::core::{Grid, TravelTimeField, VelocityModel};

/// Solve the one-axis update: the front arrives from a single neighbor.
#[inline]
pub fn solve_1d(a: f64, h: f64, s: f64) -> f64 {
    a + s * h
}

/// Solve the coupled update `sum(((u - a_i) / h_i)^2) = s^2` over the given
/// neighbor values and spacings.
///
/// Returns `None` if the discriminant is negative or the root is not causal,
/// i.e. does not lie at or above every neighbor value used.
pub fn solve_coupled(a: &[f64], h: &[f64], s: f64) -> Option<f64> {
    debug_assert_eq!(a.len(), h.len());
    // Work relative to the smallest neighbor to keep the discriminant well
    // conditioned when travel times are large compared to s*h.
    let a_ref = a.iter().cloned().fold(f64::INFINITY, f64::min);
    let mut qa = 0.0;
    let mut qb = 0.0;
    let mut qc = -s * s;
    let mut a_max = f64::NEG_INFINITY;
    for (&ai, &hi) in a.iter().zip(h) {
        let w = 1.0 / (hi * hi);
        let b = ai - a_ref;
        qa += w;
        qb += b * w;
        qc += b * b * w;
        a_max = a_max.max(ai);
    }
    // qa*v^2 - 2*qb*v + qc = 0 with v = u - a_ref
    let disc = qb * qb - qa * qc;
    if disc < 0.0 {
        return None;
    }
    let u = a_ref + (qb + disc.sqrt()) / qa;
    if u >= a_max {
        Some(u)
    } else {
        None
    }
}

/// Solve the 3D Godunov upwind update at one node.
///
/// `a` holds the upwind (smaller) neighbor value along each axis, `+inf`
/// where no neighbor has been reached; `h` is the spacing per axis and `s` the
/// local slowness. Every non-empty subset of the finite axes is tried and the
/// smallest causal root is returned, which is the unique solution of
/// `sum(max(u - a_i, 0)^2 / h_i^2) = s^2`. A three-axis solution falls back to
/// two axes and then to one; one-axis roots are always causal.
pub fn solve_3d(a: [f64; 3], h: [f64; 3], s: f64) -> f64 {
    let mut best = f64::INFINITY;
    for mask in 1u8..8 {
        let mut vals = [0.0; 3];
        let mut hs = [0.0; 3];
        let mut n = 0;
        let mut usable = true;
        for d in 0..3 {
            if mask & (1 << d) != 0 {
                if !a[d].is_finite() {
                    usable = false;
                    break;
                }
                vals[n] = a[d];
                hs[n] = h[d];
                n += 1;
            }
        }
        if !usable {
            continue;
        }
        let u = if n == 1 {
            Some(solve_1d(vals[0], hs[0], s))
        } else {
            solve_coupled(&vals[..n], &hs[..n], s)
        };
        if let Some(u) = u {
            if u < best {
                best = u;
            }
        }
    }
    best
}

/// Finite-difference update rule for one node of a travel time field.
///
/// Borrows the grid, the slowness model and the field being refined; the same
/// stencil can be shared by every worker of a sweep.
pub struct EikonalStencil<'a> {
    grid: &'a Grid,
    velocity: &'a VelocityModel,
    field: &'a TravelTimeField,
}

impl<'a> EikonalStencil<'a> {
    /// Create a stencil over `field`.
    pub fn new(grid: &'a Grid, velocity: &'a VelocityModel, field: &'a TravelTimeField) -> Self {
        EikonalStencil {
            grid,
            velocity,
            field,
        }
    }

    /// Compute the candidate travel time at `idx` from its current neighbors
    /// without writing it.
    ///
    /// For each axis the smaller of the two neighbors is taken as the upwind
    /// value (missing neighbors at faces count as `+inf`). The slowness is that
    /// of the cell spanned by the node and its upwind neighbors.
    pub fn candidate(&self, idx: [usize; 3]) -> f64 {
        let dims = self.grid.dims();
        let h = self.grid.spacing();
        let mut a = [f64::INFINITY; 3];
        let mut cell = [0usize; 3];

        for d in 0..3 {
            let mut lo = idx;
            let mut hi = idx;
            let u_lo = if idx[d] > 0 {
                lo[d] -= 1;
                self.field.get_at(lo)
            } else {
                f64::INFINITY
            };
            let u_hi = if idx[d] + 1 < dims[d] {
                hi[d] += 1;
                self.field.get_at(hi)
            } else {
                f64::INFINITY
            };
            // ties, including two unreached neighbors, take the low side
            if u_lo <= u_hi {
                a[d] = u_lo;
                cell[d] = idx[d].saturating_sub(1);
            } else {
                a[d] = u_hi;
                cell[d] = idx[d];
            }
            cell[d] = cell[d].min(dims[d] - 2);
        }

        if a.iter().all(|v| v.is_infinite()) {
            return f64::INFINITY;
        }
        solve_3d(a, h, self.velocity.slowness_at(cell))
    }

    /// Relax the node at `idx`: lower its value to the candidate if smaller.
    ///
    /// Returns the decrease, or 0 when the node did not change.
    #[inline]
    pub fn relax(&self, idx: [usize; 3]) -> f64 {
        let flat = self.grid.node_index(idx);
        let old = self.field.get(flat);
        let new_val = self.candidate(idx);
        if new_val < old && self.field.update_min(flat, new_val) {
            if old.is_finite() {
                old - new_val
            } else {
                new_val
            }
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const H1: [f64; 3] = [1.0, 1.0, 1.0];

    #[test]
    fn solve_3d_all_axes() {
        // 3u^2 = 1 -> u = 1/sqrt(3)
        let u = solve_3d([0.0, 0.0, 0.0], H1, 1.0);
        assert!((u - 1.0 / 3.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn solve_3d_two_axis_fallback() {
        // third neighbor too late to contribute
        let u = solve_3d([0.0, 0.0, 100.0], H1, 1.0);
        assert!((u - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn solve_3d_one_axis_fallback() {
        let u = solve_3d([0.0, 100.0, 200.0], H1, 1.0);
        assert!((u - 1.0).abs() < 1e-12);
    }

    #[test]
    fn solve_3d_ignores_unreached_axes() {
        let u = solve_3d([f64::INFINITY, 0.0, 0.0], H1, 1.0);
        assert!((u - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        let u = solve_3d([f64::INFINITY, f64::INFINITY, 5.0], H1, 2.0);
        assert!((u - 7.0).abs() < 1e-12);
        assert!(solve_3d([f64::INFINITY; 3], H1, 1.0).is_infinite());
    }

    #[test]
    fn solve_3d_anisotropic_spacing() {
        // Plane wave along x through spacing 2: exact one-axis update.
        let u = solve_3d([f64::INFINITY, 4.0, f64::INFINITY], [1.0, 2.0, 0.5], 0.5);
        assert!((u - 5.0).abs() < 1e-12);

        // Planar front T = p.x with p = (0.3, 0.4, 0) and s = 0.5 is exact.
        let h = [0.5, 2.0, 1.0];
        let a = [10.0 - 0.3 * h[0], 10.0 - 0.4 * h[1], f64::INFINITY];
        let u = solve_3d(a, h, 0.5);
        assert!((u - 10.0).abs() < 1e-10, "u = {}", u);
    }

    #[test]
    fn solve_coupled_rejects_non_causal_root() {
        assert!(solve_coupled(&[0.0, 100.0], &[1.0, 1.0], 1.0).is_none());
        assert!(solve_coupled(&[0.0, 0.0], &[1.0, 1.0], 1.0).is_some());
    }

    #[test]
    fn candidate_uses_one_sided_stencil_at_faces() {
        let grid = Grid::new([5, 5, 5], H1, [0.0; 3]).unwrap();
        let vel = VelocityModel::homogeneous(&grid, 1.0).unwrap();
        let field = TravelTimeField::new(&grid);
        field.set(grid.node_index([0, 0, 0]), 0.0);
        let stencil = EikonalStencil::new(&grid, &vel, &field);

        assert!((stencil.candidate([1, 0, 0]) - 1.0).abs() < 1e-12);
        assert!((stencil.candidate([0, 0, 1]) - 1.0).abs() < 1e-12);
        // diagonal neighbor has no reached axis neighbor yet
        assert!(stencil.candidate([1, 1, 0]).is_infinite());
    }

    #[test]
    fn candidate_reads_upwind_cell_slowness() {
        let grid = Grid::new([3, 3, 3], H1, [0.0; 3]).unwrap();
        // cells with iz == 1 are twice as slow
        let cells: Vec<f64> = (0..8)
            .map(|c| if grid.cell_triple(c)[0] == 1 { 0.5 } else { 1.0 })
            .collect();
        let vel = VelocityModel::new(&grid, &cells, crate::core::VelocityKind::Cell).unwrap();
        let field = TravelTimeField::new(&grid);
        field.set(grid.node_index([1, 0, 0]), 0.0);
        let stencil = EikonalStencil::new(&grid, &vel, &field);

        // from (1,0,0) down to (2,0,0) crosses the slow cell
        assert!((stencil.candidate([2, 0, 0]) - 2.0).abs() < 1e-12);
        // up to (0,0,0) crosses the fast cell
        assert!((stencil.candidate([0, 0, 0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn relax_never_increases() {
        let grid = Grid::new([3, 3, 3], H1, [0.0; 3]).unwrap();
        let vel = VelocityModel::homogeneous(&grid, 1.0).unwrap();
        let field = TravelTimeField::new(&grid);
        field.set(grid.node_index([1, 1, 1]), 0.0);
        field.set(grid.node_index([1, 1, 0]), 0.25);
        let stencil = EikonalStencil::new(&grid, &vel, &field);

        assert_eq!(stencil.relax([1, 1, 0]), 0.0);
        assert_eq!(field.get_at([1, 1, 0]), 0.25);

        // unreached node reports its new value as the change
        let change = stencil.relax([1, 0, 1]);
        assert!((change - 1.0).abs() < 1e-12);
        assert!((field.get_at([1, 0, 1]) - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn solve_3d_is_causal_and_finite(
            a in prop::array::uniform3(0.0f64..100.0),
            h in prop::array::uniform3(0.01f64..10.0),
            s in 1e-4f64..10.0,
        ) {
            let u = solve_3d(a, h, s);
            prop_assert!(u.is_finite());
            let a_min = a.iter().cloned().fold(f64::INFINITY, f64::min);
            prop_assert!(u >= a_min);
            // never worse than the best single-axis arrival
            let best_1d = (0..3).map(|d| a[d] + s * h[d]).fold(f64::INFINITY, f64::min);
            prop_assert!(u <= best_1d + 1e-9 * best_1d.max(1.0));
        }

        #[test]
        fn solve_3d_satisfies_godunov_equation(
            a in prop::array::uniform3(0.0f64..10.0),
            s in 0.1f64..5.0,
        ) {
            let u = solve_3d(a, H1, s);
            let lhs: f64 = a.iter().map(|&ai| (u - ai).max(0.0).powi(2)).sum();
            prop_assert!((lhs - s * s).abs() < 1e-8 * (1.0 + s * s));
        }
    }
}
