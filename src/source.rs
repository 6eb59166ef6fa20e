// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::core::{Grid, TravelTimeField, VelocityModel};
use crate::error::{EikonalError, Result};

/// Relative offset (in units of grid spacing) below which a source is
/// considered to sit exactly on a node.
const ON_NODE_TOLERANCE: f64 = 1e-9;

/// What the initializer wrote for one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedSummary {
    /// Grid node nearest to the source.
    pub nearest: [usize; 3],
    /// Number of nodes given an analytic travel time.
    pub seeded: usize,
    /// Flat index of the node pinned to zero, when the source lies on a node.
    pub frozen: Option<usize>,
}

/// Seeds the neighborhood of a point source with straight-ray travel times.
///
/// The finite-difference stencil is inaccurate near the source, where the
/// front is strongly curved. Every node within `eps` grid nodes (Euclidean
/// index distance) of the source's nearest node gets the straight-line
/// distance to the source divided by the velocity at that node.
pub struct SourceInitializer<'a> {
    grid: &'a Grid,
    velocity: &'a VelocityModel,
    eps: f64,
}

impl<'a> SourceInitializer<'a> {
    /// Create an initializer with a near-source radius of `eps` nodes.
    pub fn new(grid: &'a Grid, velocity: &'a VelocityModel, eps: f64) -> Self {
        SourceInitializer {
            grid,
            velocity,
            eps,
        }
    }

    /// Seed `field` around the source at physical coordinates `coord`.
    ///
    /// Nodes outside the ball are left untouched. If the source coincides with
    /// a node, that node is set to exactly zero and reported as frozen.
    ///
    /// # Errors
    /// Returns `SourceOutOfBounds` if `coord` lies outside the grid extent;
    /// the field is not modified in that case.
    pub fn seed(&self, coord: [f64; 3], field: &TravelTimeField) -> Result<SeedSummary> {
        if let Some(axis) = self.grid.out_of_bounds_axis(coord) {
            return Err(EikonalError::SourceOutOfBounds { coord, axis });
        }

        let dims = self.grid.dims();
        let spacing = self.grid.spacing();
        let origin = self.grid.origin();
        let nearest = self.grid.nearest_node(coord);

        let on_node = (0..3).all(|d| {
            let offset = (coord[d] - origin[d]) / spacing[d] - nearest[d] as f64;
            offset.abs() <= ON_NODE_TOLERANCE
        });

        // no ball reaches further than the widest axis
        let widest = dims.iter().copied().max().unwrap_or(0);
        let reach = self.eps.floor().min(widest as f64) as usize;
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for d in 0..3 {
            lo[d] = nearest[d].saturating_sub(reach);
            hi[d] = nearest[d].saturating_add(reach).min(dims[d] - 1);
        }

        let eps_sq = self.eps * self.eps;
        let mut seeded = 0;
        for iy in lo[2]..=hi[2] {
            for ix in lo[1]..=hi[1] {
                for iz in lo[0]..=hi[0] {
                    let idx = [iz, ix, iy];
                    let mut index_dist_sq = 0.0;
                    for d in 0..3 {
                        let di = idx[d] as f64 - nearest[d] as f64;
                        index_dist_sq += di * di;
                    }
                    if index_dist_sq > eps_sq {
                        continue;
                    }
                    let p = self.grid.node_coord(idx);
                    let dist = ((p[0] - coord[0]).powi(2)
                        + (p[1] - coord[1]).powi(2)
                        + (p[2] - coord[2]).powi(2))
                    .sqrt();
                    let t = dist / self.velocity.node_velocity(idx);
                    field.update_min(self.grid.node_index(idx), t);
                    seeded += 1;
                }
            }
        }

        let frozen = if on_node {
            let flat = self.grid.node_index(nearest);
            field.set(flat, 0.0);
            Some(flat)
        } else {
            None
        };

        Ok(SeedSummary {
            nearest,
            seeded,
            frozen,
        })
    }
}
