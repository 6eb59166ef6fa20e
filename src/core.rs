// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Grid geometry, velocity model and travel time storage.
//!
//! Every flat array in this crate uses a single zero-based traversal order:
//! the index triple `(iz, ix, iy)` maps to `iz + nz * (ix + nx * iy)`, so z
//! varies fastest and y slowest. Cells use the same order with
//! `(nz - 1, nx - 1, ny - 1)` as their dimensions. Coordinates are always
//! given in `(z, x, y)` order.

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::Array3;

use crate::error::{EikonalError, Result};

/// Axis labels in storage order.
pub const AXIS_NAMES: [&str; 3] = ["z", "x", "y"];

/// Minimum number of nodes along each axis.
pub const MIN_NODES_PER_AXIS: usize = 3;

/// Immutable description of a regular 3D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    dims: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
}

impl Grid {
    /// Create a grid from node counts, spacing and origin, all in (z, x, y) order.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` if any axis has fewer than 3 nodes, a spacing
    /// that is not positive and finite, or a non-finite origin.
    pub fn new(dims: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        for axis in 0..3 {
            if dims[axis] < MIN_NODES_PER_AXIS {
                return Err(EikonalError::InvalidGeometry {
                    axis,
                    reason: format!(
                        "dimension {} is below the minimum of {}",
                        dims[axis], MIN_NODES_PER_AXIS
                    ),
                });
            }
            if !spacing[axis].is_finite() || spacing[axis] <= 0.0 {
                return Err(EikonalError::InvalidGeometry {
                    axis,
                    reason: format!(
                        "spacing {} must be positive and finite",
                        spacing[axis]
                    ),
                });
            }
            if !origin[axis].is_finite() {
                return Err(EikonalError::InvalidGeometry {
                    axis,
                    reason: format!("origin {} must be finite", origin[axis]),
                });
            }
        }
        Ok(Grid {
            dims,
            spacing,
            origin,
        })
    }

    /// Create a grid from the scalar parameter list used by external callers.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        nz: usize,
        nx: usize,
        ny: usize,
        dz: f64,
        dx: f64,
        dy: f64,
        z0: f64,
        x0: f64,
        y0: f64,
    ) -> Result<Self> {
        Grid::new([nz, nx, ny], [dz, dx, dy], [z0, x0, y0])
    }

    /// Node counts along (z, x, y).
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Cell counts along (z, x, y).
    pub fn cell_dims(&self) -> [usize; 3] {
        [self.dims[0] - 1, self.dims[1] - 1, self.dims[2] - 1]
    }

    /// Grid spacing along (z, x, y).
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// Physical position of node (0, 0, 0).
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Total number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.dims.iter().product()
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> usize {
        self.cell_dims().iter().product()
    }

    /// Flat index of a node triple.
    #[inline]
    pub fn node_index(&self, idx: [usize; 3]) -> usize {
        idx[0] + self.dims[0] * (idx[1] + self.dims[1] * idx[2])
    }

    /// Node triple of a flat index.
    #[inline]
    pub fn node_triple(&self, flat: usize) -> [usize; 3] {
        let iz = flat % self.dims[0];
        let rest = flat / self.dims[0];
        [iz, rest % self.dims[1], rest / self.dims[1]]
    }

    /// Flat index of a cell triple.
    #[inline]
    pub fn cell_index(&self, idx: [usize; 3]) -> usize {
        let c = self.cell_dims();
        idx[0] + c[0] * (idx[1] + c[1] * idx[2])
    }

    /// Cell triple of a flat cell index.
    #[inline]
    pub fn cell_triple(&self, flat: usize) -> [usize; 3] {
        let c = self.cell_dims();
        let iz = flat % c[0];
        let rest = flat / c[0];
        [iz, rest % c[1], rest / c[1]]
    }

    /// Physical coordinates of a node.
    pub fn node_coord(&self, idx: [usize; 3]) -> [f64; 3] {
        let mut p = [0.0; 3];
        for d in 0..3 {
            p[d] = self.origin[d] + idx[d] as f64 * self.spacing[d];
        }
        p
    }

    /// Physical extent `[lo, hi]` along one axis.
    pub fn extent(&self, axis: usize) -> (f64, f64) {
        let lo = self.origin[axis];
        (lo, lo + (self.dims[axis] - 1) as f64 * self.spacing[axis])
    }

    /// First axis on which `coord` falls outside the grid, if any.
    /// Non-finite coordinates are always out of bounds.
    pub fn out_of_bounds_axis(&self, coord: [f64; 3]) -> Option<usize> {
        (0..3).find(|&d| {
            let (lo, hi) = self.extent(d);
            !coord[d].is_finite() || coord[d] < lo || coord[d] > hi
        })
    }

    /// Nearest node to a physical coordinate, clamped into the grid.
    pub fn nearest_node(&self, coord: [f64; 3]) -> [usize; 3] {
        let mut idx = [0usize; 3];
        for d in 0..3 {
            let t = ((coord[d] - self.origin[d]) / self.spacing[d]).round();
            idx[d] = t.clamp(0.0, (self.dims[d] - 1) as f64) as usize;
        }
        idx
    }
}

/// How a velocity array is sampled on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityKind {
    /// One value per cell (the native representation).
    Cell,
    /// One value per node; averaged onto cells on input.
    Nodal,
}

impl VelocityKind {
    /// Infer the kind from an array length, as callers that cannot tag their
    /// input expect: cell count means `Cell`, node count means `Nodal`.
    ///
    /// # Errors
    /// Returns `SizeMismatch` if `len` matches neither count.
    pub fn infer(len: usize, grid: &Grid) -> Result<Self> {
        if len == grid.num_cells() {
            Ok(VelocityKind::Cell)
        } else if len == grid.num_nodes() {
            Ok(VelocityKind::Nodal)
        } else {
            Err(EikonalError::SizeMismatch {
                what: "velocity",
                expected: vec![grid.num_cells(), grid.num_nodes()],
                got: len,
            })
        }
    }

    fn expected_len(self, grid: &Grid) -> usize {
        match self {
            VelocityKind::Cell => grid.num_cells(),
            VelocityKind::Nodal => grid.num_nodes(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            VelocityKind::Cell => "cell velocity",
            VelocityKind::Nodal => "nodal velocity",
        }
    }
}

/// Cell-centered velocity model with its derived slowness.
#[derive(Debug, Clone)]
pub struct VelocityModel {
    cell_dims: [usize; 3],
    velocity: Box<[f64]>,
    slowness: Box<[f64]>,
}

impl VelocityModel {
    /// Build a velocity model from a flat array in the declared order.
    ///
    /// Nodal input is converted to cells by taking the arithmetic mean of the
    /// eight corner nodes of every cell.
    ///
    /// # Errors
    /// Returns `SizeMismatch` if the length does not match the count implied by
    /// `kind`, or `InvalidVelocity` for the first value that is not positive
    /// and finite.
    pub fn new(grid: &Grid, values: &[f64], kind: VelocityKind) -> Result<Self> {
        let expected = kind.expected_len(grid);
        if values.len() != expected {
            return Err(EikonalError::SizeMismatch {
                what: kind.label(),
                expected: vec![expected],
                got: values.len(),
            });
        }
        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v <= 0.0)
        {
            return Err(EikonalError::InvalidVelocity { index, value });
        }

        let velocity: Vec<f64> = match kind {
            VelocityKind::Cell => values.to_vec(),
            VelocityKind::Nodal => (0..grid.num_cells())
                .map(|c| {
                    let [iz, ix, iy] = grid.cell_triple(c);
                    let mut sum = 0.0;
                    for corner in 0..8 {
                        let node = [
                            iz + (corner & 1),
                            ix + ((corner >> 1) & 1),
                            iy + ((corner >> 2) & 1),
                        ];
                        sum += values[grid.node_index(node)];
                    }
                    sum / 8.0
                })
                .collect(),
        };
        let slowness: Vec<f64> = velocity.iter().map(|v| 1.0 / v).collect();

        Ok(VelocityModel {
            cell_dims: grid.cell_dims(),
            velocity: velocity.into_boxed_slice(),
            slowness: slowness.into_boxed_slice(),
        })
    }

    /// Build a constant-velocity model.
    pub fn homogeneous(grid: &Grid, velocity: f64) -> Result<Self> {
        VelocityModel::new(grid, &vec![velocity; grid.num_cells()], VelocityKind::Cell)
    }

    /// Cell velocities in the declared order.
    pub fn cell_velocity(&self) -> &[f64] {
        &self.velocity
    }

    /// Cell slowness (reciprocal velocity) in the declared order.
    pub fn cell_slowness(&self) -> &[f64] {
        &self.slowness
    }

    /// Slowness of one cell.
    #[inline]
    pub fn slowness_at(&self, cell: [usize; 3]) -> f64 {
        let c = self.cell_dims;
        self.slowness[cell[0] + c[0] * (cell[1] + c[1] * cell[2])]
    }

    /// Velocity at a node: the mean of the (one to eight) cells touching it.
    pub fn node_velocity(&self, node: [usize; 3]) -> f64 {
        let c = self.cell_dims;
        let range = |d: usize| node[d].saturating_sub(1)..=node[d].min(c[d] - 1);
        let mut sum = 0.0;
        let mut count = 0usize;
        for cy in range(2) {
            for cx in range(1) {
                for cz in range(0) {
                    sum += self.velocity[cz + c[0] * (cx + c[1] * cy)];
                    count += 1;
                }
            }
        }
        sum / count as f64
    }

    /// Copy the cell velocities into an array of shape `(ny-1, nx-1, nz-1)`
    /// whose standard layout matches the declared order.
    pub fn to_array(&self) -> Array3<f64> {
        let [cz, cx, cy] = self.cell_dims;
        Array3::from_shape_fn((cy, cx, cz), |(iy, ix, iz)| {
            self.velocity[iz + cz * (ix + cx * iy)]
        })
    }
}

/// Selects node- or cell-based travel time output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One value per grid node.
    Node,
    /// One value per cell: the mean of its eight corner nodes.
    Cell,
}

/// Travel times at every node, refined in place by the sweeps.
///
/// Values are stored as `f64` bit patterns in atomics so that a shared
/// reference can be written from several threads. The only writes are seeding
/// (`set`) and the monotone `update_min`.
pub struct TravelTimeField {
    dims: [usize; 3],
    values: Box<[AtomicU64]>,
}

impl TravelTimeField {
    /// Value of a node that has not been reached yet.
    pub const UNREACHED: f64 = f64::INFINITY;

    /// Allocate a field for `grid` with every node unreached.
    pub fn new(grid: &Grid) -> Self {
        let values: Box<[AtomicU64]> = (0..grid.num_nodes())
            .map(|_| AtomicU64::new(Self::UNREACHED.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        TravelTimeField {
            dims: grid.dims(),
            values,
        }
    }

    /// Node counts along (z, x, y).
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the field has no nodes (never true for a valid grid).
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Travel time at a flat node index.
    #[inline]
    pub fn get(&self, flat: usize) -> f64 {
        f64::from_bits(self.values[flat].load(Ordering::Relaxed))
    }

    /// Travel time at a node triple.
    #[inline]
    pub fn get_at(&self, idx: [usize; 3]) -> f64 {
        self.get(idx[0] + self.dims[0] * (idx[1] + self.dims[1] * idx[2]))
    }

    /// Overwrite a value (used for seeding).
    #[inline]
    pub fn set(&self, flat: usize, val: f64) {
        self.values[flat].store(val.to_bits(), Ordering::Relaxed);
    }

    /// Atomically lower the value at `flat` to `val`.
    /// Returns true if the stored value was strictly larger.
    pub fn update_min(&self, flat: usize, val: f64) -> bool {
        let atom = &self.values[flat];
        let mut current = atom.load(Ordering::Relaxed);
        loop {
            if f64::from_bits(current) <= val {
                return false;
            }
            match atom.compare_exchange_weak(
                current,
                val.to_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark every node unreached so the buffer can be reused.
    pub fn reset(&mut self) {
        for v in self.values.iter_mut() {
            *v.get_mut() = Self::UNREACHED.to_bits();
        }
    }

    /// Number of nodes still unreached.
    pub fn unreached_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.get(i).is_infinite()).count()
    }

    /// Snapshot of all node values in the declared order.
    pub fn to_vec(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Cell values: the mean of the eight corners of each cell.
    pub fn cell_averaged(&self) -> Vec<f64> {
        let [nz, nx, ny] = self.dims;
        let mut out = Vec::with_capacity((nz - 1) * (nx - 1) * (ny - 1));
        for iy in 0..ny - 1 {
            for ix in 0..nx - 1 {
                for iz in 0..nz - 1 {
                    let mut sum = 0.0;
                    for corner in 0..8 {
                        sum += self.get_at([
                            iz + (corner & 1),
                            ix + ((corner >> 1) & 1),
                            iy + ((corner >> 2) & 1),
                        ]);
                    }
                    out.push(sum / 8.0);
                }
            }
        }
        out
    }

    /// Extract node or cell values.
    pub fn extract(&self, kind: FieldKind) -> Vec<f64> {
        match kind {
            FieldKind::Node => self.to_vec(),
            FieldKind::Cell => self.cell_averaged(),
        }
    }

    /// Copy the node values into an array of shape `(ny, nx, nz)` whose
    /// standard layout matches the declared order.
    pub fn to_array(&self) -> Array3<f64> {
        let [nz, nx, ny] = self.dims;
        Array3::from_shape_fn((ny, nx, nz), |(iy, ix, iz)| self.get_at([iz, ix, iy]))
    }
}

impl std::fmt::Debug for TravelTimeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TravelTimeField")
            .field("dims", &self.dims)
            .field("unreached", &self.unreached_count())
            .finish()
    }
}
