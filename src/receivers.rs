// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::core::{Grid, TravelTimeField};
use crate::error::{BatchResult, EikonalError, Result};

/// Reads travel times at arbitrary points of a solved field.
///
/// Values between nodes are trilinearly interpolated from the eight
/// surrounding nodes. Points on the upper face of the grid use the last cell.
pub struct ReceiverSampler<'a> {
    grid: &'a Grid,
    field: &'a TravelTimeField,
}

impl<'a> ReceiverSampler<'a> {
    /// Create a sampler over a field computed on `grid`.
    pub fn new(grid: &'a Grid, field: &'a TravelTimeField) -> Self {
        ReceiverSampler { grid, field }
    }

    /// Travel time at physical coordinates `coord`.
    ///
    /// A corner that carries weight and was never reached makes the result
    /// `+inf`.
    ///
    /// # Errors
    /// Returns `ReceiverOutOfBounds` if `coord` lies outside the grid extent.
    pub fn sample_at(&self, coord: [f64; 3]) -> Result<f64> {
        if let Some(axis) = self.grid.out_of_bounds_axis(coord) {
            return Err(EikonalError::ReceiverOutOfBounds {
                index: None,
                coord,
                axis,
            });
        }
        Ok(self.interpolate(coord))
    }

    /// Sample every coordinate independently.
    ///
    /// An out-of-bounds receiver fails alone and carries its batch index; the
    /// remaining receivers are still sampled.
    pub fn sample_all(&self, coords: &[[f64; 3]]) -> BatchResult<f64> {
        coords
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                self.sample_at(c).map_err(|e| match e {
                    EikonalError::ReceiverOutOfBounds { coord, axis, .. } => {
                        EikonalError::ReceiverOutOfBounds {
                            index: Some(i),
                            coord,
                            axis,
                        }
                    }
                    other => other,
                })
            })
            .collect()
    }

    fn interpolate(&self, coord: [f64; 3]) -> f64 {
        let dims = self.grid.dims();
        let spacing = self.grid.spacing();
        let origin = self.grid.origin();

        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for d in 0..3 {
            let t = (coord[d] - origin[d]) / spacing[d];
            let i0 = (t.floor().max(0.0) as usize).min(dims[d] - 2);
            base[d] = i0;
            frac[d] = (t - i0 as f64).clamp(0.0, 1.0);
        }

        let mut value = 0.0;
        for corner in 0..8u8 {
            let mut idx = base;
            let mut weight = 1.0;
            for d in 0..3 {
                if corner & (1 << d) != 0 {
                    idx[d] += 1;
                    weight *= frac[d];
                } else {
                    weight *= 1.0 - frac[d];
                }
            }
            // zero weight must not turn an unreached corner into NaN
            if weight > 0.0 {
                value += weight * self.field.get_at(idx);
            }
        }
        value
    }
}
