// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use crate::error::{EikonalError, Result};
use crate::scheduler::SweepStrategy;

/// Solver parameters shared by every source of a session.
///
/// Every field has a default, so a partial serialized document is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of full sweep sets (eight directional sweeps each).
    #[serde(default = "default_nsweep")]
    pub nsweep: usize,

    /// Near-source radius, in grid nodes, inside which travel times are
    /// initialized analytically.
    #[serde(default = "default_eps")]
    pub eps: f64,

    /// Stop once a sweep set changes no node by this much (seconds).
    /// Zero runs exactly `nsweep` sets.
    #[serde(default)]
    pub conv_tol: f64,

    /// 0 is quiet; 1 logs per-source summaries; 2 also logs every sweep set.
    #[serde(default)]
    pub verbosity: u8,

    /// Node traversal within a sweep.
    #[serde(default)]
    pub strategy: SweepStrategy,

    /// Worker threads for level-set sweeps and parallel multi-source solves.
    /// `None` uses all available cores.
    #[serde(default)]
    pub threads: Option<usize>,
}

fn default_nsweep() -> usize {
    2
}

fn default_eps() -> f64 {
    5.0
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            nsweep: default_nsweep(),
            eps: default_eps(),
            conv_tol: 0.0,
            verbosity: 0,
            strategy: SweepStrategy::default(),
            threads: None,
        }
    }
}

impl SolverConfig {
    /// Set the sweep set budget (builder method).
    pub fn with_nsweep(mut self, nsweep: usize) -> Self {
        self.nsweep = nsweep;
        self
    }

    /// Set the near-source radius in nodes (builder method).
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Set the convergence tolerance (builder method).
    pub fn with_conv_tol(mut self, conv_tol: f64) -> Self {
        self.conv_tol = conv_tol;
        self
    }

    /// Set the verbosity (builder method).
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the sweep strategy (builder method).
    pub fn with_strategy(mut self, strategy: SweepStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the number of worker threads (builder method).
    ///
    /// The thread count never changes the computed travel times.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Check every parameter against its allowed range.
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.nsweep < 1 {
            return Err(EikonalError::InvalidConfig {
                field: "nsweep",
                reason: "at least one sweep set is required".to_string(),
            });
        }
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(EikonalError::InvalidConfig {
                field: "eps",
                reason: format!("{} must be finite and non-negative", self.eps),
            });
        }
        if !self.conv_tol.is_finite() || self.conv_tol < 0.0 {
            return Err(EikonalError::InvalidConfig {
                field: "conv_tol",
                reason: format!("{} must be finite and non-negative", self.conv_tol),
            });
        }
        if self.threads == Some(0) {
            return Err(EikonalError::InvalidConfig {
                field: "threads",
                reason: "thread count must be positive".to_string(),
            });
        }
        Ok(())
    }
}
