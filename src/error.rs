// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur while configuring a session, seeding sources,
/// solving, or sampling travel times.
#[derive(Debug)]
pub enum EikonalError {
    /// Grid dimensions, spacing or origin are invalid.
    InvalidGeometry {
        /// The axis index in (z, x, y) order.
        axis: usize,
        /// Explanation of what is wrong with the axis.
        reason: String,
    },
    /// Velocity value is not positive and finite.
    InvalidVelocity {
        /// The flat index of the invalid value in the input array.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Array length does not match the expected node or cell count.
    SizeMismatch {
        /// What was being sized (e.g. "cell velocity").
        what: &'static str,
        /// The expected length(s).
        expected: Vec<usize>,
        /// The length that was provided.
        got: usize,
    },
    /// Source lies outside the physical extent of the grid.
    SourceOutOfBounds {
        /// The source coordinates in (z, x, y) order.
        coord: [f64; 3],
        /// The first axis on which the coordinate is out of range.
        axis: usize,
    },
    /// Receiver lies outside the physical extent of the grid.
    ReceiverOutOfBounds {
        /// The receiver index, if the receiver belongs to a batch.
        index: Option<usize>,
        /// The receiver coordinates in (z, x, y) order.
        coord: [f64; 3],
        /// The first axis on which the coordinate is out of range.
        axis: usize,
    },
    /// An operation was invoked before a required prior step.
    NotInitialized(&'static str),
    /// Some elements of a batch operation failed; the rest succeeded.
    PartialBatchFailure {
        /// Indices of the failed elements.
        failed: Vec<usize>,
        /// Total number of elements in the batch.
        total: usize,
    },
    /// A solver configuration parameter is out of range.
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Explanation of the constraint.
        reason: String,
    },
    /// Parallel coordinate arrays have different lengths.
    CoordinateLengthMismatch {
        /// Length of the z array.
        z: usize,
        /// Length of the x array.
        x: usize,
        /// Length of the y array.
        y: usize,
    },
    /// Source index does not refer to a configured source.
    SourceIndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of configured sources.
        count: usize,
    },
    /// The worker thread pool could not be built.
    ThreadPool(String),
}

impl fmt::Display for EikonalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EikonalError::InvalidGeometry { axis, reason } => {
                write!(f, "invalid geometry on axis {}: {}", axis, reason)
            }
            EikonalError::InvalidVelocity { index, value } => {
                write!(
                    f,
                    "invalid velocity at index {}: {} (must be positive and finite)",
                    index, value
                )
            }
            EikonalError::SizeMismatch {
                what,
                expected,
                got,
            } => {
                write!(
                    f,
                    "size mismatch for {}: expected {:?}, got {}",
                    what, expected, got
                )
            }
            EikonalError::SourceOutOfBounds { coord, axis } => {
                write!(
                    f,
                    "source at {:?} is outside the grid on axis {}",
                    coord, axis
                )
            }
            EikonalError::ReceiverOutOfBounds { index, coord, axis } => match index {
                Some(i) => write!(
                    f,
                    "receiver {} at {:?} is outside the grid on axis {}",
                    i, coord, axis
                ),
                None => write!(
                    f,
                    "receiver at {:?} is outside the grid on axis {}",
                    coord, axis
                ),
            },
            EikonalError::NotInitialized(what) => {
                write!(f, "not initialized: {}", what)
            }
            EikonalError::PartialBatchFailure { failed, total } => {
                write!(
                    f,
                    "{} of {} batch elements failed: indices {:?}",
                    failed.len(),
                    total,
                    failed
                )
            }
            EikonalError::InvalidConfig { field, reason } => {
                write!(f, "invalid config field '{}': {}", field, reason)
            }
            EikonalError::CoordinateLengthMismatch { z, x, y } => {
                write!(
                    f,
                    "coordinate arrays have different lengths: z={}, x={}, y={}",
                    z, x, y
                )
            }
            EikonalError::SourceIndexOutOfRange { index, count } => {
                write!(
                    f,
                    "source index {} out of range ({} sources configured)",
                    index, count
                )
            }
            EikonalError::ThreadPool(msg) => write!(f, "thread pool error: {}", msg),
        }
    }
}

impl std::error::Error for EikonalError {}

impl From<rayon::ThreadPoolBuildError> for EikonalError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        EikonalError::ThreadPool(e.to_string())
    }
}

/// Convenience type alias for Results with EikonalError.
pub type Result<T> = std::result::Result<T, EikonalError>;

/// Per-element outcome of a batch operation.
///
/// A failing element never aborts its siblings; each keeps its own result in
/// batch order so callers can inspect exactly which items failed.
#[derive(Debug)]
pub struct BatchResult<T> {
    results: Vec<Result<T>>,
}

impl<T> BatchResult<T> {
    /// Wrap per-element results, in batch order.
    pub fn from_results(results: Vec<Result<T>>) -> Self {
        BatchResult { results }
    }

    /// All per-element results.
    pub fn results(&self) -> &[Result<T>] {
        &self.results
    }

    /// Result of one element.
    pub fn get(&self, index: usize) -> Option<&Result<T>> {
        self.results.get(index)
    }

    /// Number of elements in the batch.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Indices of the elements that failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_err().then_some(i))
            .collect()
    }

    /// Number of elements that failed.
    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }

    /// True if every element succeeded.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|r| r.is_ok())
    }

    /// Successful values, `None` where the element failed.
    pub fn values(&self) -> Vec<Option<&T>> {
        self.results.iter().map(|r| r.as_ref().ok()).collect()
    }

    /// Consume into the per-element results.
    pub fn into_results(self) -> Vec<Result<T>> {
        self.results
    }

    /// Collapse into a single result.
    ///
    /// # Errors
    /// Returns `PartialBatchFailure` listing the failed indices if any element
    /// failed.
    pub fn into_result(self) -> Result<Vec<T>> {
        let total = self.results.len();
        let failed = self.failed_indices();
        if !failed.is_empty() {
            return Err(EikonalError::PartialBatchFailure { failed, total });
        }
        Ok(self.results.into_iter().flatten().collect())
    }
}

impl<T> FromIterator<Result<T>> for BatchResult<T> {
    fn from_iter<I: IntoIterator<Item = Result<T>>>(iter: I) -> Self {
        BatchResult {
            results: iter.into_iter().collect(),
        }
    }
}
