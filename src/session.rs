// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::AtomicBool;

use rayon::prelude::*;

use crate::config::SolverConfig;
use crate::core::{FieldKind, Grid, TravelTimeField, VelocityKind, VelocityModel};
use crate::error::{BatchResult, EikonalError, Result};
use crate::receivers::ReceiverSampler;
use crate::scheduler::{
    ConvergenceController, ConvergenceReport, LevelSchedule, ProgressInfo, SweepScheduler,
    SweepStrategy,
};
use crate::source::SourceInitializer;

/// Travel times of one source solved independently of the session buffer.
#[derive(Debug)]
pub struct SourceSolution {
    /// Index of the source in the session's source list.
    pub source_index: usize,
    /// The converged field.
    pub field: TravelTimeField,
    /// How the sweeps terminated.
    pub report: ConvergenceReport,
}

/// A solver instance: one grid, one velocity model, its sources and receivers.
///
/// Sources are solved one at a time into a reused travel time buffer; the
/// field of the last successfully solved source stays queryable until the
/// velocity model or the source list changes.
///
/// # Example
///
/// ```
/// use eikonal_fsm::{Grid, SolverConfig, SolverSession};
///
/// let grid = Grid::new([11, 11, 11], [1.0; 3], [0.0; 3]).unwrap();
/// let mut session = SolverSession::new(grid, SolverConfig::default()).unwrap();
/// session.set_cell_velocity(&vec![1000.0; 1000]).unwrap();
/// session.add_source([5.0, 5.0, 5.0]);
/// session.add_receiver([5.0, 5.0, 10.0]);
///
/// session.solve(0).unwrap();
/// let times = session.travel_times().unwrap().into_result().unwrap();
/// assert!((times[0] - 0.005).abs() < 5e-5);
/// ```
#[derive(Debug)]
pub struct SolverSession {
    grid: Grid,
    config: SolverConfig,
    schedule: LevelSchedule,
    velocity: Option<VelocityModel>,
    sources: Vec<[f64; 3]>,
    receivers: Vec<[f64; 3]>,
    field: TravelTimeField,
    solved: Option<(usize, ConvergenceReport)>,
}

impl SolverSession {
    /// Create a session on `grid`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(grid: Grid, config: SolverConfig) -> Result<Self> {
        config.validate()?;
        let schedule = LevelSchedule::new(&grid);
        let field = TravelTimeField::new(&grid);
        Ok(SolverSession {
            grid,
            config,
            schedule,
            velocity: None,
            sources: Vec::new(),
            receivers: Vec::new(),
            field,
            solved: None,
        })
    }

    /// Replace the velocity model. Nothing is committed unless every value is
    /// valid; on success any stored solution is discarded.
    pub fn set_velocity(&mut self, values: &[f64], kind: VelocityKind) -> Result<()> {
        let model = VelocityModel::new(&self.grid, values, kind)?;
        self.velocity = Some(model);
        self.solved = None;
        Ok(())
    }

    /// Replace the velocity model with one value per cell.
    pub fn set_cell_velocity(&mut self, values: &[f64]) -> Result<()> {
        self.set_velocity(values, VelocityKind::Cell)
    }

    /// Replace the velocity model with one value per node.
    pub fn set_nodal_velocity(&mut self, values: &[f64]) -> Result<()> {
        self.set_velocity(values, VelocityKind::Nodal)
    }

    /// Replace all sources. Source indices change meaning, so any stored
    /// solution is discarded.
    ///
    /// # Errors
    /// Returns `CoordinateLengthMismatch` if the arrays differ in length.
    pub fn set_sources(&mut self, z: &[f64], x: &[f64], y: &[f64]) -> Result<()> {
        self.sources = zip_coords(z, x, y)?;
        self.solved = None;
        Ok(())
    }

    /// Append one source and return its index.
    pub fn add_source(&mut self, coord: [f64; 3]) -> usize {
        self.sources.push(coord);
        self.sources.len() - 1
    }

    /// Replace all receivers.
    ///
    /// # Errors
    /// Returns `CoordinateLengthMismatch` if the arrays differ in length.
    pub fn set_receivers(&mut self, z: &[f64], x: &[f64], y: &[f64]) -> Result<()> {
        self.receivers = zip_coords(z, x, y)?;
        Ok(())
    }

    /// Append one receiver and return its index.
    pub fn add_receiver(&mut self, coord: [f64; 3]) -> usize {
        self.receivers.push(coord);
        self.receivers.len() - 1
    }

    /// Number of configured sources.
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Number of configured receivers.
    pub fn num_receivers(&self) -> usize {
        self.receivers.len()
    }

    /// Solve the travel time field of source `index` into the session buffer.
    pub fn solve(&mut self, index: usize) -> Result<ConvergenceReport> {
        self.solve_with(index, None, None)
    }

    /// Solve source `index` with an optional per-set progress callback and a
    /// cancellation flag checked between sweep sets.
    ///
    /// # Errors
    /// Returns `NotInitialized` without a velocity model,
    /// `SourceIndexOutOfRange` for an unknown source and `SourceOutOfBounds`
    /// for a source outside the grid. The previous solution is discarded in
    /// every case.
    pub fn solve_with(
        &mut self,
        index: usize,
        progress: Option<&(dyn Fn(ProgressInfo) + Sync)>,
        cancel: Option<&AtomicBool>,
    ) -> Result<ConvergenceReport> {
        self.solved = None;
        let velocity = self
            .velocity
            .as_ref()
            .ok_or(EikonalError::NotInitialized("velocity model"))?;
        let coord = *self
            .sources
            .get(index)
            .ok_or(EikonalError::SourceIndexOutOfRange {
                index,
                count: self.sources.len(),
            })?;

        self.field.reset();
        let report = solve_source(
            &self.grid,
            velocity,
            &self.schedule,
            &self.config,
            self.config.strategy,
            coord,
            &self.field,
            progress,
            cancel,
        )?;

        if self.config.verbosity >= 1 {
            tracing::info!(
                source = index,
                iterations = report.iterations,
                residual = report.residual,
                stop_reason = ?report.stop_reason,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "source solved"
            );
        }
        self.solved = Some((index, report));
        Ok(report)
    }

    /// Solve every source in order through the session buffer.
    ///
    /// A failing source does not stop the ones after it, and the field of the
    /// last source that succeeded stays queryable.
    pub fn solve_all(&mut self) -> BatchResult<ConvergenceReport> {
        let mut results = Vec::with_capacity(self.sources.len());
        for index in 0..self.sources.len() {
            let coord = self.sources[index];
            // rejected before the buffer is reset
            let result = match self.grid.out_of_bounds_axis(coord) {
                Some(axis) => Err(EikonalError::SourceOutOfBounds { coord, axis }),
                None => self.solve(index),
            };
            if let Err(e) = &result {
                tracing::warn!(source = index, error = %e, "source failed");
            }
            results.push(result);
        }
        BatchResult::from_results(results)
    }

    /// Solve the given sources concurrently, each into its own field.
    ///
    /// The session buffer and stored solution are left untouched. Results
    /// keep the order of `indices`.
    ///
    /// # Errors
    /// Returns `NotInitialized` without a velocity model, or `ThreadPool` if
    /// the worker pool cannot be built. Per-source failures are reported in
    /// the returned vector.
    pub fn solve_sources_parallel(
        &self,
        indices: &[usize],
    ) -> Result<Vec<Result<SourceSolution>>> {
        let velocity = self
            .velocity
            .as_ref()
            .ok_or(EikonalError::NotInitialized("velocity model"))?;

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.config.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;

        let solutions = pool.install(|| {
            indices
                .par_iter()
                .map(|&index| -> Result<SourceSolution> {
                    let coord = *self.sources.get(index).ok_or(
                        EikonalError::SourceIndexOutOfRange {
                            index,
                            count: self.sources.len(),
                        },
                    )?;
                    let field = TravelTimeField::new(&self.grid);
                    // one source per worker; nested loops avoid a pool per source
                    let report = solve_source(
                        &self.grid,
                        velocity,
                        &self.schedule,
                        &self.config,
                        SweepStrategy::Nested,
                        coord,
                        &field,
                        None,
                        None,
                    )?;
                    Ok(SourceSolution {
                        source_index: index,
                        field,
                        report,
                    })
                })
                .collect::<Vec<_>>()
        });

        if self.config.verbosity >= 1 {
            let failed = solutions.iter().filter(|r| r.is_err()).count();
            tracing::info!(
                sources = indices.len(),
                failed,
                "parallel source batch complete"
            );
        }
        Ok(solutions)
    }

    /// Travel times of the solved source, per node or per cell.
    ///
    /// # Errors
    /// Returns `NotInitialized` before a successful solve.
    pub fn travel_time_field(&self, kind: FieldKind) -> Result<Vec<f64>> {
        Ok(self.solved_field()?.extract(kind))
    }

    /// Travel times of the solved source at every configured receiver.
    ///
    /// # Errors
    /// Returns `NotInitialized` before a successful solve or when no receivers
    /// are configured. Out-of-bounds receivers fail individually inside the
    /// batch.
    pub fn travel_times(&self) -> Result<BatchResult<f64>> {
        let field = self.solved_field()?;
        if self.receivers.is_empty() {
            return Err(EikonalError::NotInitialized("receivers"));
        }
        Ok(ReceiverSampler::new(&self.grid, field).sample_all(&self.receivers))
    }

    /// Travel time of the solved source at an arbitrary point.
    ///
    /// # Errors
    /// Returns `NotInitialized` before a successful solve, or
    /// `ReceiverOutOfBounds` outside the grid.
    pub fn sample_at(&self, coord: [f64; 3]) -> Result<f64> {
        ReceiverSampler::new(&self.grid, self.solved_field()?).sample_at(coord)
    }

    /// The session grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The solver configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// The velocity model, if one has been set.
    pub fn velocity(&self) -> Option<&VelocityModel> {
        self.velocity.as_ref()
    }

    /// The field of the solved source, if any.
    pub fn travel_time(&self) -> Option<&TravelTimeField> {
        self.solved.as_ref().map(|_| &self.field)
    }

    /// Sweep ordering metadata.
    pub fn level_schedule(&self) -> &LevelSchedule {
        &self.schedule
    }

    /// Index of the source whose field is stored.
    pub fn solved_source(&self) -> Option<usize> {
        self.solved.as_ref().map(|(i, _)| *i)
    }

    /// Convergence report of the stored solution.
    pub fn last_report(&self) -> Option<&ConvergenceReport> {
        self.solved.as_ref().map(|(_, r)| r)
    }

    /// Configured sources in (z, x, y) order.
    pub fn sources(&self) -> &[[f64; 3]] {
        &self.sources
    }

    /// Configured receivers in (z, x, y) order.
    pub fn receivers(&self) -> &[[f64; 3]] {
        &self.receivers
    }

    fn solved_field(&self) -> Result<&TravelTimeField> {
        self.travel_time()
            .ok_or(EikonalError::NotInitialized("no source has been solved"))
    }
}

fn zip_coords(z: &[f64], x: &[f64], y: &[f64]) -> Result<Vec<[f64; 3]>> {
    if z.len() != x.len() || z.len() != y.len() {
        return Err(EikonalError::CoordinateLengthMismatch {
            z: z.len(),
            x: x.len(),
            y: y.len(),
        });
    }
    Ok(z.iter()
        .zip(x)
        .zip(y)
        .map(|((&z, &x), &y)| [z, x, y])
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn solve_source(
    grid: &Grid,
    velocity: &VelocityModel,
    schedule: &LevelSchedule,
    config: &SolverConfig,
    strategy: SweepStrategy,
    coord: [f64; 3],
    field: &TravelTimeField,
    progress: Option<&(dyn Fn(ProgressInfo) + Sync)>,
    cancel: Option<&AtomicBool>,
) -> Result<ConvergenceReport> {
    let seed = SourceInitializer::new(grid, velocity, config.eps).seed(coord, field)?;
    if config.verbosity >= 2 {
        tracing::debug!(
            nearest = ?seed.nearest,
            seeded = seed.seeded,
            on_node = seed.frozen.is_some(),
            "source seeded"
        );
    }

    let mut controller = ConvergenceController::new(config.nsweep, config.conv_tol);
    if let Some(flag) = cancel {
        controller = controller.with_cancel_flag(flag);
    }
    SweepScheduler::new(grid, velocity, schedule)
        .with_strategy(strategy)
        .with_threads(config.threads)
        .with_frozen(seed.frozen)
        .with_verbosity(config.verbosity)
        .run(field, &controller, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::StopReason;
    use std::sync::atomic::Ordering;

    fn session(n: usize, config: SolverConfig) -> SolverSession {
        let grid = Grid::new([n, n, n], [1.0; 3], [0.0; 3]).unwrap();
        let mut s = SolverSession::new(grid, config).unwrap();
        let cells = vec![1.0; (n - 1).pow(3)];
        s.set_cell_velocity(&cells).unwrap();
        s
    }

    #[test]
    fn session_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SolverSession>();
    }

    #[test]
    fn new_rejects_invalid_config() {
        let grid = Grid::new([3, 3, 3], [1.0; 3], [0.0; 3]).unwrap();
        let result = SolverSession::new(grid, SolverConfig::default().with_nsweep(0));
        assert!(matches!(
            result,
            Err(EikonalError::InvalidConfig { field: "nsweep", .. })
        ));
    }

    #[test]
    fn solve_requires_velocity() {
        let grid = Grid::new([3, 3, 3], [1.0; 3], [0.0; 3]).unwrap();
        let mut s = SolverSession::new(grid, SolverConfig::default()).unwrap();
        s.add_source([1.0, 1.0, 1.0]);
        assert!(matches!(s.solve(0), Err(EikonalError::NotInitialized(_))));
    }

    #[test]
    fn bad_source_index() {
        let mut s = session(5, SolverConfig::default());
        s.add_source([1.0, 1.0, 1.0]);
        assert!(matches!(
            s.solve(3),
            Err(EikonalError::SourceIndexOutOfRange { index: 3, count: 1 })
        ));
    }

    #[test]
    fn invalid_velocity_keeps_previous_model() {
        let mut s = session(5, SolverConfig::default());
        let mut cells = vec![2.0; 64];
        cells[10] = -1.0;
        assert!(matches!(
            s.set_cell_velocity(&cells),
            Err(EikonalError::InvalidVelocity { index: 10, .. })
        ));
        assert_eq!(s.velocity().unwrap().cell_velocity()[0], 1.0);
    }

    #[test]
    fn mismatched_coordinates_are_rejected() {
        let mut s = session(5, SolverConfig::default());
        let result = s.set_sources(&[1.0, 2.0], &[1.0, 2.0], &[1.0]);
        assert!(matches!(
            result,
            Err(EikonalError::CoordinateLengthMismatch { z: 2, x: 2, y: 1 })
        ));
        assert_eq!(s.num_sources(), 0);
        assert!(s.set_receivers(&[1.0], &[], &[1.0]).is_err());
    }

    #[test]
    fn queries_before_solve_fail() {
        let mut s = session(5, SolverConfig::default());
        s.add_receiver([1.0, 1.0, 1.0]);
        assert!(matches!(
            s.travel_time_field(FieldKind::Node),
            Err(EikonalError::NotInitialized(_))
        ));
        assert!(s.travel_times().is_err());
        assert!(s.sample_at([1.0, 1.0, 1.0]).is_err());
        assert!(s.travel_time().is_none());
    }

    #[test]
    fn travel_times_need_receivers() {
        let mut s = session(5, SolverConfig::default());
        s.add_source([2.0, 2.0, 2.0]);
        s.solve(0).unwrap();
        assert!(matches!(
            s.travel_times(),
            Err(EikonalError::NotInitialized("receivers"))
        ));
    }

    #[test]
    fn solve_stores_solution_until_invalidated() {
        let mut s = session(7, SolverConfig::default());
        s.add_source([3.0, 3.0, 3.0]);
        let report = s.solve(0).unwrap();
        assert_eq!(report.stop_reason, StopReason::SweepBudget);
        assert_eq!(s.solved_source(), Some(0));
        assert_eq!(s.last_report().unwrap().iterations, 2);

        let nodes = s.travel_time_field(FieldKind::Node).unwrap();
        assert_eq!(nodes.len(), 343);
        assert_eq!(nodes[s.grid().node_index([3, 3, 3])], 0.0);
        assert_eq!(s.travel_time_field(FieldKind::Cell).unwrap().len(), 216);

        s.set_cell_velocity(&vec![2.0; 216]).unwrap();
        assert!(s.travel_time().is_none());
        assert_eq!(s.solved_source(), None);
    }

    #[test]
    fn failed_solve_discards_previous_solution() {
        let mut s = session(5, SolverConfig::default());
        s.add_source([2.0, 2.0, 2.0]);
        s.add_source([2.0, 2.0, 9.0]);
        s.solve(0).unwrap();
        assert!(matches!(
            s.solve(1),
            Err(EikonalError::SourceOutOfBounds { axis: 2, .. })
        ));
        assert!(s.travel_time().is_none());
    }

    #[test]
    fn cancellation_stops_after_first_set() {
        let mut s = session(7, SolverConfig::default().with_nsweep(10));
        s.add_source([0.0, 0.0, 0.0]);
        let cancel = AtomicBool::new(true);
        let report = s.solve_with(0, None, Some(&cancel)).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert!(cancel.load(Ordering::Relaxed));
    }

    #[test]
    fn solve_all_continues_past_failures() {
        let mut s = session(5, SolverConfig::default());
        s.set_sources(
            &[1.0, -5.0, 3.0, 2.0],
            &[1.0, 1.0, 3.0, 2.0],
            &[1.0, 1.0, 3.0, 7.0],
        )
        .unwrap();
        let batch = s.solve_all();
        assert_eq!(batch.failed_indices(), vec![1, 3]);
        assert_eq!(batch.values()[2].unwrap().iterations, 2);
        // the trailing failure leaves source 2 queryable
        assert_eq!(s.solved_source(), Some(2));
        assert_eq!(s.sample_at([3.0, 3.0, 3.0]).unwrap(), 0.0);
    }

    #[test]
    fn parallel_sources_leave_session_buffer_alone() {
        let mut s = session(7, SolverConfig::default().with_threads(2));
        s.add_source([1.0, 2.0, 3.0]);
        s.add_source([5.0, 5.0, 0.0]);
        let out = s.solve_sources_parallel(&[1, 0, 4]).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().source_index, 1);
        assert_eq!(out[1].as_ref().unwrap().source_index, 0);
        assert!(matches!(
            out[2],
            Err(EikonalError::SourceIndexOutOfRange { index: 4, .. })
        ));
        assert!(s.travel_time().is_none());

        s.solve(0).unwrap();
        assert_eq!(
            out[1].as_ref().unwrap().field.to_vec(),
            s.travel_time().unwrap().to_vec()
        );
    }
}
