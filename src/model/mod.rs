use std::sync::Arc;

use crate::error::{ArgError, Result};

mod config;
mod rate_map;

pub use config::{ModelConfig, PopSizes};
pub use rate_map::{RateMap, RateRegion};

/// Default spacing constant for log-spaced time grids
pub const DEFAULT_DELTA: f64 = 0.01;

/// Default spacing constant of [`get_time_point`]
pub const DEFAULT_POINT_DELTA: f64 = 10.0;

/// Returns a discretized time point. `ntimes` is the divisor of the exponent, so a grid of `n`
/// points passes `n - 1`.
pub fn get_time_point(i: usize, ntimes: usize, maxtime: f64, delta: f64) -> f64 {
    ((i as f64 / ntimes as f64 * (1.0 + delta * maxtime).ln()).exp() - 1.0) / delta
}

/// Returns `ntimes` log-spaced time points between 0 and `maxtime`. Points are denser near the
/// present.
pub fn get_time_points(ntimes: usize, maxtime: f64, delta: f64) -> Vec<f64> {
    (0..ntimes)
        .map(|i| get_time_point(i, ntimes - 1, maxtime, delta))
        .collect()
}

/// How time points are spaced. This decides where the midpoints of the finer coalescent grid
/// are placed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Spacing {
    /// Midpoints halfway between consecutive time points
    Linear,
    /// Midpoints in the middle of the log-transformed interval
    Log { delta: f64 },
}

/// Compute the `2 * ntimes` coalescent time steps. Each epoch is split at its midpoint; the last
/// two steps are unbounded.
pub fn get_coal_time_steps(times: &[f64], spacing: Spacing) -> Vec<f64> {
    let ntimes = times.len();
    let mut times2 = Vec::with_capacity(2 * ntimes - 1);
    for i in 0..ntimes - 1 {
        times2.push(times[i]);
        times2.push(match spacing {
            Spacing::Linear => 0.5 * (times[i] + times[i + 1]),
            Spacing::Log { delta } => {
                (((1.0 + delta * times[i]) * (1.0 + delta * times[i + 1])).sqrt() - 1.0) / delta
            }
        });
    }
    times2.push(times[ntimes - 1]);

    let mut coal_time_steps = Vec::with_capacity(2 * ntimes);
    for k in 0..2 * ntimes - 2 {
        coal_time_steps.push((times2[k + 1] - times2[k]).max(0.0));
    }
    coal_time_steps.push(f64::INFINITY);
    coal_time_steps.push(f64::INFINITY);
    coal_time_steps
}

/// The discretized time grid and the per-epoch population sizes. This is the part of a
/// [`Model`] that position-local models share with their source.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeGrid {
    times: Vec<f64>,
    time_steps: Vec<f64>,
    coal_time_steps: Vec<f64>,
    popsizes: Vec<f64>,
}

impl TimeGrid {
    /// Build a grid from explicit time points. Population sizes are set separately.
    fn from_times(times: Vec<f64>, spacing: Spacing) -> Result<Self> {
        if times.len() < 2 {
            return Err(ArgError::config(format!(
                "time grid needs at least two points, got {}",
                times.len()
            )));
        }

        if times[0] != 0.0 {
            return Err(ArgError::config(format!(
                "time grid must start at 0, starts at {}",
                times[0]
            )));
        }

        if let Some(i) = times.windows(2).position(|w| !(w[0] < w[1])) {
            return Err(ArgError::config(format!(
                "time grid is not strictly increasing at index {}",
                i + 1
            )));
        }

        let ntimes = times.len();
        let mut time_steps = Vec::with_capacity(ntimes);
        for i in 0..ntimes - 1 {
            time_steps.push(times[i + 1] - times[i]);
        }
        time_steps.push(f64::INFINITY);

        let coal_time_steps = get_coal_time_steps(&times, spacing);

        Ok(Self {
            times,
            time_steps,
            coal_time_steps,
            popsizes: Vec::new(),
        })
    }

    fn set_popsizes(&mut self, popsizes: Vec<f64>) -> Result<()> {
        if popsizes.len() != self.times.len() {
            return Err(ArgError::config(format!(
                "Number of popsizes ({}) does not match ntimes ({})",
                popsizes.len(),
                self.times.len()
            )));
        }

        if let Some(p) = popsizes.iter().find(|&&p| !(p > 0.0)) {
            return Err(ArgError::config(format!(
                "population sizes must be positive, found {p}"
            )));
        }

        self.popsizes = popsizes;
        Ok(())
    }
}

/// Whether a model owns its time grid or views the grid of another model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Shared,
}

/// The model parameters and the time discretization scheme.
///
/// The time grid and population sizes are stored behind a reference-counted handle. Models
/// derived for a genomic position (see [`Model::local_model`]) share the grid of their source
/// and only override the scalar rates; the [`Ownership`] tag records which instance owns the
/// data. Modifying the population sizes of a sharing model detaches it from its source first.
#[derive(Debug)]
pub struct Model {
    grid: Arc<TimeGrid>,
    ownership: Ownership,

    /// recombination rate (recombinations / generation / site)
    pub rho: f64,

    /// mutation rate (mutations / generation / site)
    pub mu: f64,

    /// penalty for violating infinite sites
    pub infsites_penalty: f64,

    /// whether sample phase is uncertain
    pub unphased: bool,

    mutmap: RateMap,
    recombmap: RateMap,
}

impl Model {
    fn from_grid(grid: TimeGrid, rho: f64, mu: f64) -> Self {
        Self {
            grid: Arc::new(grid),
            ownership: Ownership::Owned,
            rho,
            mu,
            infsites_penalty: 1.0,
            unphased: false,
            mutmap: RateMap::new(),
            recombmap: RateMap::new(),
        }
    }

    /// Model with constant population size and log-spaced time points
    pub fn with_log_times(
        ntimes: usize,
        maxtime: f64,
        popsize: f64,
        rho: f64,
        mu: f64,
    ) -> Result<Self> {
        Self::with_log_times_popsizes(ntimes, maxtime, &vec![popsize; ntimes], rho, mu)
    }

    /// Model with per-epoch population sizes and log-spaced time points
    pub fn with_log_times_popsizes(
        ntimes: usize,
        maxtime: f64,
        popsizes: &[f64],
        rho: f64,
        mu: f64,
    ) -> Result<Self> {
        Self::with_spaced_times(ntimes, maxtime, DEFAULT_DELTA, popsizes, rho, mu)
    }

    /// Model with log-spaced time points using a custom spacing constant
    pub fn with_spaced_times(
        ntimes: usize,
        maxtime: f64,
        delta: f64,
        popsizes: &[f64],
        rho: f64,
        mu: f64,
    ) -> Result<Self> {
        if ntimes < 2 {
            return Err(ArgError::config(format!(
                "time grid needs at least two points, got {ntimes}"
            )));
        }
        if !(maxtime > 0.0) || !(delta > 0.0) {
            return Err(ArgError::config(format!(
                "maxtime ({maxtime}) and delta ({delta}) must be positive"
            )));
        }

        let times = get_time_points(ntimes, maxtime, delta);
        let mut grid = TimeGrid::from_times(times, Spacing::Log { delta })?;
        grid.set_popsizes(popsizes.to_vec())?;
        Ok(Self::from_grid(grid, rho, mu))
    }

    /// Model with linearly spaced time points
    pub fn with_linear_times(
        time_step: f64,
        ntimes: usize,
        popsize: f64,
        rho: f64,
        mu: f64,
    ) -> Result<Self> {
        let times = (0..ntimes).map(|i| i as f64 * time_step).collect();
        let mut grid = TimeGrid::from_times(times, Spacing::Linear)?;
        grid.set_popsizes(vec![popsize; ntimes])?;
        Ok(Self::from_grid(grid, rho, mu))
    }

    /// Model with custom time points and per-epoch population sizes
    pub fn with_times(times: Vec<f64>, popsizes: Vec<f64>, rho: f64, mu: f64) -> Result<Self> {
        let mut grid = TimeGrid::from_times(
            times,
            Spacing::Log {
                delta: DEFAULT_DELTA,
            },
        )?;
        grid.set_popsizes(popsizes)?;
        Ok(Self::from_grid(grid, rho, mu))
    }

    /// Create a model that shares the time grid of this model, but uses different rates.
    pub fn share(&self, rho: f64, mu: f64) -> Self {
        Self {
            grid: Arc::clone(&self.grid),
            ownership: Ownership::Shared,
            rho,
            mu,
            infsites_penalty: self.infsites_penalty,
            unphased: self.unphased,
            mutmap: RateMap::new(),
            recombmap: RateMap::new(),
        }
    }

    /// Copy the model including its time grid, population sizes and rate maps. The copy always
    /// owns its data.
    pub fn deep_copy(&self) -> Self {
        Self {
            grid: Arc::new(TimeGrid::clone(&self.grid)),
            ownership: Ownership::Owned,
            rho: self.rho,
            mu: self.mu,
            infsites_penalty: self.infsites_penalty,
            unphased: self.unphased,
            mutmap: self.mutmap.clone(),
            recombmap: self.recombmap.clone(),
        }
    }

    /// Mutable access to the grid. A sharing model detaches from its source first, and an owning
    /// model whose grid is still viewed by local models copies it, so views never observe the
    /// change.
    fn grid_mut(&mut self) -> &mut TimeGrid {
        self.ownership = Ownership::Owned;
        Arc::make_mut(&mut self.grid)
    }

    // ------------------------------------------------------------------
    // population sizes

    /// Set per-epoch population sizes
    pub fn set_popsizes(&mut self, popsizes: &[f64]) -> Result<()> {
        if popsizes.len() != self.ntimes() {
            return Err(ArgError::config(format!(
                "Number of popsizes ({}) does not match ntimes ({})",
                popsizes.len(),
                self.ntimes()
            )));
        }
        self.grid_mut().set_popsizes(popsizes.to_vec())
    }

    /// Set a constant population size for all epochs
    pub fn set_popsize(&mut self, popsize: f64) -> Result<()> {
        let ntimes = self.ntimes();
        self.grid_mut().set_popsizes(vec![popsize; ntimes])
    }

    /// Set population sizes from a comma-separated token list. A single token sets a constant
    /// population size, otherwise there must be exactly one token per time point.
    pub fn set_popsizes_str(&mut self, popsizes: &str) -> Result<()> {
        let tokens = parse_popsize_tokens(popsizes)?;
        match tokens.len() {
            1 => self.set_popsize(tokens[0]),
            _ => self.set_popsizes(&tokens),
        }
    }

    // ------------------------------------------------------------------
    // grid access

    pub fn ntimes(&self) -> usize {
        self.grid.times.len()
    }

    pub fn times(&self) -> &[f64] {
        &self.grid.times
    }

    pub fn time_steps(&self) -> &[f64] {
        &self.grid.time_steps
    }

    pub fn coal_time_steps(&self) -> &[f64] {
        &self.grid.coal_time_steps
    }

    pub fn popsizes(&self) -> &[f64] {
        &self.grid.popsizes
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    /// Whether both models view the same time grid allocation
    pub fn shares_grid_with(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.grid, &other.grid)
    }

    /// Dummy time used for the root of a tree with an internal branch removed
    pub fn get_removed_root_time(&self) -> usize {
        self.ntimes() + 1
    }

    pub fn get_mintime(&self) -> f64 {
        self.grid.times[1] * 0.1
    }

    // ------------------------------------------------------------------
    // rate maps

    pub fn set_mutmap(&mut self, map: RateMap) {
        self.mutmap = map;
    }

    pub fn set_recombmap(&mut self, map: RateMap) {
        self.recombmap = map;
    }

    pub fn mutmap(&self) -> &RateMap {
        &self.mutmap
    }

    pub fn recombmap(&self) -> &RateMap {
        &self.recombmap
    }

    pub fn has_mutmap(&self) -> bool {
        !self.mutmap.is_empty()
    }

    pub fn has_recombmap(&self) -> bool {
        !self.recombmap.is_empty()
    }

    /// Override the scalar rates in place with the map values at `pos`
    pub fn set_map_pos(&mut self, pos: usize) {
        self.mu = self.mutmap.find(pos, self.mu);
        self.rho = self.recombmap.find(pos, self.rho);
    }

    /// Recombination rate at the given position
    pub fn local_rho(&self, pos: usize) -> f64 {
        self.recombmap.find(pos, self.rho)
    }

    /// Mutation rate at the given position
    pub fn local_mu(&self, pos: usize) -> f64 {
        self.mutmap.find(pos, self.mu)
    }

    /// Returns a model customized for the given position. The returned model shares the time grid
    /// and population sizes of this model.
    pub fn local_model(&self, pos: usize) -> Model {
        self.share(self.local_rho(pos), self.local_mu(pos))
    }

    /// Returns a model using the rates of the `index`-th rate map entries. If either map is
    /// missing, the scalar rates are used.
    pub fn local_model_index(&self, index: usize) -> Model {
        let (rho, mu) = if self.has_mutmap() && self.has_recombmap() {
            (
                self.recombmap.get(index).map_or(self.rho, |r| r.value),
                self.mutmap.get(index).map_or(self.mu, |r| r.value),
            )
        } else {
            (self.rho, self.mu)
        };
        self.share(rho, mu)
    }
}

impl Clone for Model {
    /// Cloning copies the grid, so the clone owns its data.
    fn clone(&self) -> Self {
        self.deep_copy()
    }
}

/// Parse a comma-separated list of population sizes
pub(crate) fn parse_popsize_tokens(popsizes: &str) -> Result<Vec<f64>> {
    popsizes
        .split(',')
        .map(|token| {
            token.trim().parse::<f64>().map_err(|_| {
                ArgError::config(format!("invalid population size token '{}'", token.trim()))
            })
        })
        .collect()
}
