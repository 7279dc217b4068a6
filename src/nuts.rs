//! Multinomial no-U-turn trajectory construction.

use rand::distributions::Distribution;
use rand::Rng;
use thiserror::Error;

use crate::hamiltonian::{DivergenceInfo, Hamiltonian};
use crate::math::logaddexp;
use crate::state::EvalCache;
use crate::transform::TransformError;

/// Fatal sampler errors.
///
/// Divergent trajectories are not errors; they are reported in
/// [`SampleInfo`] and sampling continues from the previous draw.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("log-density function returned an unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("could not find a usable step size and mass matrix during warm-up")]
    WarmupDivergence,
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SamplerError>;

/// Direction of a leapfrog step along the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Backward,
}

impl Distribution<Direction> for rand::distributions::Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.gen::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// Callbacks the adaptation machinery uses to observe a draw.
pub(crate) trait Collector {
    fn register_leapfrog(
        &mut self,
        _end: std::result::Result<&EvalCache, &DivergenceInfo>,
    ) {
    }
    fn register_draw(&mut self, _state: &EvalCache, _info: &SampleInfo) {}
    fn register_init(&mut self, _state: &EvalCache) {}
}

pub(crate) struct NullCollector {}

impl Collector for NullCollector {}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NutsOptions {
    pub(crate) maxdepth: u64,
}

/// Diagnostics for a single draw.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    /// Tree depth (for no-U-turn draws) or the number of completed leapfrog
    /// steps (for fixed-length draws).
    pub depth: u64,
    /// Whether the tree was stopped at the depth limit.
    pub reached_maxdepth: bool,
    /// Present if the trajectory ended in a divergence.
    pub divergence_info: Option<DivergenceInfo>,
}

struct NutsTree {
    left: EvalCache,
    right: EvalCache,
    draw: EvalCache,
    log_size: f64,
    depth: u64,
    initial_energy: f64,
    /// Contains the original point of the trajectory, so draws from
    /// extensions are accepted with a Metropolis correction.
    is_main: bool,
}

enum ExtendResult {
    Ok(NutsTree),
    Turning(NutsTree),
    Diverging(NutsTree, DivergenceInfo),
}

impl NutsTree {
    fn new(state: EvalCache) -> NutsTree {
        let initial_energy = state.energy();
        NutsTree {
            right: state.clone(),
            left: state.clone(),
            draw: state,
            depth: 0,
            log_size: 0.,
            initial_energy,
            is_main: true,
        }
    }

    fn extend<H, R, C>(
        mut self,
        rng: &mut R,
        hamiltonian: &mut H,
        direction: Direction,
        collector: &mut C,
    ) -> Result<ExtendResult>
    where
        H: Hamiltonian,
        R: Rng + ?Sized,
        C: Collector,
    {
        let mut other = match self.single_step(hamiltonian, direction, collector)? {
            Ok(tree) => tree,
            Err(info) => return Ok(ExtendResult::Diverging(self, info)),
        };

        while other.depth < self.depth {
            other = match other.extend(rng, hamiltonian, direction, collector)? {
                ExtendResult::Ok(tree) => tree,
                ExtendResult::Turning(_) => {
                    return Ok(ExtendResult::Turning(self));
                }
                ExtendResult::Diverging(_, info) => {
                    return Ok(ExtendResult::Diverging(self, info));
                }
            };
        }

        let (first, last) = match direction {
            Direction::Forward => (&self.left, &other.right),
            Direction::Backward => (&other.left, &self.right),
        };

        let mut turning = first.is_turning(last);
        if self.depth > 0 {
            if !turning {
                turning = self.right.is_turning(&other.right);
            }
            if !turning {
                turning = self.left.is_turning(&other.left);
            }
        }

        self.merge_into(other, rng, direction);

        if turning {
            Ok(ExtendResult::Turning(self))
        } else {
            Ok(ExtendResult::Ok(self))
        }
    }

    fn merge_into<R: Rng + ?Sized>(&mut self, other: NutsTree, rng: &mut R, direction: Direction) {
        assert!(self.depth == other.depth);
        match direction {
            Direction::Forward => self.right = other.right,
            Direction::Backward => self.left = other.left,
        }
        let log_size = logaddexp(self.log_size, other.log_size);
        let self_log_size = if self.is_main {
            assert!(self.left.index_in_trajectory() <= 0);
            assert!(self.right.index_in_trajectory() >= 0);
            self.log_size
        } else {
            log_size
        };
        if (other.log_size >= self_log_size)
            || rng.gen_bool((other.log_size - self_log_size).exp())
        {
            self.draw = other.draw;
        }
        self.depth += 1;
        self.log_size = log_size;
    }

    fn single_step<H, C>(
        &self,
        hamiltonian: &mut H,
        direction: Direction,
        collector: &mut C,
    ) -> Result<std::result::Result<NutsTree, DivergenceInfo>>
    where
        H: Hamiltonian,
        C: Collector,
    {
        let start = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match hamiltonian.leapfrog(start, direction, self.initial_energy, collector)? {
            Ok(end) => end,
            Err(info) => return Ok(Err(info)),
        };
        let log_size = self.initial_energy - end.energy();
        Ok(Ok(NutsTree {
            right: end.clone(),
            left: end.clone(),
            draw: end,
            depth: 0,
            log_size,
            initial_energy: self.initial_energy,
            is_main: false,
        }))
    }

    fn info(&self, maxdepth: bool, divergence_info: Option<DivergenceInfo>) -> SampleInfo {
        SampleInfo {
            depth: self.depth,
            reached_maxdepth: maxdepth,
            divergence_info,
        }
    }
}

/// Perform a single no-U-turn draw starting from `init`.
pub(crate) fn draw<H, R, C>(
    init: &EvalCache,
    rng: &mut R,
    hamiltonian: &mut H,
    options: &NutsOptions,
    collector: &mut C,
) -> Result<(EvalCache, SampleInfo)>
where
    H: Hamiltonian,
    R: Rng + ?Sized,
    C: Collector,
{
    let state = hamiltonian.randomize_momentum(init, rng);
    collector.register_init(&state);

    let mut tree = NutsTree::new(state);
    while tree.depth < options.maxdepth {
        let direction: Direction = rng.gen();
        tree = match tree.extend(rng, hamiltonian, direction, collector)? {
            ExtendResult::Ok(tree) => tree,
            ExtendResult::Turning(tree) => {
                let info = tree.info(false, None);
                collector.register_draw(&tree.draw, &info);
                return Ok((tree.draw, info));
            }
            ExtendResult::Diverging(tree, info) => {
                let info = tree.info(false, Some(info));
                collector.register_draw(&tree.draw, &info);
                return Ok((tree.draw, info));
            }
        };
    }
    let info = tree.info(true, None);
    collector.register_draw(&tree.draw, &info);
    Ok((tree.draw, info))
}
