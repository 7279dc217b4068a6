//! Sampler settings and the multi-chain convenience front end.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::chain::{initial_step, step, Transition};
use crate::model::Model;
use crate::nuts::Result;
use crate::oracle::{GradientBackend, LogpFunc};
use crate::transform::{InitialDraw, ParamSubset};
use crate::warmup::WarmupOptions;

/// Which trajectory builder a chain uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Dynamic trajectories with the no-U-turn criterion.
    Nuts,
    /// Fixed-length trajectories with a Metropolis correction.
    Hmc { num_steps: u64 },
}

/// Settings for chain initialization and stepping.
#[derive(Debug, Clone)]
pub struct Settings {
    pub kind: SamplerKind,
    /// Maximum tree depth for no-U-turn draws.
    pub maxdepth: u64,
    /// Acceptance rate the step size adaptation aims for.
    pub target_accept: f64,
    /// Energy error above which a trajectory counts as divergent.
    pub max_energy_error: f64,
    pub backend: GradientBackend,
    /// Which coordinates this sampler owns.
    pub subset: ParamSubset,
    pub warmup: WarmupOptions,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            kind: SamplerKind::Nuts,
            maxdepth: 10,
            target_accept: 0.8,
            max_energy_error: 1000.,
            backend: GradientBackend::default(),
            subset: ParamSubset::all(),
            warmup: WarmupOptions::default(),
        }
    }
}

/// All draws of one chain.
#[derive(Debug, Clone)]
pub struct ChainTrace {
    pub chain: u64,
    pub transitions: Vec<Transition>,
}

/// Run several independent chains in parallel.
///
/// Each chain gets its own deterministic rng derived from `seed`, so
/// results are reproducible for a fixed seed and chain count.
pub fn sample_parallel<M: Model>(
    model: &M,
    settings: &Settings,
    num_chains: u64,
    num_draws: u64,
    seed: u64,
) -> Result<Vec<ChainTrace>> {
    (0..num_chains)
        .into_par_iter()
        .map(|chain| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(chain));
            let mut transitions = Vec::with_capacity(num_draws as usize);
            if num_draws > 0 {
                let func = model.logp_func()?;
                let mut position = vec![0f64; func.dim()];
                model.init_position(&mut rng, &mut position)?;
                drop(func);

                let (first, mut state) =
                    initial_step(&mut rng, model, InitialDraw::Constrained(position), settings)?;
                transitions.push(first);
                for _ in 1..num_draws {
                    let (transition, next) = step(&mut rng, state, settings)?;
                    transitions.push(transition);
                    state = next;
                }
            }
            Ok(ChainTrace { chain, transitions })
        })
        .collect()
}
