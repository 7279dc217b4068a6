//! The step-wise driver interface: `initial_step` and `step`.
//!
//! `initial_step` builds the chain's oracle, runs warm-up and returns the
//! first reportable draw together with the chain state. `step` consumes a
//! state and returns the next draw plus the successor state. The adapted
//! mass matrix is shared between successive states, so it is bit-identical
//! across the whole post-warm-up chain.

use std::sync::Arc;

use rand::Rng;

use crate::hamiltonian::EuclideanHamiltonian;
use crate::hmc::draw_hmc;
use crate::mass_matrix::DiagMassMatrix;
use crate::model::Model;
use crate::nuts::{self, NullCollector, NutsOptions, Result, SampleInfo};
use crate::oracle::{LogpFunc, LogpOracle};
use crate::sampler::{SamplerKind, Settings};
use crate::state::EvalCache;
use crate::transform::{InitialDraw, ParamSpace, Transform};
use crate::warmup::run_warmup;

/// One reportable draw.
#[derive(Debug, Clone)]
pub struct Transition {
    /// 1-based index of this draw within the chain.
    pub draw: u64,
    /// The full constrained parameter vector.
    pub position: Vec<f64>,
    /// Log-density at the draw, including Jacobian adjustment.
    pub logp: f64,
    /// Whether the trajectory for this draw diverged.
    pub diverging: bool,
    /// Tree depth or number of leapfrog steps.
    pub depth: u64,
}

/// All per-chain state between two draws.
///
/// Opaque to the driver; it is handed back to [`step`] by value and
/// replaced by the returned successor.
pub struct SamplerState<F: LogpFunc, T: Transform> {
    oracle: LogpOracle<F, T>,
    cache: EvalCache,
    metric: Arc<DiagMassMatrix>,
    step_size: f64,
    draw: u64,
    warmup_divergences: u64,
}

impl<F: LogpFunc, T: Transform> SamplerState<F, T> {
    /// The adapted mass matrix. Shared by all states of a chain.
    pub fn metric(&self) -> &DiagMassMatrix {
        &self.metric
    }

    /// The adapted step size. Fixed after warm-up.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// The current position in unconstrained coordinates.
    pub fn unconstrained_position(&self) -> &[f64] {
        self.cache.position()
    }

    /// Number of divergent draws during warm-up.
    pub fn warmup_divergences(&self) -> u64 {
        self.warmup_divergences
    }
}

fn transition<F: LogpFunc, T: Transform>(
    state: &SamplerState<F, T>,
    info: &SampleInfo,
) -> Transition {
    Transition {
        draw: state.draw,
        position: state.oracle.space().constrain(state.cache.position()),
        logp: state.cache.logp(),
        diverging: info.divergence_info.is_some(),
        depth: info.depth,
    }
}

/// Initialize a chain: build the oracle, adapt, and produce the first draw.
///
/// Transform failures and warm-up failures surface here and are fatal for
/// the chain. The returned state carries everything later calls to
/// [`step`] need; the oracle is never rebuilt.
pub fn initial_step<M, R>(
    rng: &mut R,
    model: &M,
    initial_draw: InitialDraw,
    settings: &Settings,
) -> Result<(Transition, SamplerState<M::Logp, M::Trans>)>
where
    M: Model,
    R: Rng + ?Sized,
{
    let func = model.logp_func()?;
    let transform = model.transform()?;

    let template = match &initial_draw {
        InitialDraw::Constrained(x) => x.clone(),
        InitialDraw::Unconstrained(_) => {
            let mut position = vec![0f64; func.dim()];
            model.init_position(rng, &mut position)?;
            position
        }
    };
    let space = ParamSpace::new(transform, template, settings.subset.clone())?;
    let z = space.link(&initial_draw)?;

    let mut oracle = LogpOracle::new(func, space, settings.backend);
    let outcome = run_warmup(rng, &mut oracle, &z, settings)?;

    let state = SamplerState {
        oracle,
        cache: outcome.cache,
        metric: Arc::new(outcome.metric),
        step_size: outcome.step_size,
        draw: 0,
        warmup_divergences: outcome.divergences,
    };

    // The warm-up end point itself is not reportable.
    step(rng, state, settings)
}

/// Advance a chain by one draw.
///
/// Consumes the state and returns its successor; divergences are reported
/// in the [`Transition`] and never abort the chain.
pub fn step<F, T, R>(
    rng: &mut R,
    mut state: SamplerState<F, T>,
    settings: &Settings,
) -> Result<(Transition, SamplerState<F, T>)>
where
    F: LogpFunc,
    T: Transform,
    R: Rng + ?Sized,
{
    let metric = Arc::clone(&state.metric);
    let (cache, info) = {
        let mut hamiltonian = EuclideanHamiltonian::new(
            &mut state.oracle,
            metric.as_ref(),
            state.step_size,
            settings.max_energy_error,
        );
        let mut collector = NullCollector {};
        match settings.kind {
            SamplerKind::Nuts => nuts::draw(
                &state.cache,
                rng,
                &mut hamiltonian,
                &NutsOptions {
                    maxdepth: settings.maxdepth,
                },
                &mut collector,
            )?,
            SamplerKind::Hmc { num_steps } => {
                draw_hmc(&state.cache, rng, &mut hamiltonian, num_steps, &mut collector)?
            }
        }
    };

    state.cache = cache;
    state.draw += 1;
    let transition = transition(&state, &info);
    Ok((transition, state))
}
