//! Warm-up: joint adaptation of step size and diagonal mass matrix.
//!
//! Runs once per chain before the first reportable draw. Step size follows
//! a dual average scheme with a target acceptance rate that ramps up over
//! the early part of warm-up; the mass matrix follows exponentially
//! weighted variance estimates of draws and gradients, collected in
//! overlapping foreground and background windows. The last draws of
//! warm-up freeze the mass matrix and only tune the step size.

use itertools::izip;
use rand::Rng;

use crate::hamiltonian::{DivergenceInfo, EuclideanHamiltonian, Hamiltonian};
use crate::hmc::draw_hmc;
use crate::mass_matrix::{DiagMassMatrix, DrawGradCollector, ExpWeightedVariance};
use crate::nuts::{self, Collector, Direction, NullCollector, NutsOptions, Result, SampleInfo, SamplerError};
use crate::oracle::{LogpFunc, LogpOracle};
use crate::sampler::{SamplerKind, Settings};
use crate::state::EvalCache;
use crate::stepsize::{AcceptanceRateCollector, DualAverage, DualAverageOptions};
use crate::transform::Transform;

const LOWER_LIMIT: f64 = 1e-10;
const UPPER_LIMIT: f64 = 1e10;

const STEP_SIZE_LOWER_LIMIT: f64 = 1e-10;
const STEP_SIZE_UPPER_LIMIT: f64 = 1e5;

/// Settings for the warm-up phase.
#[derive(Debug, Clone, Copy)]
pub struct WarmupOptions {
    /// Number of warm-up draws.
    pub num_tune: u64,
    /// Step size used to seed the initial bracketing search.
    pub initial_step: f64,
    /// Target acceptance rate at the start of warm-up.
    pub early_target_accept: f64,
    /// Fraction of `num_tune` over which the acceptance target ramps up.
    pub final_window_ratio: f64,
    pub dual_average: DualAverageOptions,
    /// Variance decay rate for the first adaptation window.
    pub early_variance_decay: f64,
    /// Variance decay rate for later adaptation windows.
    pub variance_decay: f64,
    pub window_switch_freq: u64,
    pub early_window_switch_freq: u64,
    /// Number of trailing draws during which only the step size adapts.
    pub mass_matrix_final_window: u64,
    /// Initialize the mass matrix from the gradient at the initial point.
    pub grad_based_init: bool,
}

impl Default for WarmupOptions {
    fn default() -> WarmupOptions {
        WarmupOptions {
            num_tune: 300,
            initial_step: 0.1,
            early_target_accept: 0.5,
            final_window_ratio: 0.4,
            dual_average: DualAverageOptions::default(),
            early_variance_decay: 0.8,
            variance_decay: 0.02,
            window_switch_freq: 50,
            early_window_switch_freq: 10,
            mass_matrix_final_window: 50,
            grad_based_init: true,
        }
    }
}

/// Everything warm-up hands over to the step engine.
#[derive(Debug)]
pub(crate) struct WarmupOutcome {
    pub(crate) cache: EvalCache,
    pub(crate) metric: DiagMassMatrix,
    pub(crate) step_size: f64,
    pub(crate) divergences: u64,
}

/// Paired variance estimators for draws and gradients.
struct VarEstimator {
    draw: ExpWeightedVariance,
    grad: ExpWeightedVariance,
}

impl VarEstimator {
    fn new(dim: usize, alpha: f64, draw_mean: &[f64], grad: &[f64]) -> VarEstimator {
        let mut draw_est = ExpWeightedVariance::new(dim, alpha, true);
        draw_est.set_mean(draw_mean.iter().copied());
        draw_est.set_variance(std::iter::repeat(1f64).take(dim));
        let mut grad_est = ExpWeightedVariance::new(dim, alpha, false);
        grad_est.set_variance(grad.iter().map(|&g| {
            let val = g * g;
            if val.is_finite() && val > 0. {
                val
            } else {
                1.
            }
        }));
        VarEstimator {
            draw: draw_est,
            grad: grad_est,
        }
    }

    fn add(&mut self, draw: &[f64], grad: &[f64]) {
        self.draw.add_sample(draw);
        self.grad.add_sample(grad);
    }

    fn count(&self) -> u64 {
        self.draw.count()
    }

    /// Mass matrix diagonal from the current estimates,
    /// `sqrt(var(draw) / var(grad))` per coordinate.
    fn metric_diag(&self) -> impl Iterator<Item = f64> + '_ {
        izip!(self.draw.current(), self.grad.current()).map(|(&d, &g)| {
            let val = (d / g).sqrt();
            if val.is_nan() {
                1.
            } else {
                val.clamp(LOWER_LIMIT, UPPER_LIMIT)
            }
        })
    }
}

struct WarmupCollector {
    acceptance: AcceptanceRateCollector,
    draw_grad: DrawGradCollector,
}

impl WarmupCollector {
    fn new(dim: usize) -> WarmupCollector {
        WarmupCollector {
            acceptance: AcceptanceRateCollector::new(),
            draw_grad: DrawGradCollector::new(dim),
        }
    }
}

impl Collector for WarmupCollector {
    fn register_leapfrog(&mut self, end: std::result::Result<&EvalCache, &DivergenceInfo>) {
        self.acceptance.register_leapfrog(end);
        self.draw_grad.register_leapfrog(end);
    }

    fn register_draw(&mut self, state: &EvalCache, info: &SampleInfo) {
        self.acceptance.register_draw(state, info);
        self.draw_grad.register_draw(state, info);
    }

    fn register_init(&mut self, state: &EvalCache) {
        self.acceptance.register_init(state);
        self.draw_grad.register_init(state);
    }
}

/// Bracketing search for a reasonable starting step size.
///
/// Doubles or halves the step until a single leapfrog step crosses the
/// target acceptance rate. Falls back to the seed value when the search
/// runs out of bounds.
fn find_initial_step<F, T, R>(
    hamiltonian: &mut EuclideanHamiltonian<'_, F, T, DiagMassMatrix>,
    init: &EvalCache,
    rng: &mut R,
    target_accept: f64,
    fallback: f64,
) -> Result<f64>
where
    F: LogpFunc,
    T: Transform,
    R: Rng + ?Sized,
{
    let mut collector = NullCollector {};
    let state = hamiltonian.randomize_momentum(init, rng);
    let initial_energy = state.energy();

    let mut last_direction = None;
    for _ in 0..100 {
        let accept =
            match hamiltonian.leapfrog(&state, Direction::Forward, initial_energy, &mut collector)? {
                Ok(end) => end.log_acceptance_probability(initial_energy).exp(),
                Err(_) => 0.,
            };
        let direction = if accept > target_accept { 1i32 } else { -1i32 };
        match last_direction {
            None => last_direction = Some(direction),
            Some(last) if last != direction => return Ok(hamiltonian.step_size),
            Some(_) => {}
        }
        if direction > 0 {
            hamiltonian.step_size *= 2.;
        } else {
            hamiltonian.step_size /= 2.;
        }
        if (hamiltonian.step_size > STEP_SIZE_UPPER_LIMIT)
            || (hamiltonian.step_size < STEP_SIZE_LOWER_LIMIT)
        {
            return Ok(fallback);
        }
    }
    Ok(hamiltonian.step_size)
}

/// The acceptance target at a point `time` in `[0, 1]` of the ramp.
fn target_accept_at(time: f64, start: f64, end: f64) -> f64 {
    start + (end - start) * 0.5 * (1. + (6. * (time - 0.6)).tanh())
}

pub(crate) fn run_warmup<F, T, R>(
    rng: &mut R,
    oracle: &mut LogpOracle<F, T>,
    position: &[f64],
    settings: &Settings,
) -> Result<WarmupOutcome>
where
    F: LogpFunc,
    T: Transform,
    R: Rng + ?Sized,
{
    let dim = oracle.dim();
    let opts = &settings.warmup;
    let mut hamiltonian = EuclideanHamiltonian::new(
        oracle,
        DiagMassMatrix::new(dim),
        opts.initial_step,
        settings.max_energy_error,
    );

    let mut cache = hamiltonian.init_cache(position)?;
    if !cache.logp().is_finite() || cache.gradient().iter().any(|g| !g.is_finite()) {
        return Err(SamplerError::WarmupDivergence);
    }

    if opts.grad_based_init {
        let diag: Vec<f64> = cache
            .gradient()
            .iter()
            .map(|&g| {
                let val = (1. / g.abs()).clamp(LOWER_LIMIT, UPPER_LIMIT);
                if val.is_nan() {
                    1.
                } else {
                    val
                }
            })
            .collect();
        hamiltonian.metric.update_diag(diag.into_iter());
    }

    let initial_step = find_initial_step(
        &mut hamiltonian,
        &cache,
        rng,
        settings.target_accept,
        opts.initial_step,
    )?;
    let mut step_size_adapt = DualAverage::new(opts.dual_average, initial_step);

    let mut foreground = VarEstimator::new(
        dim,
        opts.early_variance_decay,
        cache.position(),
        cache.gradient(),
    );
    let mut background = VarEstimator::new(
        dim,
        opts.early_variance_decay,
        cache.position(),
        cache.gradient(),
    );

    let num_early = ((opts.num_tune as f64) * opts.final_window_ratio).ceil() as u64;
    let nuts_options = NutsOptions {
        maxdepth: settings.maxdepth,
    };
    let mut divergences = 0u64;
    let mut had_ok_draw = opts.num_tune == 0;

    for draw_idx in 0..opts.num_tune {
        hamiltonian.step_size = step_size_adapt.current_step_size();
        let mut collector = WarmupCollector::new(dim);
        let (next, info) = match settings.kind {
            SamplerKind::Nuts => nuts::draw(
                &cache,
                rng,
                &mut hamiltonian,
                &nuts_options,
                &mut collector,
            )?,
            SamplerKind::Hmc { num_steps } => {
                draw_hmc(&cache, rng, &mut hamiltonian, num_steps, &mut collector)?
            }
        };
        if info.divergence_info.is_some() {
            divergences += 1;
        } else {
            had_ok_draw = true;
        }
        cache = next;

        let time = if num_early == 0 {
            1.
        } else {
            ((draw_idx as f64) / (num_early as f64)).min(1.)
        };
        let target = target_accept_at(time, opts.early_target_accept, settings.target_accept);
        if collector.acceptance.mean.count() > 0 {
            step_size_adapt.advance(collector.acceptance.mean.current(), target);
        }

        // The trailing window only tunes the step size.
        if draw_idx + opts.mass_matrix_final_window >= opts.num_tune {
            continue;
        }

        if collector.draw_grad.is_good {
            foreground.add(&collector.draw_grad.draw, &collector.draw_grad.grad);
            background.add(&collector.draw_grad.draw, &collector.draw_grad.grad);
        }

        let switch = if draw_idx < opts.window_switch_freq {
            background.count() >= opts.early_window_switch_freq
        } else {
            (draw_idx % opts.window_switch_freq == 0) && (background.count() > 5)
        };
        if switch {
            foreground = std::mem::replace(
                &mut background,
                VarEstimator::new(
                    dim,
                    opts.variance_decay,
                    &collector.draw_grad.draw,
                    &collector.draw_grad.grad,
                ),
            );
        }

        if foreground.count() > 2 {
            hamiltonian.metric.update_diag(foreground.metric_diag());
        }
    }

    if !had_ok_draw {
        return Err(SamplerError::WarmupDivergence);
    }

    let step_size = step_size_adapt.current_step_size_adapted();
    if !step_size.is_finite() || step_size <= 0. {
        return Err(SamplerError::WarmupDivergence);
    }

    Ok(WarmupOutcome {
        cache,
        metric: hamiltonian.metric,
        step_size,
        divergences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{GradientBackend, LogpError};
    use crate::transform::{IdentityTransform, ParamSpace, ParamSubset};
    use rand::SeedableRng;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum Never {}
    impl LogpError for Never {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    struct ScaledNormal {
        sigma: Vec<f64>,
    }

    impl LogpFunc for ScaledNormal {
        type Err = Never;
        fn dim(&self) -> usize {
            self.sigma.len()
        }
        fn logp(
            &mut self,
            position: &[f64],
            gradient: &mut [f64],
        ) -> std::result::Result<f64, Never> {
            let mut logp = 0f64;
            for ((p, g), s) in position.iter().zip(gradient.iter_mut()).zip(&self.sigma) {
                logp -= p * p / (2. * s * s);
                *g = -p / (s * s);
            }
            Ok(logp)
        }
    }

    fn oracle(sigma: Vec<f64>) -> LogpOracle<ScaledNormal, IdentityTransform> {
        let dim = sigma.len();
        let space =
            ParamSpace::new(IdentityTransform, vec![0.; dim], ParamSubset::all()).unwrap();
        LogpOracle::new(ScaledNormal { sigma }, space, GradientBackend::Analytic)
    }

    #[test]
    fn warmup_learns_scales() {
        let mut oracle = oracle(vec![0.1, 10.]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let settings = Settings::default();

        let outcome = run_warmup(&mut rng, &mut oracle, &[0.05, 2.], &settings).unwrap();
        assert!(outcome.step_size.is_finite() && outcome.step_size > 0.);
        assert!(outcome.metric.is_positive_definite());

        // The learned inverse mass should reflect the variance ordering.
        let variance = outcome.metric.variance();
        assert!(variance[0] < variance[1]);
    }

    #[test]
    fn impossible_density_fails_warmup() {
        struct NegInf;
        impl LogpFunc for NegInf {
            type Err = Never;
            fn dim(&self) -> usize {
                1
            }
            fn logp(
                &mut self,
                _position: &[f64],
                gradient: &mut [f64],
            ) -> std::result::Result<f64, Never> {
                gradient[0] = 0.;
                Ok(f64::NEG_INFINITY)
            }
        }

        let space = ParamSpace::new(IdentityTransform, vec![0.], ParamSubset::all()).unwrap();
        let mut oracle = LogpOracle::new(NegInf, space, GradientBackend::Analytic);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let settings = Settings::default();

        let err = run_warmup(&mut rng, &mut oracle, &[0.], &settings).unwrap_err();
        assert!(matches!(err, SamplerError::WarmupDivergence));
    }

    #[test]
    fn target_ramp_is_monotone() {
        let start = 0.5;
        let end = 0.8;
        let mut last = 0.;
        for i in 0..=10 {
            let val = target_accept_at(i as f64 / 10., start, end);
            assert!(val >= last);
            assert!((start..=end).contains(&val));
            last = val;
        }
        assert!(target_accept_at(1., start, end) > 0.75);
    }
}
