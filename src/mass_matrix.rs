use itertools::izip;

use crate::math::{multiply, vector_dot};
use crate::nuts::{Collector, SampleInfo};
use crate::state::EvalCache;

/// A symmetric positive-definite metric over unconstrained space.
pub trait MassMatrix: Send + Sync {
    fn update_velocity(&self, p: &[f64], v: &mut [f64]);
    fn kinetic_energy(&self, p: &[f64], v: &[f64]) -> f64;
    fn randomize_momentum<R: rand::Rng + ?Sized>(&self, rng: &mut R, p: &mut [f64]);
}

impl<M: MassMatrix> MassMatrix for &M {
    fn update_velocity(&self, p: &[f64], v: &mut [f64]) {
        (**self).update_velocity(p, v)
    }

    fn kinetic_energy(&self, p: &[f64], v: &[f64]) -> f64 {
        (**self).kinetic_energy(p, v)
    }

    fn randomize_momentum<R: rand::Rng + ?Sized>(&self, rng: &mut R, p: &mut [f64]) {
        (**self).randomize_momentum(rng, p)
    }
}

/// A diagonal mass matrix, stored as the posterior variance estimate
/// (the inverse mass) together with the momentum standard deviations.
#[derive(Debug, Clone)]
pub struct DiagMassMatrix {
    inv_stds: Box<[f64]>,
    variance: Box<[f64]>,
}

impl DiagMassMatrix {
    pub(crate) fn new(ndim: usize) -> Self {
        Self {
            inv_stds: vec![1f64; ndim].into(),
            variance: vec![1f64; ndim].into(),
        }
    }

    pub(crate) fn update_diag(&mut self, new_variance: impl Iterator<Item = f64>) {
        update_diag(&mut self.variance, &mut self.inv_stds, new_variance);
    }

    /// The diagonal of the inverse mass matrix.
    pub fn variance(&self) -> &[f64] {
        &self.variance
    }

    pub fn is_positive_definite(&self) -> bool {
        self.variance.iter().all(|&val| val.is_finite() && val > 0.)
    }
}

fn update_diag(
    variance_out: &mut [f64],
    inv_std_out: &mut [f64],
    new_variance: impl Iterator<Item = f64>,
) {
    izip!(variance_out, inv_std_out, new_variance).for_each(|(var, inv_std, x)| {
        assert!(x.is_finite(), "Illegal value on mass matrix: {}", x);
        assert!(x > 0f64, "Illegal value on mass matrix: {}", x);
        *var = x;
        *inv_std = (1. / x).sqrt();
    });
}

impl MassMatrix for DiagMassMatrix {
    fn update_velocity(&self, p: &[f64], v: &mut [f64]) {
        multiply(&self.variance, p, v);
    }

    fn kinetic_energy(&self, p: &[f64], v: &[f64]) -> f64 {
        0.5 * vector_dot(p, v)
    }

    fn randomize_momentum<R: rand::Rng + ?Sized>(&self, rng: &mut R, p: &mut [f64]) {
        let dist = rand_distr::StandardNormal;
        p.iter_mut().zip(self.inv_stds.iter()).for_each(|(p, &s)| {
            let norm: f64 = rng.sample(dist);
            *p = s * norm;
        });
    }
}

/// Exponentially weighted running variance estimator used during warm-up.
#[derive(Debug)]
pub(crate) struct ExpWeightedVariance {
    mean: Box<[f64]>,
    variance: Box<[f64]>,
    count: u64,
    alpha: f64,
    use_mean: bool,
}

impl ExpWeightedVariance {
    pub(crate) fn new(dim: usize, alpha: f64, use_mean: bool) -> Self {
        ExpWeightedVariance {
            mean: vec![0f64; dim].into(),
            variance: vec![0f64; dim].into(),
            count: 0,
            alpha,
            use_mean,
        }
    }

    pub(crate) fn set_mean(&mut self, values: impl Iterator<Item = f64>) {
        self.mean
            .iter_mut()
            .zip(values)
            .for_each(|(out, val)| *out = val);
    }

    pub(crate) fn set_variance(&mut self, values: impl Iterator<Item = f64>) {
        self.variance
            .iter_mut()
            .zip(values)
            .for_each(|(out, val)| *out = val);
    }

    pub(crate) fn add_sample(&mut self, value: &[f64]) {
        add_sample(self, value);
        self.count += 1;
    }

    pub(crate) fn current(&self) -> &[f64] {
        &self.variance
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

fn add_sample(self_: &mut ExpWeightedVariance, value: &[f64]) {
    if self_.use_mean {
        izip!(value, self_.mean.iter_mut(), self_.variance.iter_mut()).for_each(
            |(&x, mean, var)| {
                let delta = x - *mean;
                *mean = self_.alpha.mul_add(delta, *mean);
                *var = (1f64 - self_.alpha) * (*var + self_.alpha * delta * delta);
            },
        );
    } else {
        izip!(value, self_.mean.iter_mut(), self_.variance.iter_mut()).for_each(
            |(&x, _mean, var)| {
                *var = (1f64 - self_.alpha) * (*var + self_.alpha * x * x);
            },
        );
    }
}

/// Collects the accepted draw and its gradient for mass matrix adaptation.
pub(crate) struct DrawGradCollector {
    pub(crate) draw: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) is_good: bool,
}

impl DrawGradCollector {
    pub(crate) fn new(dim: usize) -> Self {
        DrawGradCollector {
            draw: vec![0f64; dim].into(),
            grad: vec![0f64; dim].into(),
            is_good: true,
        }
    }
}

impl Collector for DrawGradCollector {
    fn register_draw(&mut self, state: &EvalCache, info: &SampleInfo) {
        self.draw.copy_from_slice(state.position());
        self.grad.copy_from_slice(state.gradient());
        let idx = state.index_in_trajectory();
        if info.divergence_info.is_some() {
            self.is_good = (idx <= -4) | (idx >= 4);
        } else {
            self.is_good = idx != 0;
        }
    }
}
