//! Leapfrog dynamics over the unconstrained space.

use std::error::Error;
use std::sync::Arc;

use crate::mass_matrix::MassMatrix;
use crate::math::{axpy, axpy_out};
use crate::nuts::{Direction, Result, SamplerError};
use crate::oracle::{LogpError, LogpFunc, LogpOracle};
use crate::state::{EvalCache, InnerCache};
use crate::transform::Transform;

/// Details about a divergent trajectory.
///
/// Attached to the draw that rejected the trajectory; sampling continues
/// from the previous position.
#[derive(Debug, Clone, Default)]
pub struct DivergenceInfo {
    pub start_location: Option<Box<[f64]>>,
    pub end_location: Option<Box<[f64]>>,
    pub energy_error: Option<f64>,
    pub end_idx_in_trajectory: Option<i64>,
    pub logp_function_error: Option<Arc<dyn Error + Send + Sync>>,
}

/// The dynamics the trajectory builders step through.
pub(crate) trait Hamiltonian {
    /// Perform one leapfrog step.
    ///
    /// The outer error aborts sampling; the inner one is a divergence and
    /// rejects only the current trajectory.
    fn leapfrog<C: crate::nuts::Collector>(
        &mut self,
        start: &EvalCache,
        dir: Direction,
        initial_energy: f64,
        collector: &mut C,
    ) -> Result<std::result::Result<EvalCache, DivergenceInfo>>;

    /// Evaluate the log-density at a new position, with zero momentum.
    fn init_cache(&mut self, position: &[f64]) -> Result<EvalCache>;

    /// Resample the momentum of a cached evaluation.
    fn randomize_momentum<R: rand::Rng + ?Sized>(
        &self,
        cache: &EvalCache,
        rng: &mut R,
    ) -> EvalCache;

    fn dim(&self) -> usize;
}

/// Euclidean dynamics with a fixed metric and step size.
pub(crate) struct EuclideanHamiltonian<'o, F: LogpFunc, T: Transform, M: MassMatrix> {
    oracle: &'o mut LogpOracle<F, T>,
    pub(crate) metric: M,
    pub(crate) step_size: f64,
    max_energy_error: f64,
}

impl<'o, F: LogpFunc, T: Transform, M: MassMatrix> EuclideanHamiltonian<'o, F, T, M> {
    pub(crate) fn new(
        oracle: &'o mut LogpOracle<F, T>,
        metric: M,
        step_size: f64,
        max_energy_error: f64,
    ) -> Self {
        Self {
            oracle,
            metric,
            step_size,
            max_energy_error,
        }
    }

    fn divergence(
        &self,
        start: &EvalCache,
        end: Option<&InnerCache>,
        energy_error: Option<f64>,
        logp_function_error: Option<Arc<dyn Error + Send + Sync>>,
    ) -> DivergenceInfo {
        DivergenceInfo {
            start_location: Some(start.position().into()),
            end_location: end.map(|inner| inner.q.clone()),
            energy_error,
            end_idx_in_trajectory: end.map(|inner| inner.idx_in_trajectory),
            logp_function_error,
        }
    }
}

impl<F: LogpFunc, T: Transform, M: MassMatrix> Hamiltonian for EuclideanHamiltonian<'_, F, T, M> {
    fn leapfrog<C: crate::nuts::Collector>(
        &mut self,
        start: &EvalCache,
        dir: Direction,
        initial_energy: f64,
        collector: &mut C,
    ) -> Result<std::result::Result<EvalCache, DivergenceInfo>> {
        let dim = self.dim();
        let sign = match dir {
            Direction::Forward => 1i64,
            Direction::Backward => -1i64,
        };
        let epsilon = (sign as f64) * self.step_size;

        let inner = start.inner();
        let mut q = vec![0f64; dim].into_boxed_slice();
        let mut p = vec![0f64; dim].into_boxed_slice();
        let mut v = vec![0f64; dim].into_boxed_slice();
        let mut grad = vec![0f64; dim].into_boxed_slice();

        // First momentum half step and the full position step.
        axpy_out(&inner.grad, &inner.p, epsilon / 2., &mut p);
        self.metric.update_velocity(&p, &mut v);
        axpy_out(&v, &inner.q, epsilon, &mut q);

        let logp = match self.oracle.evaluate(&q, &mut grad) {
            Ok(logp) => logp,
            Err(err) => {
                if err.is_recoverable() {
                    let info = self.divergence(start, None, None, Some(Arc::new(err)));
                    collector.register_leapfrog(Err(&info));
                    return Ok(Err(info));
                }
                return Err(SamplerError::LogpFailure(Box::new(err)));
            }
        };

        // Second momentum half step.
        axpy(&grad, &mut p, epsilon / 2.);
        self.metric.update_velocity(&p, &mut v);
        let kinetic_energy = self.metric.kinetic_energy(&p, &v);

        let idx = inner.idx_in_trajectory + sign;
        let mut p_sum = vec![0f64; dim].into_boxed_slice();
        if idx == -1 {
            p_sum.copy_from_slice(&p);
        } else {
            axpy_out(&p, &inner.p_sum, 1., &mut p_sum);
        }

        let out = InnerCache {
            q,
            p,
            v,
            p_sum,
            grad,
            idx_in_trajectory: idx,
            kinetic_energy,
            potential_energy: -logp,
        };

        let energy_error = out.kinetic_energy + out.potential_energy - initial_energy;
        if (energy_error.abs() > self.max_energy_error) || !energy_error.is_finite() {
            let info = self.divergence(start, Some(&out), Some(energy_error), None);
            collector.register_leapfrog(Err(&info));
            return Ok(Err(info));
        }

        let out = EvalCache::from_inner(out);
        collector.register_leapfrog(Ok(&out));
        Ok(Ok(out))
    }

    fn init_cache(&mut self, position: &[f64]) -> Result<EvalCache> {
        let dim = self.dim();
        assert!(position.len() == dim);
        let mut grad = vec![0f64; dim].into_boxed_slice();
        let logp = self
            .oracle
            .evaluate(position, &mut grad)
            .map_err(|err| SamplerError::LogpFailure(Box::new(err)))?;
        Ok(EvalCache::from_inner(InnerCache {
            q: position.into(),
            p: vec![0f64; dim].into(),
            v: vec![0f64; dim].into(),
            p_sum: vec![0f64; dim].into(),
            grad,
            idx_in_trajectory: 0,
            kinetic_energy: 0.,
            potential_energy: -logp,
        }))
    }

    fn randomize_momentum<R: rand::Rng + ?Sized>(
        &self,
        cache: &EvalCache,
        rng: &mut R,
    ) -> EvalCache {
        let inner = cache.inner();
        let dim = inner.q.len();
        let mut p = vec![0f64; dim].into_boxed_slice();
        let mut v = vec![0f64; dim].into_boxed_slice();
        self.metric.randomize_momentum(rng, &mut p);
        self.metric.update_velocity(&p, &mut v);
        let kinetic_energy = self.metric.kinetic_energy(&p, &v);
        EvalCache::from_inner(InnerCache {
            q: inner.q.clone(),
            p_sum: p.clone(),
            p,
            v,
            grad: inner.grad.clone(),
            idx_in_trajectory: 0,
            kinetic_energy,
            potential_energy: inner.potential_energy,
        })
    }

    fn dim(&self) -> usize {
        self.oracle.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mass_matrix::DiagMassMatrix;
    use crate::nuts::NullCollector;
    use crate::oracle::GradientBackend;
    use crate::transform::{IdentityTransform, ParamSpace, ParamSubset};
    use approx::assert_abs_diff_eq;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum Never {}
    impl LogpError for Never {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    struct StdNormal;
    impl LogpFunc for StdNormal {
        type Err = Never;
        fn dim(&self) -> usize {
            2
        }
        fn logp(
            &mut self,
            position: &[f64],
            gradient: &mut [f64],
        ) -> std::result::Result<f64, Never> {
            let mut logp = 0f64;
            for (p, g) in position.iter().zip(gradient.iter_mut()) {
                logp -= p * p / 2.;
                *g = -p;
            }
            Ok(logp)
        }
    }

    fn oracle() -> LogpOracle<StdNormal, IdentityTransform> {
        let space = ParamSpace::new(IdentityTransform, vec![0.; 2], ParamSubset::all()).unwrap();
        LogpOracle::new(StdNormal, space, GradientBackend::Analytic)
    }

    #[test]
    fn leapfrog_nearly_conserves_energy() {
        let mut oracle = oracle();
        let mut ham =
            EuclideanHamiltonian::new(&mut oracle, DiagMassMatrix::new(2), 0.01, 1000.);
        let init = ham.init_cache(&[1., -0.5]).unwrap();
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(7);
        let mut state = ham.randomize_momentum(&init, &mut rng);
        let initial_energy = state.energy();

        let mut collector = NullCollector {};
        for _ in 0..100 {
            state = ham
                .leapfrog(&state, Direction::Forward, initial_energy, &mut collector)
                .unwrap()
                .unwrap();
        }
        assert_eq!(state.index_in_trajectory(), 100);
        assert_abs_diff_eq!(state.energy(), initial_energy, epsilon = 1e-2);
    }

    #[test]
    fn huge_step_size_diverges() {
        let mut oracle = oracle();
        let mut ham = EuclideanHamiltonian::new(&mut oracle, DiagMassMatrix::new(2), 100., 1000.);
        let init = ham.init_cache(&[1., 1.]).unwrap();
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(11);
        let state = ham.randomize_momentum(&init, &mut rng);
        let initial_energy = state.energy();

        let mut collector = NullCollector {};
        let mut diverged = false;
        let mut state = state;
        for _ in 0..50 {
            match ham
                .leapfrog(&state, Direction::Forward, initial_energy, &mut collector)
                .unwrap()
            {
                Ok(next) => state = next,
                Err(info) => {
                    assert!(info.start_location.is_some());
                    diverged = true;
                    break;
                }
            }
        }
        assert!(diverged);
    }
}
