//! The evaluation cache threaded between steps.
//!
//! A cache bundles one point in phase space with everything the engine
//! needs to resume stepping without recomputation: position, gradient,
//! momentum, velocity, the running momentum sum of the current trajectory,
//! and the energy terms. It is produced only by warm-up or the step engine
//! and consumed only by the step engine; everything else treats it as
//! opaque.

use std::sync::Arc;

use crate::math::{scalar_prods2, scalar_prods3};

#[derive(Debug)]
pub(crate) struct InnerCache {
    pub(crate) q: Box<[f64]>,
    pub(crate) p: Box<[f64]>,
    pub(crate) v: Box<[f64]>,
    pub(crate) p_sum: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) idx_in_trajectory: i64,
    pub(crate) kinetic_energy: f64,
    pub(crate) potential_energy: f64,
}

/// A cached log-density evaluation plus engine bookkeeping.
///
/// Values are immutable once built; clones share the underlying snapshot,
/// so a new state never mutates a previous one.
#[derive(Debug, Clone)]
pub struct EvalCache {
    inner: Arc<InnerCache>,
}

impl EvalCache {
    pub(crate) fn from_inner(inner: InnerCache) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inner(&self) -> &InnerCache {
        &self.inner
    }

    /// The unconstrained position of this evaluation.
    pub fn position(&self) -> &[f64] {
        &self.inner.q
    }

    /// The log-density at the position, including Jacobian adjustment.
    pub fn logp(&self) -> f64 {
        -self.inner.potential_energy
    }

    pub(crate) fn gradient(&self) -> &[f64] {
        &self.inner.grad
    }

    pub(crate) fn energy(&self) -> f64 {
        self.inner.kinetic_energy + self.inner.potential_energy
    }

    pub(crate) fn index_in_trajectory(&self) -> i64 {
        self.inner.idx_in_trajectory
    }

    pub(crate) fn log_acceptance_probability(&self, initial_energy: f64) -> f64 {
        (initial_energy - self.energy()).min(0.)
    }

    /// The generalized U-turn criterion between two ends of a trajectory
    /// segment.
    pub(crate) fn is_turning(&self, other: &Self) -> bool {
        let (start, end) = if self.index_in_trajectory() < other.index_in_trajectory() {
            (self.inner(), other.inner())
        } else {
            (other.inner(), self.inner())
        };

        let a = start.idx_in_trajectory;
        let b = end.idx_in_trajectory;
        assert!(a < b);

        let (turn1, turn2) = if (a >= 0) & (b >= 0) {
            scalar_prods3(&end.p_sum, &start.p_sum, &start.p, &end.v, &start.v)
        } else if (b >= 0) & (a < 0) {
            scalar_prods2(&end.p_sum, &start.p_sum, &end.v, &start.v)
        } else {
            assert!((a < 0) & (b < 0));
            scalar_prods3(&start.p_sum, &end.p_sum, &end.p, &end.v, &start.v)
        };

        (turn1 < 0.) | (turn2 < 0.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(idx: i64, p: Vec<f64>, p_sum: Vec<f64>, v: Vec<f64>) -> EvalCache {
        let dim = p.len();
        EvalCache::from_inner(InnerCache {
            q: vec![0.; dim].into(),
            p: p.into(),
            v: v.into(),
            p_sum: p_sum.into(),
            grad: vec![0.; dim].into(),
            idx_in_trajectory: idx,
            kinetic_energy: 0.,
            potential_energy: 0.,
        })
    }

    #[test]
    fn straight_trajectory_is_not_turning() {
        let start = cache(0, vec![1., 0.], vec![1., 0.], vec![1., 0.]);
        let end = cache(3, vec![1., 0.], vec![4., 0.], vec![1., 0.]);
        assert!(!start.is_turning(&end));
        assert!(!end.is_turning(&start));
    }

    #[test]
    fn reversed_momentum_is_turning() {
        let start = cache(0, vec![1., 0.], vec![1., 0.], vec![1., 0.]);
        let end = cache(2, vec![-1., 0.], vec![-1., 0.], vec![-1., 0.]);
        assert!(start.is_turning(&end));
    }

    #[test]
    fn clones_share_the_snapshot() {
        let a = cache(0, vec![1.], vec![1.], vec![1.]);
        let b = a.clone();
        assert_eq!(a.position().as_ptr(), b.position().as_ptr());
    }
}
