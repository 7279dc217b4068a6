//! Parameter-space transforms between constrained and unconstrained
//! coordinates.
//!
//! Gradient based samplers work on an unconstrained space. A [`Transform`]
//! maps each sampled coordinate between the model's constrained
//! representation and that space, and provides the Jacobian terms the
//! log-density oracle needs. A [`ParamSpace`] binds a transform to the
//! concrete parameter vector of a model, optionally restricted to a subset
//! of the coordinates.

use thiserror::Error;

/// Errors while mapping between constrained and unconstrained coordinates.
///
/// These are fatal: they surface from `initial_step` and are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("constrained value {value} at index {index} is outside the transform's support")]
    OutOfSupport { index: usize, value: f64 },
    #[error("parameter vector has length {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("transform produced a non-finite unconstrained value at index {index}")]
    NonFinite { index: usize },
    #[error("subset index {index} is out of bounds for a parameter vector of length {dim}")]
    BadSubsetIndex { index: usize, dim: usize },
}

/// An elementwise bijection between constrained and unconstrained space.
///
/// `index` is the position of the coordinate within the sampled subset, so
/// implementations can vary the mapping per coordinate.
pub trait Transform: Send + Sync {
    /// Map a constrained value to unconstrained space.
    fn link_one(&self, index: usize, value: f64) -> Result<f64, TransformError>;

    /// Map an unconstrained value back to constrained space.
    fn unlink_one(&self, index: usize, value: f64) -> f64;

    /// log |dx/dz| at the unconstrained value `value`.
    fn log_jacobian_one(&self, index: usize, value: f64) -> f64;

    /// dx/dz at the unconstrained value `value`.
    fn jacobian_one(&self, index: usize, value: f64) -> f64;

    /// d log |dx/dz| / dz at the unconstrained value `value`.
    fn grad_log_jacobian_one(&self, index: usize, value: f64) -> f64;
}

/// The trivial transform for parameters with unbounded support.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn link_one(&self, index: usize, value: f64) -> Result<f64, TransformError> {
        if !value.is_finite() {
            return Err(TransformError::NonFinite { index });
        }
        Ok(value)
    }

    fn unlink_one(&self, _index: usize, value: f64) -> f64 {
        value
    }

    fn log_jacobian_one(&self, _index: usize, _value: f64) -> f64 {
        0.
    }

    fn jacobian_one(&self, _index: usize, _value: f64) -> f64 {
        1.
    }

    fn grad_log_jacobian_one(&self, _index: usize, _value: f64) -> f64 {
        0.
    }
}

/// Log transform for parameters bounded below: `x = lower + exp(z)`.
#[derive(Debug, Clone, Copy)]
pub struct LowerBoundedTransform {
    pub lower: f64,
}

impl LowerBoundedTransform {
    pub fn new(lower: f64) -> Self {
        Self { lower }
    }
}

impl Transform for LowerBoundedTransform {
    fn link_one(&self, index: usize, value: f64) -> Result<f64, TransformError> {
        let excess = value - self.lower;
        if !(excess > 0.) {
            return Err(TransformError::OutOfSupport { index, value });
        }
        let linked = excess.ln();
        if !linked.is_finite() {
            return Err(TransformError::NonFinite { index });
        }
        Ok(linked)
    }

    fn unlink_one(&self, _index: usize, value: f64) -> f64 {
        self.lower + value.exp()
    }

    fn log_jacobian_one(&self, _index: usize, value: f64) -> f64 {
        value
    }

    fn jacobian_one(&self, _index: usize, value: f64) -> f64 {
        value.exp()
    }

    fn grad_log_jacobian_one(&self, _index: usize, _value: f64) -> f64 {
        1.
    }
}

/// Which coordinates of the full constrained vector this sampler owns.
///
/// An empty subset means all coordinates are sampled. A non-empty subset is
/// used when this sampler is composed with others that update the remaining
/// coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSubset(Vec<usize>);

impl ParamSubset {
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn indices(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    fn resolve(&self, full_dim: usize) -> Result<Vec<usize>, TransformError> {
        if self.0.is_empty() {
            return Ok((0..full_dim).collect());
        }
        for &index in &self.0 {
            if index >= full_dim {
                return Err(TransformError::BadSubsetIndex {
                    index,
                    dim: full_dim,
                });
            }
        }
        Ok(self.0.clone())
    }
}

/// An initial draw handed to `initial_step`.
///
/// A constrained draw covers the full parameter vector; an unconstrained
/// draw covers only the sampled subset and passes through `link` unchanged.
#[derive(Debug, Clone)]
pub enum InitialDraw {
    Constrained(Vec<f64>),
    Unconstrained(Vec<f64>),
}

/// A model's parameter vector in constrained and unconstrained coordinates.
///
/// Holds the transform, the sampled subset and a template of the full
/// constrained vector. Coordinates outside the subset keep their template
/// values when positions are written back.
pub struct ParamSpace<T: Transform> {
    transform: T,
    subset: Vec<usize>,
    template: Vec<f64>,
}

impl<T: Transform> ParamSpace<T> {
    pub fn new(transform: T, template: Vec<f64>, subset: ParamSubset) -> Result<Self, TransformError> {
        let subset = subset.resolve(template.len())?;
        Ok(Self {
            transform,
            subset,
            template,
        })
    }

    /// Number of sampled (unconstrained) coordinates.
    pub fn dim(&self) -> usize {
        self.subset.len()
    }

    /// Length of the full constrained parameter vector.
    pub fn full_dim(&self) -> usize {
        self.template.len()
    }

    /// Transform an initial draw into unconstrained coordinates.
    ///
    /// Idempotent: a draw that is already unconstrained is returned
    /// unchanged, so `link(link(x))` equals `link(x)`.
    pub fn link(&self, draw: &InitialDraw) -> Result<Vec<f64>, TransformError> {
        match draw {
            InitialDraw::Unconstrained(z) => {
                if z.len() != self.dim() {
                    return Err(TransformError::DimensionMismatch {
                        expected: self.dim(),
                        got: z.len(),
                    });
                }
                Ok(z.clone())
            }
            InitialDraw::Constrained(x) => {
                if x.len() != self.full_dim() {
                    return Err(TransformError::DimensionMismatch {
                        expected: self.full_dim(),
                        got: x.len(),
                    });
                }
                self.subset
                    .iter()
                    .enumerate()
                    .map(|(k, &i)| self.transform.link_one(k, x[i]))
                    .collect()
            }
        }
    }

    /// Write the constrained image of `z` into a full parameter vector.
    pub fn constrain_into(&self, z: &[f64], out: &mut [f64]) {
        assert!(z.len() == self.dim());
        assert!(out.len() == self.full_dim());
        out.copy_from_slice(&self.template);
        for (k, &i) in self.subset.iter().enumerate() {
            out[i] = self.transform.unlink_one(k, z[k]);
        }
    }

    /// The full constrained parameter vector at the unconstrained point `z`.
    pub fn constrain(&self, z: &[f64]) -> Vec<f64> {
        let mut out = vec![0f64; self.full_dim()];
        self.constrain_into(z, &mut out);
        out
    }

    /// Total log-Jacobian adjustment at `z`.
    pub(crate) fn log_jacobian(&self, z: &[f64]) -> f64 {
        z.iter()
            .enumerate()
            .map(|(k, &val)| self.transform.log_jacobian_one(k, val))
            .sum()
    }

    /// Pull a constrained-space gradient back to unconstrained space,
    /// including the log-Jacobian gradient.
    pub(crate) fn pull_gradient(&self, z: &[f64], grad_full: &[f64], grad_z: &mut [f64]) {
        assert!(z.len() == self.dim());
        assert!(grad_full.len() == self.full_dim());
        assert!(grad_z.len() == self.dim());
        for (k, &i) in self.subset.iter().enumerate() {
            grad_z[k] = grad_full[i] * self.transform.jacobian_one(k, z[k])
                + self.transform.grad_log_jacobian_one(k, z[k]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn space(template: Vec<f64>) -> ParamSpace<IdentityTransform> {
        ParamSpace::new(IdentityTransform, template, ParamSubset::all()).unwrap()
    }

    proptest! {
        #[test]
        fn link_is_idempotent(values in proptest::collection::vec(-100f64..100f64, 1..20)) {
            let space = space(values.clone());
            let once = space.link(&InitialDraw::Constrained(values)).unwrap();
            let twice = space.link(&InitialDraw::Unconstrained(once.clone())).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn lower_bounded_round_trip(value in 1e-6f64..1e6f64) {
            let transform = LowerBoundedTransform::new(0.);
            let z = transform.link_one(0, value).unwrap();
            let back = transform.unlink_one(0, z);
            prop_assert!((back - value).abs() <= 1e-10 * value.abs());
        }
    }

    #[test]
    fn lower_bounded_rejects_out_of_support() {
        let transform = LowerBoundedTransform::new(1.);
        assert!(matches!(
            transform.link_one(0, 0.5),
            Err(TransformError::OutOfSupport { index: 0, .. })
        ));
        assert!(matches!(
            transform.link_one(2, 1.),
            Err(TransformError::OutOfSupport { index: 2, .. })
        ));
    }

    #[test]
    fn subset_scatters_into_template() {
        let space = ParamSpace::new(
            IdentityTransform,
            vec![10., 20., 30., 40.],
            ParamSubset::indices(vec![1, 3]),
        )
        .unwrap();
        assert_eq!(space.dim(), 2);
        assert_eq!(space.full_dim(), 4);

        let z = space
            .link(&InitialDraw::Constrained(vec![10., 20., 30., 40.]))
            .unwrap();
        assert_eq!(z, vec![20., 40.]);

        let full = space.constrain(&[-1., -2.]);
        assert_eq!(full, vec![10., -1., 30., -2.]);
    }

    #[test]
    fn bad_subset_index_is_rejected() {
        let err = ParamSpace::new(IdentityTransform, vec![0.; 3], ParamSubset::indices(vec![3]))
            .err()
            .unwrap();
        assert_eq!(err, TransformError::BadSubsetIndex { index: 3, dim: 3 });
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let space = space(vec![0.; 3]);
        assert!(matches!(
            space.link(&InitialDraw::Constrained(vec![0.; 2])),
            Err(TransformError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }
}
