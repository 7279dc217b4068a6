//! Step-wise adaptive HMC and no-U-turn sampling.
//!
//! The crate is built around two operations: [`initial_step`] sets up a
//! chain (transforms the initial draw, runs warm-up, and returns the first
//! reportable draw together with an opaque chain state), and [`step`]
//! consumes a state and returns the next draw plus the successor state.
//! Warm-up jointly adapts a diagonal mass matrix and the leapfrog step
//! size; after warm-up both are frozen, and the mass matrix is shared
//! between all successor states of a chain.
//!
//! Models implement [`Model`] with a [`LogpFunc`] for the log-density and
//! a [`Transform`] that maps bounded parameters to the unconstrained space
//! the sampler works in. For models without gradients a finite-difference
//! backend is available via [`GradientBackend`].
//!
//! Divergent trajectories are diagnostics, not errors: they are reported
//! on the [`Transition`] and the chain continues from its previous
//! position. Only transform failures, unrecoverable log-density errors and
//! a failed warm-up abort a chain.

pub(crate) mod chain;
pub(crate) mod hamiltonian;
pub(crate) mod hmc;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod oracle;
pub(crate) mod sampler;
pub(crate) mod state;
pub(crate) mod stepsize;
pub(crate) mod transform;
pub(crate) mod warmup;

pub use chain::{initial_step, step, SamplerState, Transition};
pub use hamiltonian::DivergenceInfo;
pub use mass_matrix::DiagMassMatrix;
pub use model::Model;
pub use nuts::{Result, SampleInfo, SamplerError};
pub use oracle::{GradientBackend, LogpError, LogpFunc, LogpOracle};
pub use sampler::{sample_parallel, ChainTrace, SamplerKind, Settings};
pub use state::EvalCache;
pub use stepsize::DualAverageOptions;
pub use transform::{
    IdentityTransform, InitialDraw, LowerBoundedTransform, ParamSpace, ParamSubset, Transform,
    TransformError,
};
pub use warmup::WarmupOptions;
