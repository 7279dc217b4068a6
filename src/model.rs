//! The user-facing model description.

use rand::Rng;

use crate::oracle::LogpFunc;
use crate::transform::Transform;

/// A posterior a chain can sample from.
///
/// Each chain calls [`Model::logp_func`] and [`Model::transform`] once at
/// initialization, so implementations can hand out per-chain evaluation
/// contexts that are not `Sync` themselves.
pub trait Model: Send + Sync {
    type Logp: LogpFunc;
    type Trans: Transform;

    /// Build a log-density function for one chain.
    fn logp_func(&self) -> anyhow::Result<Self::Logp>;

    /// Build the parameter transform for one chain.
    fn transform(&self) -> anyhow::Result<Self::Trans>;

    /// Generate an initial constrained position.
    fn init_position<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        position: &mut [f64],
    ) -> anyhow::Result<()>;
}
