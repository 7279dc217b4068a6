//! Fixed trajectory length HMC with a Metropolis correction.

use rand::Rng;

use crate::hamiltonian::Hamiltonian;
use crate::nuts::{Collector, Direction, Result, SampleInfo};
use crate::state::EvalCache;

/// Perform a single draw with `num_steps` leapfrog steps.
///
/// A divergence anywhere along the trajectory rejects the whole draw, as
/// does a failed Metropolis test; either way sampling continues from the
/// previous position with fresh momentum.
pub(crate) fn draw_hmc<H, R, C>(
    init: &EvalCache,
    rng: &mut R,
    hamiltonian: &mut H,
    num_steps: u64,
    collector: &mut C,
) -> Result<(EvalCache, SampleInfo)>
where
    H: Hamiltonian,
    R: Rng + ?Sized,
    C: Collector,
{
    let start = hamiltonian.randomize_momentum(init, rng);
    collector.register_init(&start);
    let initial_energy = start.energy();

    let mut end = start.clone();
    for completed in 0..num_steps {
        end = match hamiltonian.leapfrog(&end, Direction::Forward, initial_energy, collector)? {
            Ok(end) => end,
            Err(divergence_info) => {
                let info = SampleInfo {
                    depth: completed,
                    reached_maxdepth: false,
                    divergence_info: Some(divergence_info),
                };
                collector.register_draw(&start, &info);
                return Ok((start, info));
            }
        };
    }

    let info = SampleInfo {
        depth: num_steps,
        reached_maxdepth: false,
        divergence_info: None,
    };
    let log_accept = end.log_acceptance_probability(initial_energy);
    let draw = if rng.gen_bool(log_accept.exp()) { end } else { start };
    collector.register_draw(&draw, &info);
    Ok((draw, info))
}
