use crate::hamiltonian::DivergenceInfo;
use crate::nuts::Collector;
use crate::state::EvalCache;

/// Settings for the dual average step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageOptions {
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageOptions,
}

impl DualAverage {
    pub(crate) fn new(settings: DualAverageOptions, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 1,
            settings,
        }
    }

    pub(crate) fn advance(&mut self, accept_stat: f64, target: f64) {
        let w = 1. / (self.count as f64 + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (target - accept_stat);
        self.log_step =
            self.mu - self.hbar * (self.count as f64).sqrt() / self.settings.gamma;
        let mk = (self.count as f64).powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
        self.count += 1;
    }

    pub(crate) fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub(crate) fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }
}

#[derive(Default)]
pub(crate) struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub(crate) fn new() -> RunningMean {
        RunningMean { sum: 0., count: 0 }
    }

    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn current(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub(crate) fn reset(&mut self) {
        self.sum = 0f64;
        self.count = 0;
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Mean Metropolis acceptance statistic over one trajectory.
pub(crate) struct AcceptanceRateCollector {
    initial_energy: f64,
    pub(crate) mean: RunningMean,
}

impl AcceptanceRateCollector {
    pub(crate) fn new() -> AcceptanceRateCollector {
        AcceptanceRateCollector {
            initial_energy: 0.,
            mean: RunningMean::new(),
        }
    }
}

impl Collector for AcceptanceRateCollector {
    fn register_leapfrog(&mut self, end: Result<&EvalCache, &DivergenceInfo>) {
        match end {
            Ok(end) => self
                .mean
                .add(end.log_acceptance_probability(self.initial_energy).exp()),
            Err(_) => self.mean.add(0.),
        }
    }

    fn register_init(&mut self, state: &EvalCache) {
        self.initial_energy = state.energy();
        self.mean.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_average_moves_toward_target() {
        let mut da = DualAverage::new(DualAverageOptions::default(), 0.1);
        // Acceptance far above target: the step size should grow.
        for _ in 0..50 {
            da.advance(1., 0.8);
        }
        assert!(da.current_step_size() > 0.1);
        assert!(da.current_step_size_adapted() > 0.1);

        // Acceptance far below target: the step size should shrink.
        let mut da = DualAverage::new(DualAverageOptions::default(), 0.1);
        for _ in 0..50 {
            da.advance(0., 0.8);
        }
        assert!(da.current_step_size() < 0.1);
        assert!(da.current_step_size_adapted() < 0.1);
    }

    #[test]
    fn running_mean_resets() {
        let mut mean = RunningMean::new();
        mean.add(1.);
        mean.add(0.);
        assert_eq!(mean.current(), 0.5);
        assert_eq!(mean.count(), 2);
        mean.reset();
        assert_eq!(mean.count(), 0);
    }
}
