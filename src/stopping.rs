/// watches the validation c-index history and decides when training has
/// tipped into overfitting
///
/// the rule is windowed patience: stop once the best epoch is at least
/// `patience` epochs in the past and the trailing window averages below the
/// best value. a monotonically improving history can never trip this (the
/// best epoch is always the latest), and a sustained decline after a peak
/// trips it within `patience` epochs of the peak plus one check interval.
#[derive(Debug, Clone)]
pub struct OverfitMonitor {
    min_epochs: usize,
    check_interval: usize,
    patience: usize,
    window: usize,
}

impl Default for OverfitMonitor {
    fn default() -> Self {
        Self {
            min_epochs: 15,
            check_interval: 5,
            patience: 10,
            window: 5,
        }
    }
}

impl OverfitMonitor {
    pub fn new(min_epochs: usize, check_interval: usize, patience: usize, window: usize) -> Self {
        Self {
            min_epochs,
            check_interval,
            patience: patience.max(1),
            window: window.max(1),
        }
    }

    /// the driver only consults the monitor periodically
    pub fn should_check(&self, epoch: usize) -> bool {
        epoch >= self.min_epochs && epoch % self.check_interval == 0
    }

    /// inspect the full validation history so far; returns the stop decision
    /// and the index of the best epoch observed
    pub fn check(&self, history: &[f64]) -> (bool, usize) {
        if history.is_empty() {
            return (false, 0);
        }

        let mut best_epoch = 0;
        for (i, &v) in history.iter().enumerate() {
            if v > history[best_epoch] {
                best_epoch = i;
            }
        }

        let last = history.len() - 1;
        if last - best_epoch < self.patience {
            return (false, best_epoch);
        }

        let tail = &history[history.len().saturating_sub(self.window)..];
        let tail_mean = tail.iter().sum::<f64>() / tail.len() as f64;
        (tail_mean < history[best_epoch], best_epoch)
    }
}
