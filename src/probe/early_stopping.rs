/// What the training loop should do after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// New best validation loss: snapshot the weights and keep going
    Improved,
    /// No improvement yet, patience not exhausted
    Wait,
    /// Patience exhausted
    Stop,
}

/// Stops training once validation loss has not improved for `patience` epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta: min_delta.abs(),
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    /// Feed the validation loss of `epoch` (1-based)
    pub fn update(&mut self, epoch: usize, val_loss: f64) -> StopDecision {
        // NaN never compares less, so it counts as no improvement.
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return StopDecision::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::Wait
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}
