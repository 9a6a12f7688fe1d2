use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct CancellationError;

impl std::error::Error for CancellationError {}

impl Display for CancellationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("training was cancelled")
    }
}

/// Observes training. Called once per finished epoch; returning an error stops training
/// before the next epoch starts.
pub trait TrainingMonitor {
    fn on_epoch(&mut self, epoch: usize, n_epochs: usize, loss: f64) -> Result<(), CancellationError>;
}

impl<M: TrainingMonitor + ?Sized> TrainingMonitor for &mut M {
    fn on_epoch(&mut self, epoch: usize, n_epochs: usize, loss: f64) -> Result<(), CancellationError> {
        (**self).on_epoch(epoch, n_epochs, loss)
    }
}

#[derive(Default, Copy, Clone)]
pub struct NoOpMonitor;

impl TrainingMonitor for NoOpMonitor {
    fn on_epoch(&mut self, _epoch: usize, _n_epochs: usize, _loss: f64) -> Result<(), CancellationError> {
        Ok(())
    }
}

/// Training state shared with another thread, which can read progress and request cancellation.
#[derive(Debug, Default)]
pub struct TrainingState {
    cancelled: AtomicBool,
    epochs_done: AtomicUsize,
    n_epochs: AtomicUsize,
    last_loss: AtomicU64,
}

impl TrainingState {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn epochs_done(&self) -> usize {
        self.epochs_done.load(Ordering::Relaxed)
    }

    /// Fraction of the requested epochs completed, in [0, 1]
    pub fn get_progress(&self) -> f64 {
        let total = self.n_epochs.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.epochs_done() as f64 / total as f64
        }
    }

    /// Loss of the most recent epoch, NaN before the first one
    pub fn last_loss(&self) -> f64 {
        if self.epochs_done() == 0 {
            f64::NAN
        } else {
            f64::from_bits(self.last_loss.load(Ordering::Relaxed))
        }
    }
}

#[derive(Debug)]
pub struct AtomicMonitor {
    state: Arc<TrainingState>,
}

pub fn atomic() -> (Arc<TrainingState>, AtomicMonitor) {
    let state: Arc<TrainingState> = Default::default();
    (state.clone(), AtomicMonitor { state })
}

impl TrainingMonitor for AtomicMonitor {
    fn on_epoch(&mut self, epoch: usize, n_epochs: usize, loss: f64) -> Result<(), CancellationError> {
        self.state.last_loss.store(loss.to_bits(), Ordering::Relaxed);
        self.state.n_epochs.store(n_epochs, Ordering::Relaxed);
        self.state.epochs_done.store(epoch + 1, Ordering::Relaxed);
        if self.state.is_cancelled() {
            return Err(CancellationError);
        }
        Ok(())
    }
}
