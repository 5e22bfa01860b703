/// Outcome of checking one epoch's held-out top-5 accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Improved,
    Continue,
    Stop,
}

/// Patience-based stopping on top-5 accuracy, checked before each epoch's
/// training pass. Stops at the first epoch strictly more than `patience`
/// epochs past the last improvement.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    best_epoch: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: 0.0,
            best_epoch: 1,
        }
    }

    /// Continues counting from a resumed run.
    pub fn resumed(patience: usize, epoch: usize) -> Self {
        Self {
            best_epoch: epoch,
            ..Self::new(patience)
        }
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn update(&mut self, epoch: usize, top5: f64) -> Decision {
        if top5 > self.best {
            self.best = top5;
            self.best_epoch = epoch;
            Decision::Improved
        } else if epoch > self.best_epoch + self.patience {
            Decision::Stop
        } else {
            Decision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stop(accuracies: &[f64]) -> Option<usize> {
        let mut stopping = EarlyStopping::new(3);
        accuracies
            .iter()
            .enumerate()
            .map(|(i, &top5)| (i + 1, stopping.update(i + 1, top5)))
            .find(|&(_, decision)| decision == Decision::Stop)
            .map(|(epoch, _)| epoch)
    }

    #[test]
    fn stops_four_epochs_after_last_improvement() {
        assert_eq!(first_stop(&[0.1, 0.2, 0.15, 0.15, 0.15, 0.15]), Some(6));
    }

    #[test]
    fn never_stops_within_patience() {
        assert_eq!(first_stop(&[0.1, 0.2, 0.15, 0.15, 0.15]), None);
    }

    #[test]
    fn late_improvement_resets_the_count() {
        let accuracies = [0.1, 0.1, 0.1, 0.1, 0.3, 0.2, 0.2, 0.2, 0.2];
        assert_eq!(first_stop(&accuracies), Some(9));
    }

    #[test]
    fn equal_accuracy_is_not_an_improvement() {
        let mut stopping = EarlyStopping::new(3);
        assert_eq!(stopping.update(1, 0.5), Decision::Improved);
        assert_eq!(stopping.update(2, 0.5), Decision::Continue);
        assert_eq!(stopping.best(), 0.5);
        assert_eq!(stopping.best_epoch(), 1);
    }

    #[test]
    fn zero_accuracy_counts_from_epoch_one() {
        assert_eq!(first_stop(&[0.0; 6]), Some(5));
    }

    #[test]
    fn resumed_run_counts_from_its_epoch() {
        let mut stopping = EarlyStopping::resumed(3, 10);
        assert_eq!(stopping.update(11, 0.0), Decision::Continue);
        assert_eq!(stopping.update(14, 0.0), Decision::Stop);
    }
}
