use crate::zeroshot::TopKAccuracy;

/// Unweighted mean over batches.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchMean {
    total: f64,
    batches: usize,
}

impl BatchMean {
    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn mean(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.total / self.batches as f64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EvaluationAccumulator {
    loss: BatchMean,
    top1: BatchMean,
    top5: BatchMean,
}

impl EvaluationAccumulator {
    pub fn update(&mut self, loss: f64, accuracy: TopKAccuracy) {
        self.loss.update(loss);
        self.top1.update(accuracy.top1);
        self.top5.update(accuracy.top5);
    }

    pub fn summary(&self, seconds: f64) -> EvaluationSummary {
        let batches = self.loss.batches();
        EvaluationSummary {
            loss: self.loss.mean(),
            top1: self.top1.mean(),
            top5: self.top5.mean(),
            batches,
            seconds_per_batch: if batches == 0 {
                0.0
            } else {
                seconds / batches as f64
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvaluationSummary {
    pub loss: f64,
    pub top1: f64,
    pub top5: f64,
    pub batches: usize,
    pub seconds_per_batch: f64,
}
