//! Learning-rate schedule: linear warmup over the first epoch, then step decay.

#[derive(Debug, Clone, PartialEq)]
pub struct LrSchedule {
    pub base_lr: f64,
    /// Multiplier applied at the first warmup iteration; rises linearly to 1.
    pub warmup_factor: f64,
    pub warmup_iters_max: usize,
    /// Decay every `step_size` epochs; 0 disables decay.
    pub step_size: usize,
    pub gamma: f64,
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self {
            base_lr: 0.005,
            warmup_factor: 1.0 / 1000.0,
            warmup_iters_max: 1000,
            step_size: 3,
            gamma: 0.1,
        }
    }
}

impl LrSchedule {
    pub fn warmup_iters(&self, iters_per_epoch: usize) -> usize {
        self.warmup_iters_max
            .min(iters_per_epoch.saturating_sub(1))
    }

    /// Decayed rate for an epoch, before any warmup factor.
    pub fn epoch_lr(&self, epoch: usize) -> f64 {
        if self.step_size == 0 {
            return self.base_lr;
        }
        let steps = (epoch / self.step_size) as i32;
        self.base_lr * self.gamma.powi(steps)
    }

    pub fn lr_at(&self, epoch: usize, iter: usize, iters_per_epoch: usize) -> f64 {
        let lr = self.epoch_lr(epoch);
        if epoch != 0 {
            return lr;
        }
        let warmup = self.warmup_iters(iters_per_epoch);
        if warmup == 0 || iter >= warmup {
            return lr;
        }
        let alpha = iter as f64 / warmup as f64;
        lr * (self.warmup_factor * (1.0 - alpha) + alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn warmup_ramps_linearly_in_first_epoch() {
        let s = LrSchedule::default();
        assert_eq!(s.warmup_iters(61), 60);
        assert!(close(s.lr_at(0, 0, 61), 0.005 / 1000.0));
        let mid = 0.005 * (0.001 * 0.5 + 0.5);
        assert!(close(s.lr_at(0, 30, 61), mid));
        assert!(close(s.lr_at(0, 60, 61), 0.005));
        assert!(close(s.lr_at(1, 0, 61), 0.005));
    }

    #[test]
    fn warmup_capped_by_max_iters() {
        let s = LrSchedule {
            warmup_iters_max: 10,
            ..Default::default()
        };
        assert_eq!(s.warmup_iters(500), 10);
        assert!(close(s.lr_at(0, 10, 500), 0.005));
    }

    #[test]
    fn single_batch_epoch_skips_warmup() {
        let s = LrSchedule::default();
        assert_eq!(s.warmup_iters(1), 0);
        assert!(close(s.lr_at(0, 0, 1), 0.005));
    }

    #[test]
    fn step_decay_every_three_epochs() {
        let s = LrSchedule::default();
        assert!(close(s.epoch_lr(2), 0.005));
        assert!(close(s.epoch_lr(3), 0.0005));
        assert!(close(s.epoch_lr(6), 0.00005));
        let flat = LrSchedule {
            step_size: 0,
            ..Default::default()
        };
        assert!(close(flat.epoch_lr(9), 0.005));
    }
}
