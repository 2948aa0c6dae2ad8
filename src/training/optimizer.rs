use std::f64::consts::PI;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Adam with L2 weight decay folded into the gradient.
///
/// The moment estimates are part of the checkpointed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
    m: DVector<f64>,
    v: DVector<f64>,
    t: u64,
}

impl Adam {
    pub fn new(num_params: usize, weight_decay: f64) -> Self {
        Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            m: DVector::zeros(num_params),
            v: DVector::zeros(num_params),
            t: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> u64 {
        self.t
    }

    /// Apply one update to `params`. Entries flagged in `frozen` are left
    /// untouched and keep zero moments.
    pub fn step(&mut self, params: &mut DVector<f64>, grad: &DVector<f64>, lr: f64, frozen: &[bool]) {
        debug_assert_eq!(params.len(), self.m.len());
        debug_assert_eq!(grad.len(), self.m.len());
        let is_frozen = |i: usize| frozen.get(i).copied().unwrap_or(false);

        self.t += 1;
        let g = DVector::from_fn(params.len(), |i, _| {
            if is_frozen(i) {
                0.0
            } else {
                grad[i] + self.weight_decay * params[i]
            }
        });
        self.m = &self.m * self.beta1 + &g * (1.0 - self.beta1);
        self.v = &self.v * self.beta2 + g.component_mul(&g) * (1.0 - self.beta2);

        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);
        for i in (0..params.len()).filter(|&i| !is_frozen(i)) {
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            params[i] -= lr * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

/// Per-epoch learning rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningRateSchedule {
    Constant,
    /// `lr_min + (lr − lr_min)·(1 + cos(π·e/T))/2` over `T` epochs
    Cosine { min_lr: f64 },
}

impl Default for LearningRateSchedule {
    fn default() -> Self {
        LearningRateSchedule::Cosine { min_lr: 0.0 }
    }
}

impl LearningRateSchedule {
    pub fn learning_rate(&self, base: f64, epoch: usize, total_epochs: usize) -> f64 {
        match *self {
            LearningRateSchedule::Constant => base,
            LearningRateSchedule::Cosine { min_lr } => {
                let progress = epoch as f64 / total_epochs.max(1) as f64;
                min_lr + (base - min_lr) * (1.0 + (PI * progress).cos()) / 2.0
            }
        }
    }
}
