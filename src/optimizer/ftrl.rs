use serde::{Deserialize, Serialize};

use super::{Optimizer, SlotKey, SlotStore};

/// FTRL-proximal with per-coordinate learning rates.
///
/// Keeps two slots per weight: the squared-gradient accumulator `n` and the
/// linear term `z`. The weight is recomputed in closed form from them after
/// every update, so L1 drives weights to exactly zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ftrl {
    learning_rate: f64,
    learning_rate_power: f64,
    initial_accumulator_value: f64,
    l1_regularization_strength: f64,
    l2_regularization_strength: f64,
}

impl Ftrl {
    pub fn new(learning_rate: f64) -> Self {
        if learning_rate <= 0.0 {
            panic!("learning_rate must be > 0, got {}", learning_rate);
        }
        Self {
            learning_rate,
            learning_rate_power: -0.5,
            initial_accumulator_value: 0.1,
            l1_regularization_strength: 0.0,
            l2_regularization_strength: 0.0,
        }
    }

    pub fn learning_rate_power(mut self, power: f64) -> Self {
        if power > 0.0 {
            panic!("learning_rate_power must be <= 0, got {}", power);
        }
        self.learning_rate_power = power;
        self
    }

    pub fn initial_accumulator_value(mut self, value: f64) -> Self {
        if value <= 0.0 {
            panic!("initial_accumulator_value must be > 0, got {}", value);
        }
        self.initial_accumulator_value = value;
        self
    }

    pub fn l1_regularization_strength(mut self, l1: f64) -> Self {
        if l1 < 0.0 {
            panic!("l1_regularization_strength must be >= 0, got {}", l1);
        }
        self.l1_regularization_strength = l1;
        self
    }

    pub fn l2_regularization_strength(mut self, l2: f64) -> Self {
        if l2 < 0.0 {
            panic!("l2_regularization_strength must be >= 0, got {}", l2);
        }
        self.l2_regularization_strength = l2;
        self
    }

    fn scaled(&self, accumulator: f64) -> f64 {
        if self.learning_rate_power == -0.5 {
            accumulator.sqrt()
        } else {
            accumulator.powf(-self.learning_rate_power)
        }
    }
}

impl Optimizer for Ftrl {
    fn name(&self) -> &'static str {
        "Ftrl"
    }

    fn apply(&self, key: &SlotKey, param: &mut [f64], grad: &[f64], slots: &mut SlotStore) {
        let width = param.len();
        let accumulators = slots
            .row_mut(key, "Ftrl/accum", width, self.initial_accumulator_value)
            .to_vec();
        let mut linears = slots.row_mut(key, "Ftrl/linear", width, 0.0).to_vec();
        let mut updated = accumulators.clone();

        let (l1, l2, lr) = (
            self.l1_regularization_strength,
            self.l2_regularization_strength,
            self.learning_rate,
        );
        for k in 0..width {
            let g = grad[k];
            let n = accumulators[k];
            let n_new = n + g * g;
            let sigma = (self.scaled(n_new) - self.scaled(n)) / lr;
            linears[k] += g - sigma * param[k];
            updated[k] = n_new;

            let z = linears[k];
            param[k] = if z.abs() <= l1 {
                0.0
            } else {
                (z.signum() * l1 - z) / (self.scaled(n_new) / lr + 2.0 * l2)
            };
        }

        slots.row_mut(key, "Ftrl/accum", width, 0.0).copy_from_slice(&updated);
        slots.row_mut(key, "Ftrl/linear", width, 0.0).copy_from_slice(&linears);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_first_step_matches_closed_form() {
        let ftrl = Ftrl::new(0.5);
        let mut slots = SlotStore::new();
        let key = SlotKey::new("w", 0);
        let mut param = [0.0];
        ftrl.apply(&key, &mut param, &[1.0], &mut slots);

        // n = 0.1 -> 1.1, z = 1 - (sqrt(1.1) - sqrt(0.1)) / 0.5 * 0 = 1
        assert_abs_diff_eq!(param[0], -1.0 / (1.1f64.sqrt() / 0.5), epsilon = 1e-12);
        assert_abs_diff_eq!(slots.row(&key, "Ftrl/accum").unwrap()[0], 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(slots.row(&key, "Ftrl/linear").unwrap()[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_l1_clamps_small_weights_to_zero() {
        let ftrl = Ftrl::new(0.5).l1_regularization_strength(2.0);
        let mut slots = SlotStore::new();
        let key = SlotKey::new("w", 0);
        let mut param = [0.0, 0.0];
        ftrl.apply(&key, &mut param, &[1.0, -3.0], &mut slots);
        assert_eq!(param[0], 0.0);
        assert!(param[1] > 0.0);
    }

    #[test]
    fn test_repeated_gradient_moves_against_it() {
        let ftrl = Ftrl::new(0.1);
        let mut slots = SlotStore::new();
        let key = SlotKey::new("w", 0);
        let mut param = [0.0];
        let mut previous = 0.0;
        for _ in 0..5 {
            ftrl.apply(&key, &mut param, &[0.5], &mut slots);
            assert!(param[0] < previous);
            previous = param[0];
        }
    }

    #[test]
    fn test_general_power_matches_sqrt() {
        let sqrt = Ftrl::new(0.3);
        let general = Ftrl::new(0.3).learning_rate_power(-0.5000000001);
        let (mut a, mut b) = ([0.0], [0.0]);
        let (mut slots_a, mut slots_b) = (SlotStore::new(), SlotStore::new());
        let key = SlotKey::new("w", 0);
        for g in [0.4, -0.2, 0.7] {
            sqrt.apply(&key, &mut a, &[g], &mut slots_a);
            general.apply(&key, &mut b, &[g], &mut slots_b);
        }
        assert_abs_diff_eq!(a[0], b[0], epsilon = 1e-6);
    }
}
