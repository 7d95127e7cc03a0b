use serde::{Deserialize, Serialize};

use super::{Optimizer, SlotKey, SlotStore};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adagrad {
    learning_rate: f64,
    initial_accumulator_value: f64,
}

impl Adagrad {
    pub fn new(learning_rate: f64) -> Self {
        if learning_rate <= 0.0 {
            panic!("learning_rate must be > 0, got {}", learning_rate);
        }
        Self {
            learning_rate,
            initial_accumulator_value: 0.1,
        }
    }

    pub fn initial_accumulator_value(mut self, value: f64) -> Self {
        if value <= 0.0 {
            panic!("initial_accumulator_value must be > 0, got {}", value);
        }
        self.initial_accumulator_value = value;
        self
    }
}

impl Optimizer for Adagrad {
    fn name(&self) -> &'static str {
        "Adagrad"
    }

    fn apply(&self, key: &SlotKey, param: &mut [f64], grad: &[f64], slots: &mut SlotStore) {
        let accumulators = slots.row_mut(
            key,
            "Adagrad",
            param.len(),
            self.initial_accumulator_value,
        );
        for ((w, &g), acc) in param.iter_mut().zip(grad).zip(accumulators.iter_mut()) {
            *acc += g * g;
            *w -= self.learning_rate * g / acc.sqrt();
        }
    }
}
