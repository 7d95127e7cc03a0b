use serde::{Deserialize, Serialize};

use super::{Optimizer, SlotKey, SlotStore};

/// Plain gradient descent; keeps no slots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        if learning_rate <= 0.0 {
            panic!("learning_rate must be > 0, got {}", learning_rate);
        }
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "SGD"
    }

    fn apply(&self, _key: &SlotKey, param: &mut [f64], grad: &[f64], _slots: &mut SlotStore) {
        for (w, g) in param.iter_mut().zip(grad) {
            *w -= self.learning_rate * g;
        }
    }
}
