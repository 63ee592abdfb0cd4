use ndarray::{Array, Dimension, Zip};

use crate::Flt;

pub const DEFAULT_LEARNING_RATE: Flt = 0.001;

/// Per-parameter Adam state, kept next to the parameter it belongs to.
#[derive(Debug, Clone)]
pub struct Moments<D: Dimension> {
    first: Array<Flt, D>,
    second: Array<Flt, D>,
}

impl<D: Dimension> Moments<D> {
    pub fn zeros_like(param: &Array<Flt, D>) -> Moments<D> {
        Moments {
            first: Array::zeros(param.raw_dim()),
            second: Array::zeros(param.raw_dim()),
        }
    }

    pub fn first(&self) -> &Array<Flt, D> {
        &self.first
    }
}

/// Adam with bias correction folded into the step size:
///
/// ```text
/// lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)
/// m    = beta1 * m + (1 - beta1) * g
/// v    = beta2 * v + (1 - beta2) * g^2
/// p    = p - lr_t * m / (sqrt(v) + epsilon)
/// ```
///
/// One timestep is shared by all parameters of a model; call [`Adam::begin_step`]
/// once per step, then [`Adam::update`] for every parameter.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: Flt,
    beta1: Flt,
    beta2: Flt,
    epsilon: Flt,
    t: i32,
}

impl Adam {
    pub fn new(learning_rate: Flt) -> Adam {
        Adam::with_params(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(learning_rate: Flt, beta1: Flt, beta2: Flt, epsilon: Flt) -> Adam {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
        }
    }

    pub fn learning_rate(&self) -> Flt {
        self.learning_rate
    }

    pub fn timestep(&self) -> i32 {
        self.t
    }

    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn update<D: Dimension>(
        &self,
        param: &mut Array<Flt, D>,
        grad: &Array<Flt, D>,
        moments: &mut Moments<D>,
    ) {
        debug_assert!(self.t > 0, "begin_step must be called before update");
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(self.t)).sqrt()
            / (1.0 - self.beta1.powi(self.t));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        Zip::from(param)
            .and(grad)
            .and(&mut moments.first)
            .and(&mut moments.second)
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + epsilon);
            });
    }
}
