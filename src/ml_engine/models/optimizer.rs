//! Adam optimizer over `LstmNetwork` parameters

use ndarray::{Array, Dimension, Zip};
use serde::{Deserialize, Serialize};

use super::{LstmNetwork, NetworkGrads};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// First and second moment estimates, one slot per parameter
pub struct Adam {
    config: AdamConfig,
    m: NetworkGrads,
    v: NetworkGrads,
    t: i32,
}

impl Adam {
    pub fn new(config: AdamConfig, network: &LstmNetwork) -> Self {
        Self {
            config,
            m: NetworkGrads::zeros_like(network),
            v: NetworkGrads::zeros_like(network),
            t: 0,
        }
    }

    pub fn step(&mut self, network: &mut LstmNetwork, grads: &NetworkGrads) {
        self.t += 1;
        let c = self.config;
        let lr_t = c.learning_rate * (1.0 - c.beta2.powi(self.t)).sqrt() / (1.0 - c.beta1.powi(self.t));

        for (i, layer) in network.lstm.iter_mut().enumerate() {
            let g = &grads.lstm[i];
            let m = &mut self.m.lstm[i];
            let v = &mut self.v.lstm[i];
            update(&mut layer.w_x, &g.w_x, &mut m.w_x, &mut v.w_x, lr_t, &c);
            update(&mut layer.w_h, &g.w_h, &mut m.w_h, &mut v.w_h, lr_t, &c);
            update(&mut layer.b, &g.b, &mut m.b, &mut v.b, lr_t, &c);
        }

        for (i, layer) in network.dense.iter_mut().enumerate() {
            let g = &grads.dense[i];
            let m = &mut self.m.dense[i];
            let v = &mut self.v.dense[i];
            update(&mut layer.w, &g.w, &mut m.w, &mut v.w, lr_t, &c);
            update(&mut layer.b, &g.b, &mut m.b, &mut v.b, lr_t, &c);
        }
    }
}

fn update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
    c: &AdamConfig,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = c.beta1 * *m + (1.0 - c.beta1) * g;
            *v = c.beta2 * *v + (1.0 - c.beta2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + c.epsilon);
        });
}
