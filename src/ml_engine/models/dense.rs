//! Fully connected layer for the regression head

use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::lstm::outer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Linear,
    Relu,
}

impl Activation {
    fn apply(&self, z: f64) -> f64 {
        match self {
            Activation::Linear => z,
            Activation::Relu => z.max(0.0),
        }
    }

    fn derivative(&self, z: f64) -> f64 {
        match self {
            Activation::Linear => 1.0,
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Linear
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub activation: Activation,
    /// [output, input]
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct DenseGrads {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl DenseGrads {
    pub fn zeros_like(layer: &DenseLayer) -> Self {
        Self {
            w: Array2::zeros(layer.w.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }

    pub fn sum_squares(&self) -> f64 {
        self.w.iter().chain(self.b.iter()).map(|v| v * v).sum()
    }

    pub fn scale(&mut self, factor: f64) {
        self.w *= factor;
        self.b *= factor;
    }
}

#[derive(Debug, Clone)]
pub struct DenseCache {
    x: Array1<f64>,
    z: Array1<f64>,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero bias
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        Self {
            activation,
            w: Array2::from_shape_fn((output_size, input_size), |_| rng.gen_range(-limit..limit)),
            b: Array1::zeros(output_size),
        }
    }

    pub fn input_size(&self) -> usize {
        self.w.ncols()
    }

    pub fn output_size(&self) -> usize {
        self.w.nrows()
    }

    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        let act = self.activation;
        (self.w.dot(x) + &self.b).mapv(|z| act.apply(z))
    }

    pub fn forward_cached(&self, x: &Array1<f64>) -> (Array1<f64>, DenseCache) {
        let z = self.w.dot(x) + &self.b;
        let act = self.activation;
        let y = z.mapv(|v| act.apply(v));
        (y, DenseCache { x: x.clone(), z })
    }

    /// Accumulates gradients and returns d(loss)/d(input)
    pub fn backward(&self, cache: &DenseCache, d_out: &Array1<f64>, grads: &mut DenseGrads) -> Array1<f64> {
        let act = self.activation;
        let dz = d_out * &cache.z.mapv(|v| act.derivative(v));
        grads.w += &outer(&dz, &cache.x);
        grads.b += &dz;
        self.w.t().dot(&dz)
    }
}
