//! LSTM layer with back-propagation through time

use ndarray::{s, Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One recurrent layer. Gate blocks are stacked in the order i, f, g, o.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    /// Input weights [4 * hidden, input]
    pub w_x: Array2<f64>,
    /// Recurrent weights [4 * hidden, hidden]
    pub w_h: Array2<f64>,
    /// Gate biases [4 * hidden]
    pub b: Array1<f64>,
}

/// Accumulated gradients, same shapes as the layer parameters
#[derive(Debug, Clone)]
pub struct LstmGrads {
    pub w_x: Array2<f64>,
    pub w_h: Array2<f64>,
    pub b: Array1<f64>,
}

impl LstmGrads {
    pub fn zeros_like(layer: &LstmLayer) -> Self {
        Self {
            w_x: Array2::zeros(layer.w_x.raw_dim()),
            w_h: Array2::zeros(layer.w_h.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }

    pub fn sum_squares(&self) -> f64 {
        sq(&self.w_x) + sq(&self.w_h) + self.b.iter().map(|v| v * v).sum::<f64>()
    }

    pub fn scale(&mut self, factor: f64) {
        self.w_x *= factor;
        self.w_h *= factor;
        self.b *= factor;
    }
}

/// Values kept from one forward step for the backward pass
#[derive(Debug, Clone)]
struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    tanh_c: Array1<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LstmCache {
    steps: Vec<StepCache>,
}

impl LstmLayer {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let gates = 4 * hidden_size;
        let limit_x = (6.0 / (input_size + gates) as f64).sqrt();
        let limit_h = (6.0 / (hidden_size + gates) as f64).sqrt();

        let w_x = Array2::from_shape_fn((gates, input_size), |_| rng.gen_range(-limit_x..limit_x));
        let w_h = Array2::from_shape_fn((gates, hidden_size), |_| rng.gen_range(-limit_h..limit_h));

        // forget gate starts open
        let mut b = Array1::zeros(gates);
        b.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);

        Self {
            input_size,
            hidden_size,
            w_x,
            w_h,
            b,
        }
    }

    fn step(
        &self,
        x: &Array1<f64>,
        h_prev: &Array1<f64>,
        c_prev: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>, StepCache) {
        let h = self.hidden_size;
        let a = self.w_x.dot(x) + self.w_h.dot(h_prev) + &self.b;

        let i = a.slice(s![0..h]).mapv(sigmoid);
        let f = a.slice(s![h..2 * h]).mapv(sigmoid);
        let g = a.slice(s![2 * h..3 * h]).mapv(f64::tanh);
        let o = a.slice(s![3 * h..4 * h]).mapv(sigmoid);

        let c = &f * c_prev + &i * &g;
        let tanh_c = c.mapv(f64::tanh);
        let h_next = &o * &tanh_c;

        let cache = StepCache {
            x: x.clone(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            tanh_c,
        };
        (h_next, c, cache)
    }

    /// Hidden state at every step of `inputs`
    pub fn forward(&self, inputs: &[Array1<f64>]) -> Vec<Array1<f64>> {
        self.forward_cached(inputs).0
    }

    pub fn forward_cached(&self, inputs: &[Array1<f64>]) -> (Vec<Array1<f64>>, LstmCache) {
        let mut h = Array1::zeros(self.hidden_size);
        let mut c = Array1::zeros(self.hidden_size);
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut steps = Vec::with_capacity(inputs.len());

        for x in inputs {
            let (h_next, c_next, cache) = self.step(x, &h, &c);
            outputs.push(h_next.clone());
            steps.push(cache);
            h = h_next;
            c = c_next;
        }

        (outputs, LstmCache { steps })
    }

    /// Back-propagate `d_outputs` (one gradient per step) through time.
    ///
    /// Accumulates parameter gradients into `grads` and returns the gradient
    /// with respect to each input step.
    pub fn backward(
        &self,
        cache: &LstmCache,
        d_outputs: &[Array1<f64>],
        grads: &mut LstmGrads,
    ) -> Vec<Array1<f64>> {
        let h = self.hidden_size;
        let mut dh_next: Array1<f64> = Array1::zeros(h);
        let mut dc_next: Array1<f64> = Array1::zeros(h);
        let mut d_inputs = vec![Array1::zeros(self.input_size); cache.steps.len()];

        for t in (0..cache.steps.len()).rev() {
            let st = &cache.steps[t];
            let dh = &d_outputs[t] + &dh_next;

            let d_o = &dh * &st.tanh_c;
            let dc = &dh * &st.o * &st.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let d_i = &dc * &st.g;
            let d_g = &dc * &st.i;
            let d_f = &dc * &st.c_prev;
            dc_next = &dc * &st.f;

            let mut da = Array1::zeros(4 * h);
            da.slice_mut(s![0..h])
                .assign(&(&d_i * &st.i.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![h..2 * h])
                .assign(&(&d_f * &st.f.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![2 * h..3 * h])
                .assign(&(&d_g * &st.g.mapv(|v| 1.0 - v * v)));
            da.slice_mut(s![3 * h..4 * h])
                .assign(&(&d_o * &st.o.mapv(|v| v * (1.0 - v))));

            grads.w_x += &outer(&da, &st.x);
            grads.w_h += &outer(&da, &st.h_prev);
            grads.b += &da;

            d_inputs[t] = self.w_x.t().dot(&da);
            dh_next = self.w_h.t().dot(&da);
        }

        d_inputs
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub(crate) fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

fn sq(a: &Array2<f64>) -> f64 {
    a.iter().map(|v| v * v).sum()
}
