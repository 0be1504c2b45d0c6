use super::{Block, Policy};
use crate::{
    gradient::Gradient,
    numeric::{self, Dual, Scalar},
    param::Param,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A stateless affine layer, `y = W x + b`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "S: Scalar")]
pub struct Linear<S: Scalar> {
    pub in_size: usize,
    pub out_size: usize,
    pub weights: Param<S>,
    pub biases: Param<S>,
}

impl Linear<f64> {
    /// Weights drawn uniformly from `[-1/sqrt(in_size), 1/sqrt(in_size))`, zero biases.
    pub fn new<R: Rng>(in_size: usize, out_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_size.max(1) as f64).sqrt();
        let weights = (0..in_size * out_size)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        Self::from_values(in_size, out_size, weights, vec![0.0; out_size])
    }
}

impl<S: Scalar> Linear<S> {
    pub fn from_values(in_size: usize, out_size: usize, weights: Vec<S>, biases: Vec<S>) -> Self {
        assert_eq!(weights.len(), in_size * out_size, "weights have wrong size");
        assert_eq!(biases.len(), out_size, "biases have wrong size");
        Self {
            in_size,
            out_size,
            weights: Param::new(weights),
            biases: Param::new(biases),
        }
    }
}

impl<S: Scalar> Block<S> for Linear<S> {
    fn input_size(&self) -> usize {
        self.in_size
    }

    fn output_size(&self) -> usize {
        self.out_size
    }

    fn state_size(&self) -> usize {
        0
    }

    fn step(&self, _state: &[S], input: &[S]) -> (Vec<S>, Vec<S>) {
        let mut out = numeric::mat_vec(&self.weights.value, self.out_size, self.in_size, input);
        numeric::add_assign(&mut out, &self.biases.value);
        (out, Vec::new())
    }

    fn step_backward(
        &self,
        _state_in: &[S],
        input: &[S],
        _state_out: &[S],
        out_grad: &[S],
        _state_grad: &[S],
        grad: &mut Gradient<S>,
    ) -> Vec<S> {
        if let Some(dst) = grad.get_mut(&self.weights.id) {
            numeric::add_outer(dst, out_grad, input);
        }
        grad.accumulate(self.biases.id, out_grad);
        Vec::new()
    }

    fn parameters(&self) -> Vec<&Param<S>> {
        vec![&self.weights, &self.biases]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Param<S>> {
        vec![&mut self.weights, &mut self.biases]
    }
}

impl Policy for Linear<f64> {
    type Fwd = Linear<Dual>;
}
