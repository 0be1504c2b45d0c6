use super::{Block, Policy};
use crate::{
    gradient::Gradient,
    numeric::{self, Dual, Scalar},
    param::Param,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Elman network with a tanh hidden state and a linear readout.
///
/// ```text
/// h' = tanh(W_in x + W_h h + b_h)
/// y  = W_out h' + b_out
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "S: Scalar")]
pub struct Rnn<S: Scalar> {
    pub in_size: usize,
    pub hidden_size: usize,
    pub out_size: usize,
    pub w_in: Param<S>,
    pub w_hidden: Param<S>,
    pub b_hidden: Param<S>,
    pub w_out: Param<S>,
    pub b_out: Param<S>,
}

impl Rnn<f64> {
    pub fn new<R: Rng>(in_size: usize, hidden_size: usize, out_size: usize, rng: &mut R) -> Self {
        let mut uniform = |fan_in: usize, len: usize| -> Vec<f64> {
            let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
            (0..len).map(|_| rng.gen_range(-bound..bound)).collect()
        };
        let w_in = uniform(in_size, hidden_size * in_size);
        let w_hidden = uniform(hidden_size, hidden_size * hidden_size);
        let w_out = uniform(hidden_size, out_size * hidden_size);
        Self {
            in_size,
            hidden_size,
            out_size,
            w_in: Param::new(w_in),
            w_hidden: Param::new(w_hidden),
            b_hidden: Param::zeros(hidden_size),
            w_out: Param::new(w_out),
            b_out: Param::zeros(out_size),
        }
    }
}

impl<S: Scalar> Block<S> for Rnn<S> {
    fn input_size(&self) -> usize {
        self.in_size
    }

    fn output_size(&self) -> usize {
        self.out_size
    }

    fn state_size(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, state: &[S], input: &[S]) -> (Vec<S>, Vec<S>) {
        let (h, i, o) = (self.hidden_size, self.in_size, self.out_size);
        let mut pre = numeric::mat_vec(&self.w_in.value, h, i, input);
        let recurrent = numeric::mat_vec(&self.w_hidden.value, h, h, state);
        numeric::add_assign(&mut pre, &recurrent);
        numeric::add_assign(&mut pre, &self.b_hidden.value);
        let next: Vec<S> = pre.into_iter().map(S::tanh).collect();

        let mut out = numeric::mat_vec(&self.w_out.value, o, h, &next);
        numeric::add_assign(&mut out, &self.b_out.value);
        (out, next)
    }

    fn step_backward(
        &self,
        state_in: &[S],
        input: &[S],
        state_out: &[S],
        out_grad: &[S],
        state_grad: &[S],
        grad: &mut Gradient<S>,
    ) -> Vec<S> {
        let (h, o) = (self.hidden_size, self.out_size);
        if let Some(dst) = grad.get_mut(&self.w_out.id) {
            numeric::add_outer(dst, out_grad, state_out);
        }
        grad.accumulate(self.b_out.id, out_grad);

        let mut hidden_grad = numeric::mat_t_vec(&self.w_out.value, o, h, out_grad);
        numeric::add_assign(&mut hidden_grad, state_grad);
        let pre_grad: Vec<S> = hidden_grad
            .iter()
            .zip(state_out)
            .map(|(&g, &y)| g * (S::one() - y * y))
            .collect();

        if let Some(dst) = grad.get_mut(&self.w_in.id) {
            numeric::add_outer(dst, &pre_grad, input);
        }
        if let Some(dst) = grad.get_mut(&self.w_hidden.id) {
            numeric::add_outer(dst, &pre_grad, state_in);
        }
        grad.accumulate(self.b_hidden.id, &pre_grad);

        numeric::mat_t_vec(&self.w_hidden.value, h, h, &pre_grad)
    }

    fn parameters(&self) -> Vec<&Param<S>> {
        vec![
            &self.w_in,
            &self.w_hidden,
            &self.b_hidden,
            &self.w_out,
            &self.b_out,
        ]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Param<S>> {
        vec![
            &mut self.w_in,
            &mut self.w_hidden,
            &mut self.b_hidden,
            &mut self.w_out,
            &mut self.b_out,
        ]
    }
}

impl Policy for Rnn<f64> {
    type Fwd = Rnn<Dual>;
}
