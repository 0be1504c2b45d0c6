mod linear;
mod rnn;

pub use linear::Linear;
pub use rnn::Rnn;

use crate::{
    gradient::Gradient,
    numeric::{Dual, Scalar},
    param::Param,
};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// One step of a (possibly recurrent) differentiable computation.
///
/// Implementations are written once against [`Scalar`] so the same block can
/// run over plain values and over dual numbers.
pub trait Block<S: Scalar>: Send + Sync {
    fn input_size(&self) -> usize;
    fn output_size(&self) -> usize;
    fn state_size(&self) -> usize;

    fn start_state(&self) -> Vec<S> {
        vec![S::zero(); self.state_size()]
    }

    /// Returns `(output, next_state)`.
    fn step(&self, state: &[S], input: &[S]) -> (Vec<S>, Vec<S>);

    /// Adds the parameter gradient of one step into `grad` and returns the
    /// gradient with respect to `state_in`.
    ///
    /// `out_grad` and `state_grad` are the gradients flowing into the step's
    /// output and next state. Parameters missing from `grad` are skipped.
    fn step_backward(
        &self,
        state_in: &[S],
        input: &[S],
        state_out: &[S],
        out_grad: &[S],
        state_grad: &[S],
        grad: &mut Gradient<S>,
    ) -> Vec<S>;

    /// Parameters in a stable order. Blocks of the same structure list
    /// corresponding parameters at the same positions.
    fn parameters(&self) -> Vec<&Param<S>>;

    fn parameters_mut(&mut self) -> Vec<&mut Param<S>>;
}

/// A block over `f64` that can be cloned into a dual number block.
pub trait Policy: Block<f64> + Serialize + 'static {
    type Fwd: Block<Dual> + DeserializeOwned + 'static;

    /// Structurally clones the policy into the dual number context.
    ///
    /// Every parameter of the clone has a fresh id and a zero tangent.
    fn make_fwd(&self) -> Result<Self::Fwd> {
        let value = serde_json::to_value(self).context("Failed to serialize policy")?;
        serde_json::from_value(value).context("Failed to clone policy into dual numbers")
    }
}
