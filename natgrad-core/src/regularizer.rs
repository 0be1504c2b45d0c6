use crate::action_space::Entropyer;

/// A term added to the policy gradient objective for each output row.
pub trait Regularizer: Send + Sync {
    fn regularize(&self, params: &[f64]) -> f64;

    /// Gradient of `regularize` with respect to `params`.
    fn regularize_grad(&self, params: &[f64]) -> Vec<f64>;
}

/// Rewards entropy in the action distribution.
#[derive(Clone, Debug)]
pub struct EntropyReg<E> {
    pub entropyer: E,
    pub coeff: f64,
}

impl<E: Entropyer> Regularizer for EntropyReg<E> {
    fn regularize(&self, params: &[f64]) -> f64 {
        self.coeff * self.entropyer.entropy(params)
    }

    fn regularize_grad(&self, params: &[f64]) -> Vec<f64> {
        self.entropyer
            .entropy_grad(params)
            .into_iter()
            .map(|g| g * self.coeff)
            .collect()
    }
}
