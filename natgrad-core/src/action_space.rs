//! Probability distributions over actions, parameterized by policy outputs.
use crate::numeric::Scalar;
use std::f64::consts::{E, PI};

/// Log-likelihood of an action under a parameterized distribution.
pub trait LogProber: Send + Sync {
    fn log_prob<S: Scalar>(&self, params: &[S], action: &[f64]) -> S;

    /// Gradient of `log_prob` with respect to `params`.
    fn log_prob_grad(&self, params: &[f64], action: &[f64]) -> Vec<f64>;
}

/// KL divergence between two parameterized distributions.
pub trait KLer: Send + Sync {
    /// `KL(p || q)`.
    fn kl<S: Scalar>(&self, p: &[S], q: &[S]) -> S;

    /// Gradient of `KL(p || q)` with respect to `q`.
    fn kl_grad<S: Scalar>(&self, p: &[S], q: &[S]) -> Vec<S>;
}

pub trait Entropyer: Send + Sync {
    fn entropy(&self, params: &[f64]) -> f64;

    fn entropy_grad(&self, params: &[f64]) -> Vec<f64>;
}

/// An action space usable for natural policy gradients.
pub trait NaturalActionSpace: LogProber + KLer {}

impl<T: LogProber + KLer> NaturalActionSpace for T {}

/// Categorical distribution over logits.
///
/// Actions are weight vectors over the categories, usually one-hot.
#[derive(Clone, Copy, Debug, Default)]
pub struct Softmax;

fn log_softmax<S: Scalar>(logits: &[S]) -> Vec<S> {
    let max = logits
        .iter()
        .map(|x| x.value())
        .fold(f64::NEG_INFINITY, f64::max);
    let shifted: Vec<S> = logits.iter().map(|&x| x - S::from_f64(max)).collect();
    let log_sum = shifted.iter().fold(S::zero(), |acc, &x| acc + x.exp()).ln();
    shifted.into_iter().map(|x| x - log_sum).collect()
}

impl LogProber for Softmax {
    fn log_prob<S: Scalar>(&self, params: &[S], action: &[f64]) -> S {
        log_softmax(params)
            .into_iter()
            .zip(action)
            .fold(S::zero(), |acc, (lp, &a)| acc + lp.scale(a))
    }

    fn log_prob_grad(&self, params: &[f64], action: &[f64]) -> Vec<f64> {
        let total: f64 = action.iter().sum();
        log_softmax(params)
            .into_iter()
            .zip(action)
            .map(|(lp, &a)| a - total * lp.exp())
            .collect()
    }
}

impl KLer for Softmax {
    fn kl<S: Scalar>(&self, p: &[S], q: &[S]) -> S {
        let log_p = log_softmax(p);
        let log_q = log_softmax(q);
        log_p
            .into_iter()
            .zip(log_q)
            .fold(S::zero(), |acc, (lp, lq)| acc + lp.exp() * (lp - lq))
    }

    fn kl_grad<S: Scalar>(&self, p: &[S], q: &[S]) -> Vec<S> {
        let log_p = log_softmax(p);
        let log_q = log_softmax(q);
        log_q
            .into_iter()
            .zip(log_p)
            .map(|(lq, lp)| lq.exp() - lp.exp())
            .collect()
    }
}

impl Entropyer for Softmax {
    fn entropy(&self, params: &[f64]) -> f64 {
        -log_softmax(params)
            .into_iter()
            .map(|lp| lp.exp() * lp)
            .sum::<f64>()
    }

    fn entropy_grad(&self, params: &[f64]) -> Vec<f64> {
        let log_p = log_softmax(params);
        let entropy = -log_p.iter().map(|lp| lp.exp() * lp).sum::<f64>();
        log_p
            .into_iter()
            .map(|lp| -lp.exp() * (lp + entropy))
            .collect()
    }
}

/// Diagonal Gaussian. Parameters are all means followed by all log standard
/// deviations.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gaussian;

fn split<S>(params: &[S]) -> (&[S], &[S]) {
    assert!(
        params.len() % 2 == 0,
        "gaussian parameters must have even length"
    );
    params.split_at(params.len() / 2)
}

impl LogProber for Gaussian {
    fn log_prob<S: Scalar>(&self, params: &[S], action: &[f64]) -> S {
        let (means, log_stds) = split(params);
        let half_log_2pi = 0.5 * (2.0 * PI).ln();
        let mut sum = S::zero();
        for ((&mean, &log_std), &a) in means.iter().zip(log_stds).zip(action) {
            let z = (S::from_f64(a) - mean) / log_std.exp();
            sum += -(z * z).scale(0.5) - log_std - S::from_f64(half_log_2pi);
        }
        sum
    }

    fn log_prob_grad(&self, params: &[f64], action: &[f64]) -> Vec<f64> {
        let (means, log_stds) = split(params);
        let mut mean_grads = Vec::with_capacity(means.len());
        let mut std_grads = Vec::with_capacity(means.len());
        for ((&mean, &log_std), &a) in means.iter().zip(log_stds).zip(action) {
            let std = log_std.exp();
            let z = (a - mean) / std;
            mean_grads.push(z / std);
            std_grads.push(z * z - 1.0);
        }
        mean_grads.extend(std_grads);
        mean_grads
    }
}

impl KLer for Gaussian {
    fn kl<S: Scalar>(&self, p: &[S], q: &[S]) -> S {
        let (p_means, p_log_stds) = split(p);
        let (q_means, q_log_stds) = split(q);
        let mut sum = S::zero();
        for i in 0..p_means.len() {
            let p_var = (p_log_stds[i] + p_log_stds[i]).exp();
            let q_var = (q_log_stds[i] + q_log_stds[i]).exp();
            let diff = p_means[i] - q_means[i];
            sum += q_log_stds[i] - p_log_stds[i] + (p_var + diff * diff) / (q_var + q_var)
                - S::from_f64(0.5);
        }
        sum
    }

    fn kl_grad<S: Scalar>(&self, p: &[S], q: &[S]) -> Vec<S> {
        let (p_means, p_log_stds) = split(p);
        let (q_means, q_log_stds) = split(q);
        let mut mean_grads = Vec::with_capacity(p_means.len());
        let mut std_grads = Vec::with_capacity(p_means.len());
        for i in 0..p_means.len() {
            let p_var = (p_log_stds[i] + p_log_stds[i]).exp();
            let q_var = (q_log_stds[i] + q_log_stds[i]).exp();
            let diff = p_means[i] - q_means[i];
            mean_grads.push(-diff / q_var);
            std_grads.push(S::one() - (p_var + diff * diff) / q_var);
        }
        mean_grads.extend(std_grads);
        mean_grads
    }
}

impl Entropyer for Gaussian {
    fn entropy(&self, params: &[f64]) -> f64 {
        let (_, log_stds) = split(params);
        let per_dim = 0.5 * (2.0 * PI * E).ln();
        log_stds.iter().map(|s| s + per_dim).sum()
    }

    fn entropy_grad(&self, params: &[f64]) -> Vec<f64> {
        let (means, log_stds) = split(params);
        let mut grad = vec![0.0; means.len()];
        grad.extend(std::iter::repeat(1.0).take(log_stds.len()));
        grad
    }
}
