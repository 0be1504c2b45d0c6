mod conj_grad;
mod fisher;

pub use conj_grad::conjugate_gradients;
pub use fisher::{make_fwd, mean_kl_upstream, FisherVectorProduct, UnfwdRereader};

use crate::{
    pg::PolicyGradient,
    reduce::{FracReducer, Reducer},
};
use anyhow::{anyhow, Result};
use log::debug;
use natgrad_core::{
    ActionJudger, ApplyPolicy, Block, Bptt, EntropyReg, Entropyer, Gradient, NaturalActionSpace,
    ParamId, Policy, Regularizer, Reuser, RolloutSet, TapeRereader, TotalJudger,
};
use natgrad_structs::config::NaturalPgConfig;
use natgrad_utils::jsonify;
use std::sync::Arc;

pub use natgrad_structs::config::DEFAULT_CONJ_GRAD_ITERS;

/// Computes Fisher-vector products for the conjugate gradient solve.
pub trait FisherProduct {
    /// Returns `F v` over `rollouts`, where `outputs` are the policy outputs
    /// for those rollouts. `outputs` has been rewound and may be forwarded once.
    fn fisher_product(
        &mut self,
        rollouts: &RolloutSet,
        outputs: &Reuser<f64>,
        v: &Gradient,
    ) -> Result<Gradient>;
}

/// Natural policy gradient: the policy gradient preconditioned by the inverse
/// Fisher information of the action distribution.
pub struct NaturalPg<P: Policy, A: NaturalActionSpace, F: ApplyPolicy = Bptt> {
    pub policy: Arc<P>,
    /// Parameters to differentiate with respect to.
    pub params: Vec<ParamId>,
    pub action_space: A,
    /// Conjugate gradient iterations.
    pub iters: usize,
    /// Added to the diagonal of the Fisher matrix.
    pub damping: f64,
    pub apply_policy: F,
    pub action_judger: Box<dyn ActionJudger>,
    /// Selects the rollouts used for Fisher-vector products.
    pub reduce: Option<Box<dyn Reducer>>,
    /// Applied to the policy gradient objective only.
    pub regularizer: Option<Box<dyn Regularizer>>,
}

#[derive(Debug)]
pub struct NaturalPgResult {
    pub grad: Gradient,
    /// The policy gradient was zero and was returned as is.
    pub zero_grad: bool,
    /// Rollouts the Fisher matrix was estimated on, when they were reduced.
    pub reduced_rollouts: Option<RolloutSet>,
}

impl<P: Policy, A: NaturalActionSpace> NaturalPg<P, A, Bptt> {
    /// Differentiates every parameter of `policy`, with full BPTT and default settings.
    pub fn new(policy: Arc<P>, action_space: A, action_judger: Box<dyn ActionJudger>) -> Self {
        let params = policy.parameters().iter().map(|p| p.id).collect();
        Self {
            policy,
            params,
            action_space,
            iters: DEFAULT_CONJ_GRAD_ITERS,
            damping: 0.0,
            apply_policy: Bptt::full(),
            action_judger,
            reduce: None,
            regularizer: None,
        }
    }
}

impl<P, A> NaturalPg<P, A, Bptt>
where
    P: Policy,
    A: NaturalActionSpace + Entropyer + Clone + 'static,
{
    pub fn from_config(policy: Arc<P>, action_space: A, config: &NaturalPgConfig) -> Result<Self> {
        config.validate()?;
        debug!("natural pg config: {}", jsonify(config));
        let pg = config.pg_config();
        let mut natural = Self::new(
            policy,
            action_space.clone(),
            Box::new(TotalJudger {
                normalize: pg.normalize(),
            }),
        );
        natural.iters = config.conj_grad_iters();
        natural.damping = config.damping_coeff();
        if let Some(horizon) = config.truncate_bptt {
            natural.apply_policy = Bptt::truncated(horizon);
        }
        if let Some(frac) = config.reduce_frac {
            natural.reduce = Some(Box::new(FracReducer {
                frac,
                seed: config.reduce_seed.unwrap_or_default(),
            }));
        }
        if let Some(coeff) = pg.entropy_coeff.filter(|&c| c != 0.0) {
            natural.regularizer = Some(Box::new(EntropyReg {
                entropyer: action_space,
                coeff,
            }));
        }
        Ok(natural)
    }
}

impl<P: Policy, A: NaturalActionSpace, F: ApplyPolicy> NaturalPg<P, A, F> {
    /// Swaps the strategy used to apply the policy to input sequences.
    pub fn with_apply_policy<G: ApplyPolicy>(self, apply_policy: G) -> NaturalPg<P, A, G> {
        NaturalPg {
            policy: self.policy,
            params: self.params,
            action_space: self.action_space,
            iters: self.iters,
            damping: self.damping,
            apply_policy,
            action_judger: self.action_judger,
            reduce: self.reduce,
            regularizer: self.regularizer,
        }
    }

    /// Computes the natural gradient. No step size is applied.
    pub fn run(&self, rollouts: &RolloutSet) -> Result<Gradient> {
        Ok(self.run_detailed(rollouts)?.grad)
    }

    pub fn run_detailed(&self, rollouts: &RolloutSet) -> Result<NaturalPgResult> {
        let mut fisher = FisherVectorProduct {
            policy: self.policy.as_ref(),
            action_space: &self.action_space,
            apply_policy: &self.apply_policy,
            damping: self.damping,
        };
        self.run_with_operator(rollouts, &mut fisher)
    }

    /// Like `run_detailed`, with a caller supplied Fisher-vector product.
    pub fn run_with_operator<O: FisherProduct>(
        &self,
        rollouts: &RolloutSet,
        fisher: &mut O,
    ) -> Result<NaturalPgResult> {
        self.validate()?;
        let pg = PolicyGradient {
            policy: &self.policy,
            params: &self.params,
            action_space: &self.action_space,
            apply_policy: &self.apply_policy,
            action_judger: self.action_judger.as_ref(),
            regularizer: self.regularizer.as_deref(),
        };
        let (grad, outputs) = pg.run_with_outputs(rollouts)?;
        if grad.is_empty() || grad.all_zero() {
            debug!("policy gradient is zero, skipping conjugate gradients");
            return Ok(NaturalPgResult {
                grad,
                zero_grad: true,
                reduced_rollouts: None,
            });
        }

        let (reduced, outputs) = match &self.reduce {
            Some(reducer) => {
                let reduced = reducer.reduce(rollouts)?;
                debug!(
                    "estimating fisher matrix on {} of {} rollouts",
                    reduced.num_seqs(),
                    rollouts.num_seqs()
                );
                let block: Arc<dyn Block<f64>> = self.policy.clone();
                let outputs = Reuser::new(
                    self.apply_policy
                        .apply(Box::new(TapeRereader(reduced.inputs().clone())), block),
                );
                (Some(reduced), outputs)
            }
            None => (None, outputs),
        };
        let fisher_rollouts = reduced.as_ref().unwrap_or(rollouts);

        let natural = conjugate_gradients(&grad, self.iters, |v| {
            outputs.reuse();
            fisher.fisher_product(fisher_rollouts, &outputs, v)
        })?;
        debug!(
            "natural gradient: |g|^2 = {}, |x|^2 = {}",
            grad.dot(&grad),
            natural.dot(&natural)
        );
        Ok(NaturalPgResult {
            grad: natural,
            zero_grad: false,
            reduced_rollouts: reduced,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.iters == 0 {
            return Err(anyhow!("Conjugate gradient iterations must be positive"));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(anyhow!(
                "Damping must be a finite non-negative number, got {}",
                self.damping
            ));
        }
        Ok(())
    }
}
