use anyhow::{anyhow, Result};
use natgrad_core::{
    propagate_reversed, ActionJudger, ApplyPolicy, Batch, Block, Gradient, LogProber, ParamId,
    Policy, Regularizer, Rereader, Reuser, RolloutSet, TapeRereader,
};
use std::sync::Arc;

/// Vanilla policy gradient estimator.
///
/// The objective is the advantage-weighted log-likelihood of the recorded
/// actions, plus an optional regularizer on every output row, averaged over
/// the rollouts. The returned gradient points uphill.
pub struct PolicyGradient<'a, P, A, F> {
    pub policy: &'a Arc<P>,
    pub params: &'a [ParamId],
    pub action_space: &'a A,
    pub apply_policy: &'a F,
    pub action_judger: &'a dyn ActionJudger,
    pub regularizer: Option<&'a dyn Regularizer>,
}

impl<'a, P, A, F> PolicyGradient<'a, P, A, F>
where
    P: Policy,
    A: LogProber,
    F: ApplyPolicy,
{
    /// Computes the gradient and returns the policy outputs it was computed
    /// from, so callers can replay them.
    pub fn run_with_outputs(&self, rollouts: &RolloutSet) -> Result<(Gradient, Reuser<f64>)> {
        let mut grad = self.zero_grad()?;
        let block: Arc<dyn Block<f64>> = self.policy.clone();
        let outputs = Reuser::new(
            self.apply_policy
                .apply(Box::new(TapeRereader(rollouts.inputs().clone())), block),
        );
        if grad.is_empty() || rollouts.num_seqs() == 0 {
            return Ok((grad, outputs));
        }

        let advantages = self.action_judger.judge_actions(rollouts);
        let scale = 1.0 / rollouts.num_seqs() as f64;
        let actions = rollouts.actions().batches();
        let mut upstream = Vec::with_capacity(actions.len());
        for (t, out) in outputs.forward().iter().enumerate() {
            let acts = actions
                .get(t)
                .ok_or_else(|| anyhow!("Policy produced more timesteps than the rollouts hold"))?;
            let mut packed = Vec::with_capacity(out.packed.len());
            for ((seq, params), action) in out.present_indices().zip(out.rows()).zip(acts.rows()) {
                let advantage = advantages
                    .get(seq)
                    .and_then(|a| a.get(t))
                    .ok_or_else(|| anyhow!("No advantage for rollout {} at timestep {}", seq, t))?;
                let mut row_grad = self.action_space.log_prob_grad(params, action);
                row_grad.iter_mut().for_each(|g| *g *= advantage * scale);
                if let Some(regularizer) = self.regularizer {
                    let reg_grad = regularizer.regularize_grad(params);
                    for (g, r) in row_grad.iter_mut().zip(reg_grad) {
                        *g += r * scale;
                    }
                }
                packed.extend(row_grad);
            }
            upstream.push(Batch {
                present: out.present,
                packed,
            });
        }
        if upstream.len() != actions.len() {
            return Err(anyhow!(
                "Policy produced {} timesteps, rollouts hold {}",
                upstream.len(),
                actions.len()
            ));
        }

        propagate_reversed(&outputs, upstream, &mut grad);
        Ok((grad, outputs))
    }

    pub fn run(&self, rollouts: &RolloutSet) -> Result<Gradient> {
        Ok(self.run_with_outputs(rollouts)?.0)
    }

    fn zero_grad(&self) -> Result<Gradient> {
        let params = self.policy.parameters();
        let mut grad = Gradient::new();
        for id in self.params {
            let param = params
                .iter()
                .find(|p| p.id == *id)
                .ok_or_else(|| anyhow!("Parameter {} is not part of the policy", id))?;
            grad.insert(*id, vec![0.0; param.len()]);
        }
        Ok(grad)
    }
}
