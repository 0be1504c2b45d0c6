use crate::rollout::RolloutSet;

/// Assigns an advantage to every action in a batch of rollouts.
pub trait ActionJudger: Send + Sync {
    /// One vector per rollout, one advantage per timestep.
    fn judge_actions(&self, rollouts: &RolloutSet) -> Vec<Vec<f64>>;
}

/// Judges each action by the total reward that followed it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TotalJudger {
    /// Shift and scale advantages to zero mean and unit variance.
    pub normalize: bool,
}

impl ActionJudger for TotalJudger {
    fn judge_actions(&self, rollouts: &RolloutSet) -> Vec<Vec<f64>> {
        let mut advantages: Vec<Vec<f64>> = rollouts
            .rewards()
            .into_iter()
            .map(|rewards| {
                let mut to_go = rewards.to_vec();
                for t in (0..to_go.len().saturating_sub(1)).rev() {
                    to_go[t] += to_go[t + 1];
                }
                to_go
            })
            .collect();
        if self.normalize {
            normalize(&mut advantages);
        }
        advantages
    }
}

fn normalize(values: &mut [Vec<f64>]) {
    let count = values.iter().map(Vec::len).sum::<usize>();
    if count == 0 {
        return;
    }
    let mean = values.iter().flatten().sum::<f64>() / count as f64;
    let variance = values
        .iter()
        .flatten()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / count as f64;
    let std = variance.sqrt();
    for x in values.iter_mut().flatten() {
        *x -= mean;
        if std > 0.0 {
            *x /= std;
        }
    }
}
