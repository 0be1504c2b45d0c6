use crate::seq::{Batch, MemTape};
use anyhow::{anyhow, Result};

/// One recorded trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct Rollout {
    pub inputs: Vec<Vec<f64>>,
    pub actions: Vec<Vec<f64>>,
    pub rewards: Vec<f64>,
}

impl Rollout {
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

/// A batch of rollouts together with their input and action tapes.
///
/// Rollout sets are immutable; `subset` builds a new, independent set.
#[derive(Clone, Debug)]
pub struct RolloutSet {
    rollouts: Vec<Rollout>,
    input_size: usize,
    inputs: MemTape<f64>,
    actions: MemTape<f64>,
}

impl RolloutSet {
    pub fn from_sequences(rollouts: Vec<Rollout>) -> Result<Self> {
        let mut input_size = None;
        let mut action_size = None;
        for (i, r) in rollouts.iter().enumerate() {
            if r.inputs.len() != r.len() || r.actions.len() != r.len() {
                return Err(anyhow!(
                    "Rollout {} has {} inputs, {} actions and {} rewards",
                    i,
                    r.inputs.len(),
                    r.actions.len(),
                    r.rewards.len()
                ));
            }
            for input in r.inputs.iter() {
                if *input_size.get_or_insert(input.len()) != input.len() {
                    return Err(anyhow!("Rollout {} has inconsistent input sizes", i));
                }
            }
            for action in r.actions.iter() {
                if *action_size.get_or_insert(action.len()) != action.len() {
                    return Err(anyhow!("Rollout {} has inconsistent action sizes", i));
                }
            }
        }

        let max_len = rollouts.iter().map(Rollout::len).max().unwrap_or(0);
        let mut inputs = MemTape::writer();
        let mut actions = MemTape::writer();
        for t in 0..max_len {
            let present: Vec<bool> = rollouts.iter().map(|r| r.len() > t).collect();
            let live = rollouts.iter().filter(|r| r.len() > t);
            inputs.push(Batch {
                present: present.clone(),
                packed: live.clone().flat_map(|r| r.inputs[t].clone()).collect(),
            });
            actions.push(Batch {
                present,
                packed: live.flat_map(|r| r.actions[t].clone()).collect(),
            });
        }
        Ok(Self {
            rollouts,
            input_size: input_size.unwrap_or(0),
            inputs: inputs.finish(),
            actions: actions.finish(),
        })
    }

    /// A new set holding the rollouts at `indices`, in the given order.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let rollouts = indices
            .iter()
            .map(|&i| {
                self.rollouts.get(i).cloned().ok_or_else(|| {
                    anyhow!("Rollout index {} out of range ({})", i, self.rollouts.len())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_sequences(rollouts)
    }

    pub fn rollouts(&self) -> &[Rollout] {
        &self.rollouts
    }

    pub fn inputs(&self) -> &MemTape<f64> {
        &self.inputs
    }

    pub fn actions(&self) -> &MemTape<f64> {
        &self.actions
    }

    pub fn rewards(&self) -> Vec<&[f64]> {
        self.rollouts.iter().map(|r| r.rewards.as_slice()).collect()
    }

    pub fn num_seqs(&self) -> usize {
        self.rollouts.len()
    }

    pub fn seq_lens(&self) -> Vec<usize> {
        self.rollouts.iter().map(Rollout::len).collect()
    }

    pub fn num_steps(&self) -> usize {
        self.rollouts.iter().map(Rollout::len).sum()
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }
}
