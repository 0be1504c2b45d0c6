use anyhow::{anyhow, Result};
use natgrad_core::RolloutSet;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Narrows a rollout set, typically to cut the cost of curvature estimates.
pub trait Reducer: Send + Sync {
    fn reduce(&self, rollouts: &RolloutSet) -> Result<RolloutSet>;
}

/// Keeps a seeded random fraction of the rollouts (at least one).
#[derive(Clone, Debug)]
pub struct FracReducer {
    pub frac: f64,
    pub seed: [u8; 32],
}

impl Reducer for FracReducer {
    fn reduce(&self, rollouts: &RolloutSet) -> Result<RolloutSet> {
        if !(self.frac > 0.0 && self.frac <= 1.0) {
            return Err(anyhow!(
                "Reduce fraction must be in (0, 1], got {}",
                self.frac
            ));
        }
        let n = rollouts.num_seqs();
        if n == 0 {
            return Err(anyhow!("Cannot reduce an empty rollout set"));
        }
        let keep = ((self.frac * n as f64) as usize).clamp(1, n);

        let mut rng = StdRng::from_seed(self.seed);
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rng);
        indices.truncate(keep);
        indices.sort_unstable();
        rollouts.subset(&indices)
    }
}
