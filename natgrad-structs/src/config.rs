use crate::serializable_struct_with_getters;
use anyhow::{anyhow, Result};
use natgrad_utils::load_json_arg;
use serde::{Deserialize, Serialize};

/// Default number of iterations for Conjugate Gradients.
pub const DEFAULT_CONJ_GRAD_ITERS: usize = 10;

serializable_struct_with_getters! {
    NaturalPgConfig {
        iters: Option<usize>,
        damping: Option<f64>,
        truncate_bptt: Option<usize>,
        reduce_frac: Option<f64>,
        reduce_seed: Option<[u8; 32]>,
        pg: Option<PolicyGradientConfig>,
    }
}

serializable_struct_with_getters! {
    PolicyGradientConfig {
        normalize_advantages: Option<bool>,
        entropy_coeff: Option<f64>,
    }
}

impl NaturalPgConfig {
    /// Loads a config from a json string or a path to a `.json` file.
    pub fn load(arg: &str) -> Result<Self> {
        let config: Self = load_json_arg(arg)?;
        config.validate()?;
        Ok(config)
    }

    pub fn conj_grad_iters(&self) -> usize {
        self.iters.unwrap_or(DEFAULT_CONJ_GRAD_ITERS)
    }

    pub fn damping_coeff(&self) -> f64 {
        self.damping.unwrap_or(0.0)
    }

    pub fn pg_config(&self) -> PolicyGradientConfig {
        self.pg.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.conj_grad_iters() == 0 {
            return Err(anyhow!("iters must be positive"));
        }
        let damping = self.damping_coeff();
        if !damping.is_finite() || damping < 0.0 {
            return Err(anyhow!(
                "damping must be a finite non-negative number, got {}",
                damping
            ));
        }
        if self.truncate_bptt == Some(0) {
            return Err(anyhow!("truncate_bptt must be positive"));
        }
        if let Some(frac) = self.reduce_frac {
            if !(frac > 0.0 && frac <= 1.0) {
                return Err(anyhow!("reduce_frac must be in (0, 1], got {}", frac));
            }
        }
        if let Some(pg) = &self.pg {
            pg.validate()?;
        }
        Ok(())
    }
}

impl PolicyGradientConfig {
    pub fn normalize(&self) -> bool {
        self.normalize_advantages.unwrap_or(false)
    }

    pub fn validate(&self) -> Result<()> {
        match self.entropy_coeff {
            Some(coeff) if !coeff.is_finite() => {
                Err(anyhow!("entropy_coeff must be finite, got {}", coeff))
            }
            _ => Ok(()),
        }
    }
}
