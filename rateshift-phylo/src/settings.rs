//! Sampler settings loaded from TOML.
//!
//! Every section and field is optional; omitted values take the defaults
//! below. Unknown keys are rejected so typos surface at load time.
//!
//! ```toml
//! [mcmc]
//! n_generations = 50000
//! sample_every = 500
//!
//! [prior]
//! poisson_rate = 0.5
//! ```

use std::path::Path;

use serde::Deserialize;

use rateshift_core::{RateShiftError, Result};

/// Top-level sampler configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub mcmc: McmcSettings,
    #[serde(default)]
    pub weights: ProposalWeights,
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub prior: PriorSettings,
    #[serde(default)]
    pub initial: InitialSettings,
}

/// Chain length, sampling and Metropolis coupling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct McmcSettings {
    pub n_generations: usize,
    pub burnin: usize,
    pub sample_every: usize,
    /// Master RNG seed; drawn from entropy when absent.
    pub seed: Option<u64>,
    /// Number of coupled chains (1 = no tempering).
    pub chains: usize,
    /// Temperature of chain `i` is `1 / (1 + i · delta_t)`.
    pub delta_t: f64,
    /// Generations between swap attempts.
    pub swap_period: usize,
}

impl Default for McmcSettings {
    fn default() -> Self {
        Self {
            n_generations: 10_000,
            burnin: 1_000,
            sample_every: 100,
            seed: None,
            chains: 1,
            delta_t: 0.05,
            swap_period: 1_000,
        }
    }
}

/// Relative weights for MCMC proposal moves.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProposalWeights {
    pub lambda_init: f64,
    pub lambda_shift: f64,
    pub event_number: f64,
    pub event_position: f64,
    pub node_state: f64,
}

impl Default for ProposalWeights {
    fn default() -> Self {
        Self {
            lambda_init: 1.0,
            lambda_shift: 1.0,
            event_number: 1.0,
            event_position: 1.0,
            node_state: 2.0,
        }
    }
}

impl ProposalWeights {
    pub fn total(&self) -> f64 {
        self.lambda_init + self.lambda_shift + self.event_number + self.event_position + self.node_state
    }
}

/// Step widths for the move kernels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    /// Width of the log-scale window for `lambda_init`.
    pub lambda_init_scale: f64,
    /// Standard deviation of the `lambda_shift` random walk.
    pub lambda_shift_scale: f64,
    /// Standard deviation of the latent node-state random walk.
    pub node_state_scale: f64,
    /// Standard deviation of a local (within-branch) event slide.
    pub local_move_scale: f64,
    /// Probability that an event move relocates anywhere on the tree.
    pub global_move_prob: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            lambda_init_scale: 1.0,
            lambda_shift_scale: 0.05,
            node_state_scale: 0.5,
            local_move_scale: 0.1,
            global_move_prob: 0.2,
        }
    }
}

/// Hyperparameters of [`crate::prior::Prior`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriorSettings {
    pub lambda_init_rate: f64,
    pub lambda_shift_sd: f64,
    pub root_lambda_init_rate: f64,
    pub root_lambda_shift_sd: f64,
    /// Expected number of shift events.
    pub poisson_rate: f64,
    pub max_events: Option<usize>,
}

impl Default for PriorSettings {
    fn default() -> Self {
        Self {
            lambda_init_rate: 1.0,
            lambda_shift_sd: 0.05,
            root_lambda_init_rate: 1.0,
            root_lambda_shift_sd: 0.05,
            poisson_rate: 1.0,
            max_events: None,
        }
    }
}

/// Starting parameters of the root event.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitialSettings {
    pub lambda_init: f64,
    pub lambda_shift: f64,
}

impl Default for InitialSettings {
    fn default() -> Self {
        Self {
            lambda_init: 1.0,
            lambda_shift: 0.0,
        }
    }
}

impl Settings {
    /// Parse and validate settings from a TOML string.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(input).map_err(|e| RateShiftError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a TOML settings file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("tuning.lambda_init_scale", self.tuning.lambda_init_scale),
            ("tuning.lambda_shift_scale", self.tuning.lambda_shift_scale),
            ("tuning.node_state_scale", self.tuning.node_state_scale),
            ("tuning.local_move_scale", self.tuning.local_move_scale),
            ("prior.lambda_init_rate", self.prior.lambda_init_rate),
            ("prior.lambda_shift_sd", self.prior.lambda_shift_sd),
            ("prior.root_lambda_init_rate", self.prior.root_lambda_init_rate),
            ("prior.root_lambda_shift_sd", self.prior.root_lambda_shift_sd),
            ("prior.poisson_rate", self.prior.poisson_rate),
            ("initial.lambda_init", self.initial.lambda_init),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RateShiftError::Config(format!(
                    "{} must be finite and > 0, got {}",
                    name, value
                )));
            }
        }
        let w = &self.weights;
        let weights = [w.lambda_init, w.lambda_shift, w.event_number, w.event_position, w.node_state];
        if weights.iter().any(|&x| !x.is_finite() || x < 0.0) || w.total() <= 0.0 {
            return Err(RateShiftError::Config(
                "proposal weights must be non-negative and not all zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tuning.global_move_prob) {
            return Err(RateShiftError::Config(format!(
                "tuning.global_move_prob must be in [0, 1], got {}",
                self.tuning.global_move_prob
            )));
        }
        if self.mcmc.chains == 0 {
            return Err(RateShiftError::Config("mcmc.chains must be at least 1".into()));
        }
        if self.mcmc.sample_every == 0 || self.mcmc.swap_period == 0 {
            return Err(RateShiftError::Config(
                "mcmc.sample_every and mcmc.swap_period must be at least 1".into(),
            ));
        }
        if !(self.mcmc.delta_t.is_finite() && self.mcmc.delta_t >= 0.0) {
            return Err(RateShiftError::Config(format!(
                "mcmc.delta_t must be finite and >= 0, got {}",
                self.mcmc.delta_t
            )));
        }
        if !self.initial.lambda_shift.is_finite() {
            return Err(RateShiftError::Config("initial.lambda_shift must be finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s.mcmc.n_generations, 10_000);
        assert_eq!(s.mcmc.chains, 1);
        assert_eq!(s.weights.node_state, 2.0);
        assert!(s.prior.max_events.is_none());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let s = Settings::from_toml_str("[mcmc]\nn_generations = 42\nseed = 7\n").unwrap();
        assert_eq!(s.mcmc.n_generations, 42);
        assert_eq!(s.mcmc.seed, Some(7));
        assert_eq!(s.mcmc.sample_every, 100);
    }

    #[test]
    fn unknown_key_rejected() {
        let err = Settings::from_toml_str("[mcmc]\ngenerationz = 5\n").unwrap_err();
        assert!(matches!(err, RateShiftError::Parse(_)));
    }

    #[test]
    fn non_positive_scale_rejected() {
        let err = Settings::from_toml_str("[tuning]\nlambda_shift_scale = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("lambda_shift_scale"));
    }

    #[test]
    fn all_zero_weights_rejected() {
        let doc = "[weights]\nlambda_init = 0.0\nlambda_shift = 0.0\nevent_number = 0.0\nevent_position = 0.0\nnode_state = 0.0\n";
        assert!(Settings::from_toml_str(doc).is_err());
    }

    #[test]
    fn global_move_prob_bounded() {
        assert!(Settings::from_toml_str("[tuning]\nglobal_move_prob = 1.5\n").is_err());
    }

    #[test]
    fn zero_chains_rejected() {
        assert!(Settings::from_toml_str("[mcmc]\nchains = 0\n").is_err());
    }
}
