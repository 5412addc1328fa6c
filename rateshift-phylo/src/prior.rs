//! Prior densities over the event configuration.
//!
//! Shift events carry an exponential prior on `lambda_init` and a zero-mean
//! normal prior on `lambda_shift`; the root event has its own pair of
//! hyperparameters. The number of shifts is Poisson and each shift's
//! location is uniform over the total branch length.

use rand::Rng;
use rand_distr::Distribution;
use statrs::distribution::{Continuous, Discrete, Exp, Normal, Poisson};

use rateshift_core::{RateShiftError, Result};

use crate::event::BranchEvent;
use crate::settings::PriorSettings;

/// Log-density queries and prior draws for one model configuration.
#[derive(Debug, Clone)]
pub struct Prior {
    lambda_init: Exp,
    lambda_shift: Normal,
    root_lambda_init: Exp,
    root_lambda_shift: Normal,
    event_count: Poisson,
    max_events: Option<usize>,
    sample_lambda_init: rand_distr::Exp<f64>,
    sample_lambda_shift: rand_distr::Normal<f64>,
}

fn config_err(what: &str, e: impl std::fmt::Display) -> RateShiftError {
    RateShiftError::Config(format!("{}: {}", what, e))
}

impl Prior {
    pub fn new(settings: &PriorSettings) -> Result<Self> {
        Ok(Self {
            lambda_init: Exp::new(settings.lambda_init_rate)
                .map_err(|e| config_err("prior.lambda_init_rate", e))?,
            lambda_shift: Normal::new(0.0, settings.lambda_shift_sd)
                .map_err(|e| config_err("prior.lambda_shift_sd", e))?,
            root_lambda_init: Exp::new(settings.root_lambda_init_rate)
                .map_err(|e| config_err("prior.root_lambda_init_rate", e))?,
            root_lambda_shift: Normal::new(0.0, settings.root_lambda_shift_sd)
                .map_err(|e| config_err("prior.root_lambda_shift_sd", e))?,
            event_count: Poisson::new(settings.poisson_rate)
                .map_err(|e| config_err("prior.poisson_rate", e))?,
            max_events: settings.max_events,
            sample_lambda_init: rand_distr::Exp::new(settings.lambda_init_rate)
                .map_err(|e| config_err("prior.lambda_init_rate", e))?,
            sample_lambda_shift: rand_distr::Normal::new(0.0, settings.lambda_shift_sd)
                .map_err(|e| config_err("prior.lambda_shift_sd", e))?,
        })
    }

    pub fn log_lambda_init(&self, is_root: bool, value: f64) -> f64 {
        if is_root {
            self.root_lambda_init.ln_pdf(value)
        } else {
            self.lambda_init.ln_pdf(value)
        }
    }

    pub fn log_lambda_shift(&self, is_root: bool, value: f64) -> f64 {
        if is_root {
            self.root_lambda_shift.ln_pdf(value)
        } else {
            self.lambda_shift.ln_pdf(value)
        }
    }

    /// Joint log-density of an event's rate parameters.
    pub fn log_event(&self, is_root: bool, event: &BranchEvent) -> f64 {
        self.log_lambda_init(is_root, event.lambda_init)
            + self.log_lambda_shift(is_root, event.lambda_shift)
    }

    /// Log-probability of carrying `k` shift events.
    pub fn log_event_count(&self, k: usize) -> f64 {
        if self.max_events.is_some_and(|max| k > max) {
            return f64::NEG_INFINITY;
        }
        self.event_count.ln_pmf(k as u64)
    }

    /// Log-density of one event location, uniform over the tree.
    pub fn log_location(&self, tree_length: f64) -> f64 {
        -tree_length.ln()
    }

    pub fn max_events(&self) -> Option<usize> {
        self.max_events
    }

    /// Draw shift-event parameters `(lambda_init, lambda_shift)` from the prior.
    pub fn draw_parameters<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        (
            self.sample_lambda_init.sample(rng),
            self.sample_lambda_shift.sample(rng),
        )
    }
}
