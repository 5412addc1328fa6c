//! Random-walk moves on an event's `lambda_init` or `lambda_shift`.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use rateshift_core::{RateShiftError, Result};

use super::{log_mh_ratio, Move, Tentative};
use crate::event::EventRef;
use crate::model::TraitModel;
use crate::prior::Prior;

/// Which rate parameter of an event a proposal perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventParameter {
    /// Multiplicative log-scale walk: `v' = v · exp(s · (u − ½))`.
    LambdaInit,
    /// Additive Gaussian walk with standard deviation `s`.
    LambdaShift,
}

/// Perturbs one rate parameter of one event (root included).
#[derive(Debug, Clone)]
pub struct EventParameterProposal {
    parameter: EventParameter,
    scale: f64,
    step: Normal<f64>,
    event: EventRef,
    current_value: f64,
    proposed_value: f64,
    log_q_ratio: f64,
    likelihood: Tentative,
}

impl EventParameterProposal {
    pub fn new(parameter: EventParameter, scale: f64) -> Result<Self> {
        let step = Normal::new(0.0, scale)
            .map_err(|e| RateShiftError::Config(format!("proposal scale {}: {}", scale, e)))?;
        Ok(Self {
            parameter,
            scale,
            step,
            event: EventRef::Root,
            current_value: 0.0,
            proposed_value: 0.0,
            log_q_ratio: 0.0,
            likelihood: Tentative::default(),
        })
    }

    pub fn parameter(&self) -> EventParameter {
        self.parameter
    }

    fn value(&self, model: &TraitModel) -> f64 {
        let event = model.event(self.event);
        match self.parameter {
            EventParameter::LambdaInit => event.lambda_init,
            EventParameter::LambdaShift => event.lambda_shift,
        }
    }

    fn install(&self, model: &mut TraitModel, value: f64) {
        let event = model.event_mut(self.event);
        match self.parameter {
            EventParameter::LambdaInit => event.lambda_init = value,
            EventParameter::LambdaShift => event.lambda_shift = value,
        }
    }

    fn log_prior(&self, prior: &Prior, is_root: bool, value: f64) -> f64 {
        match self.parameter {
            EventParameter::LambdaInit => prior.log_lambda_init(is_root, value),
            EventParameter::LambdaShift => prior.log_lambda_shift(is_root, value),
        }
    }

    fn root_log_prior_ratio(&self, prior: &Prior) -> f64 {
        self.log_prior(prior, true, self.proposed_value) - self.log_prior(prior, true, self.current_value)
    }

    fn non_root_log_prior_ratio(&self, prior: &Prior) -> f64 {
        self.log_prior(prior, false, self.proposed_value)
            - self.log_prior(prior, false, self.current_value)
    }
}

impl Move for EventParameterProposal {
    fn propose<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, _prior: &Prior, rng: &mut R) {
        self.event = model
            .choose_event_at_random(true, rng)
            .unwrap_or(EventRef::Root);
        self.current_value = self.value(model);
        self.likelihood.current = model.current_log_likelihood();

        (self.proposed_value, self.log_q_ratio) = match self.parameter {
            EventParameter::LambdaInit => {
                let log_factor = self.scale * (rng.gen::<f64>() - 0.5);
                (self.current_value * log_factor.exp(), log_factor)
            }
            EventParameter::LambdaShift => (self.current_value + self.step.sample(rng), 0.0),
        };
        self.install(model, self.proposed_value);

        self.likelihood.proposed = model.compute_log_likelihood();
    }

    fn accept(&mut self, model: &mut TraitModel) {
        model.set_current_log_likelihood(self.likelihood.proposed);
    }

    fn reject(&mut self, model: &mut TraitModel) {
        self.install(model, self.current_value);
    }

    fn log_acceptance(&self, model: &TraitModel, prior: &Prior) -> f64 {
        let log_prior_ratio = if self.event.is_root() {
            self.root_log_prior_ratio(prior)
        } else {
            self.non_root_log_prior_ratio(prior)
        };
        log_mh_ratio(
            model.temperature(),
            self.likelihood.log_ratio(),
            log_prior_ratio,
            self.log_q_ratio,
        )
    }
}
