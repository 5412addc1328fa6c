//! Reversible-jump moves that add or remove one shift event.

use rand::Rng;

use super::{draw_location, log_mh_ratio, Move, Tentative};
use crate::event::BranchEvent;
use crate::model::TraitModel;
use crate::prior::Prior;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Jump {
    Nothing,
    Added { index: usize },
    Removed { index: usize, event: BranchEvent },
}

/// Reversible-jump birth/death of shift events.
///
/// A birth appends an event at a uniform tree location with parameters
/// drawn from the prior; a death removes one existing shift chosen
/// uniformly. With no shifts a birth is forced, and at the configured
/// maximum a death is forced.
///
/// The target is `P(k) · ∏ f(e_i)` over the ordered shift list. The
/// likelihood ignores the order, so the `1/(k+1)` of picking the victim is
/// matched by the `k+1` equally likely slots a birth could have filled and
/// neither appears in the ratio.
#[derive(Debug, Clone)]
pub struct EventNumberProposal {
    jump: Jump,
    log_q_ratio: f64,
    log_prior_ratio: f64,
    likelihood: Tentative,
}

impl Default for EventNumberProposal {
    fn default() -> Self {
        Self::new()
    }
}

fn add_probability(k: usize, max_events: Option<usize>) -> f64 {
    if max_events == Some(k) {
        0.0
    } else if k == 0 {
        1.0
    } else {
        0.5
    }
}

fn remove_probability(k: usize, max_events: Option<usize>) -> f64 {
    if k == 0 {
        0.0
    } else {
        1.0 - add_probability(k, max_events)
    }
}

/// `(log Q, log prior ratio)` for appending `event` to `k` shifts.
fn birth_terms(prior: &Prior, k: usize, tree_length: f64, event: &BranchEvent) -> (f64, f64) {
    let max = prior.max_events();
    let log_density = prior.log_event(false, event) + prior.log_location(tree_length);
    let log_q = remove_probability(k + 1, max).ln() - add_probability(k, max).ln() - log_density;
    let log_prior = prior.log_event_count(k + 1) - prior.log_event_count(k) + log_density;
    (log_q, log_prior)
}

/// `(log Q, log prior ratio)` for removing `event` from `k` shifts.
fn death_terms(prior: &Prior, k: usize, tree_length: f64, event: &BranchEvent) -> (f64, f64) {
    let max = prior.max_events();
    let log_density = prior.log_event(false, event) + prior.log_location(tree_length);
    let log_q = add_probability(k - 1, max).ln() + log_density - remove_probability(k, max).ln();
    let log_prior = prior.log_event_count(k - 1) - prior.log_event_count(k) - log_density;
    (log_q, log_prior)
}

impl EventNumberProposal {
    pub fn new() -> Self {
        Self {
            jump: Jump::Nothing,
            log_q_ratio: 0.0,
            log_prior_ratio: 0.0,
            likelihood: Tentative::default(),
        }
    }

    fn birth<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, prior: &Prior, rng: &mut R) {
        let k = model.shift_count();
        let (node, time) = draw_location(model, rng);
        let (lambda_init, lambda_shift) = prior.draw_parameters(rng);
        let event = BranchEvent::new(node, time, lambda_init, lambda_shift);
        (self.log_q_ratio, self.log_prior_ratio) = birth_terms(prior, k, model.tree_length(), &event);
        let index = model.add_event(event);
        self.jump = Jump::Added { index };
    }

    fn death<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, prior: &Prior, rng: &mut R) {
        let k = model.shift_count();
        if k == 0 {
            self.jump = Jump::Nothing;
            self.log_q_ratio = 0.0;
            self.log_prior_ratio = 0.0;
            return;
        }
        let index = rng.gen_range(0..k);
        let event = model.remove_event(index);
        (self.log_q_ratio, self.log_prior_ratio) = death_terms(prior, k, model.tree_length(), &event);
        self.jump = Jump::Removed { index, event };
    }
}

impl Move for EventNumberProposal {
    fn propose<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, prior: &Prior, rng: &mut R) {
        self.likelihood.current = model.current_log_likelihood();
        let p_add = add_probability(model.shift_count(), prior.max_events());
        if rng.gen::<f64>() < p_add {
            self.birth(model, prior, rng);
        } else {
            self.death(model, prior, rng);
        }
        self.likelihood.proposed = match self.jump {
            Jump::Nothing => self.likelihood.current,
            _ => model.compute_log_likelihood(),
        };
    }

    fn accept(&mut self, model: &mut TraitModel) {
        model.set_current_log_likelihood(self.likelihood.proposed);
        self.jump = Jump::Nothing;
    }

    fn reject(&mut self, model: &mut TraitModel) {
        match self.jump {
            Jump::Nothing => {}
            Jump::Added { index } => {
                model.remove_event(index);
            }
            Jump::Removed { index, event } => model.insert_event(index, event),
        }
        self.jump = Jump::Nothing;
    }

    fn log_acceptance(&self, model: &TraitModel, _prior: &Prior) -> f64 {
        log_mh_ratio(
            model.temperature(),
            self.likelihood.log_ratio(),
            self.log_prior_ratio,
            self.log_q_ratio,
        )
    }
}
