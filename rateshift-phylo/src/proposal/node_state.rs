//! Gaussian walk on the latent trait value of an interior node.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use rateshift_core::{RateShiftError, Result};

use super::{log_mh_ratio, Move, Tentative};
use crate::model::TraitModel;
use crate::prior::Prior;
use crate::tree::NodeId;

/// Gaussian random walk on the trait value of one latent node.
#[derive(Debug, Clone)]
pub struct NodeStateProposal {
    step: Normal<f64>,
    previous: Option<(NodeId, f64)>,
    likelihood: Tentative,
}

impl NodeStateProposal {
    pub fn new(scale: f64) -> Result<Self> {
        let step = Normal::new(0.0, scale)
            .map_err(|e| RateShiftError::Config(format!("node state scale {}: {}", scale, e)))?;
        Ok(Self {
            step,
            previous: None,
            likelihood: Tentative::default(),
        })
    }
}

impl Move for NodeStateProposal {
    fn propose<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, _prior: &Prior, rng: &mut R) {
        self.likelihood.current = model.current_log_likelihood();
        let Some(&node) = model.latent_nodes().choose(rng) else {
            self.previous = None;
            self.likelihood.proposed = self.likelihood.current;
            return;
        };
        let value = model.node_state(node);
        model.set_node_state(node, value + self.step.sample(rng));
        self.previous = Some((node, value));
        self.likelihood.proposed = model.compute_log_likelihood();
    }

    fn accept(&mut self, model: &mut TraitModel) {
        model.set_current_log_likelihood(self.likelihood.proposed);
        self.previous = None;
    }

    fn reject(&mut self, model: &mut TraitModel) {
        if let Some((node, value)) = self.previous.take() {
            model.set_node_state(node, value);
        }
    }

    fn log_acceptance(&self, model: &TraitModel, _prior: &Prior) -> f64 {
        log_mh_ratio(model.temperature(), self.likelihood.log_ratio(), 0.0, 0.0)
    }
}
