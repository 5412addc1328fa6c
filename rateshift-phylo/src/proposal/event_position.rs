//! Relocation of a shift event, by a reflected slide or a jump anywhere on the tree.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use rateshift_core::{RateShiftError, Result};

use super::{draw_location, log_mh_ratio, Move, Tentative};
use crate::event::EventRef;
use crate::model::TraitModel;
use crate::prior::Prior;
use crate::tree::NodeId;

/// Moves one shift event, either sliding it along its branch or
/// relocating it uniformly over the tree.
///
/// Both kernels are symmetric and the location prior is uniform, so the
/// move contributes only its likelihood ratio.
#[derive(Debug, Clone)]
pub struct EventPositionProposal {
    slide: Normal<f64>,
    global_prob: f64,
    moved: Option<(usize, NodeId, f64)>,
    likelihood: Tentative,
}

/// Reflect `time` into `[start, end]`.
fn reflect_into(time: f64, start: f64, end: f64) -> f64 {
    let len = end - start;
    let mut x = (time - start).rem_euclid(2.0 * len);
    if x > len {
        x = 2.0 * len - x;
    }
    start + x
}

impl EventPositionProposal {
    pub fn new(local_scale: f64, global_prob: f64) -> Result<Self> {
        let slide = Normal::new(0.0, local_scale).map_err(|e| {
            RateShiftError::Config(format!("local move scale {}: {}", local_scale, e))
        })?;
        if !(0.0..=1.0).contains(&global_prob) {
            return Err(RateShiftError::Config(format!(
                "global move probability {} outside [0, 1]",
                global_prob
            )));
        }
        Ok(Self {
            slide,
            global_prob,
            moved: None,
            likelihood: Tentative::default(),
        })
    }
}

impl Move for EventPositionProposal {
    fn propose<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, _prior: &Prior, rng: &mut R) {
        self.likelihood.current = model.current_log_likelihood();
        let Some(EventRef::Shift(index)) = model.choose_event_at_random(false, rng) else {
            self.moved = None;
            self.likelihood.proposed = self.likelihood.current;
            return;
        };

        let old = model.shifts()[index];
        let (node, time) = if rng.gen::<f64>() < self.global_prob {
            draw_location(model, rng)
        } else {
            let tree = model.tree();
            let time = reflect_into(
                old.time + self.slide.sample(rng),
                tree.branch_start(old.node),
                tree.branch_end(old.node),
            );
            (old.node, time)
        };
        let event = model.event_mut(EventRef::Shift(index));
        event.node = node;
        event.time = time;
        self.moved = Some((index, old.node, old.time));

        self.likelihood.proposed = model.compute_log_likelihood();
    }

    fn accept(&mut self, model: &mut TraitModel) {
        model.set_current_log_likelihood(self.likelihood.proposed);
        self.moved = None;
    }

    fn reject(&mut self, model: &mut TraitModel) {
        if let Some((index, node, time)) = self.moved.take() {
            let event = model.event_mut(EventRef::Shift(index));
            event.node = node;
            event.time = time;
        }
    }

    fn log_acceptance(&self, model: &TraitModel, _prior: &Prior) -> f64 {
        log_mh_ratio(model.temperature(), self.likelihood.log_ratio(), 0.0, 0.0)
    }
}
