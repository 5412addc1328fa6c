//! Metropolis-Hastings proposals over the rate-shift configuration.
//!
//! Every proposal follows the same cycle: [`Move::propose`] edits the
//! model's parameters in place and records what it changed, then the chain
//! calls exactly one of [`Move::accept`] or [`Move::reject`]. The model's
//! cached log-likelihood is only written on accept, so a rejected move
//! leaves the model bit-for-bit as it was before `propose`.

mod event_number;
mod event_parameter;
mod event_position;
mod node_state;

use std::fmt;

use rand::Rng;

use rateshift_core::Result;

use crate::model::TraitModel;
use crate::prior::Prior;
use crate::settings::Tuning;
use crate::tree::NodeId;

pub use event_number::EventNumberProposal;
pub use event_parameter::{EventParameter, EventParameterProposal};
pub use event_position::EventPositionProposal;
pub use node_state::NodeStateProposal;

/// The operations every proposal variant supplies.
pub trait Move {
    /// Pick a target, remember its current value, install a new one and
    /// evaluate the tentative likelihood.
    fn propose<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, prior: &Prior, rng: &mut R);

    /// Keep the installed values and commit the tentative likelihood.
    fn accept(&mut self, model: &mut TraitModel);

    /// Restore the values recorded by `propose`.
    fn reject(&mut self, model: &mut TraitModel);

    /// Log of the un-truncated acceptance ratio.
    fn log_acceptance(&self, model: &TraitModel, prior: &Prior) -> f64;

    /// `min(1, exp(log_acceptance))`, or 0 when the log ratio is NaN.
    fn acceptance_ratio(&self, model: &TraitModel, prior: &Prior) -> f64 {
        clamp_ratio(self.log_acceptance(model, prior))
    }
}

/// Tag identifying a proposal variant in bookkeeping and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProposalKind {
    LambdaInit,
    LambdaShift,
    EventNumber,
    EventPosition,
    NodeState,
}

impl ProposalKind {
    pub const ALL: [ProposalKind; 5] = [
        ProposalKind::LambdaInit,
        ProposalKind::LambdaShift,
        ProposalKind::EventNumber,
        ProposalKind::EventPosition,
        ProposalKind::NodeState,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProposalKind::LambdaInit => "lambda_init",
            ProposalKind::LambdaShift => "lambda_shift",
            ProposalKind::EventNumber => "event_number",
            ProposalKind::EventPosition => "event_position",
            ProposalKind::NodeState => "node_state",
        }
    }
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A proposal of any kind, dispatched by the chain driver.
#[derive(Debug, Clone)]
pub enum Proposal {
    LambdaInit(EventParameterProposal),
    LambdaShift(EventParameterProposal),
    EventNumber(EventNumberProposal),
    EventPosition(EventPositionProposal),
    NodeState(NodeStateProposal),
}

impl Proposal {
    /// Build the proposal for `kind` with step widths from `tuning`.
    pub fn new(kind: ProposalKind, tuning: &Tuning) -> Result<Self> {
        Ok(match kind {
            ProposalKind::LambdaInit => Proposal::LambdaInit(EventParameterProposal::new(
                EventParameter::LambdaInit,
                tuning.lambda_init_scale,
            )?),
            ProposalKind::LambdaShift => Proposal::LambdaShift(EventParameterProposal::new(
                EventParameter::LambdaShift,
                tuning.lambda_shift_scale,
            )?),
            ProposalKind::EventNumber => Proposal::EventNumber(EventNumberProposal::new()),
            ProposalKind::EventPosition => Proposal::EventPosition(EventPositionProposal::new(
                tuning.local_move_scale,
                tuning.global_move_prob,
            )?),
            ProposalKind::NodeState => {
                Proposal::NodeState(NodeStateProposal::new(tuning.node_state_scale)?)
            }
        })
    }

    pub fn kind(&self) -> ProposalKind {
        match self {
            Proposal::LambdaInit(_) => ProposalKind::LambdaInit,
            Proposal::LambdaShift(_) => ProposalKind::LambdaShift,
            Proposal::EventNumber(_) => ProposalKind::EventNumber,
            Proposal::EventPosition(_) => ProposalKind::EventPosition,
            Proposal::NodeState(_) => ProposalKind::NodeState,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            Proposal::LambdaInit($p) | Proposal::LambdaShift($p) => $body,
            Proposal::EventNumber($p) => $body,
            Proposal::EventPosition($p) => $body,
            Proposal::NodeState($p) => $body,
        }
    };
}

impl Move for Proposal {
    fn propose<R: Rng + ?Sized>(&mut self, model: &mut TraitModel, prior: &Prior, rng: &mut R) {
        dispatch!(self, p => p.propose(model, prior, rng))
    }

    fn accept(&mut self, model: &mut TraitModel) {
        dispatch!(self, p => p.accept(model))
    }

    fn reject(&mut self, model: &mut TraitModel) {
        dispatch!(self, p => p.reject(model))
    }

    fn log_acceptance(&self, model: &TraitModel, prior: &Prior) -> f64 {
        dispatch!(self, p => p.log_acceptance(model, prior))
    }
}

/// Tempered Metropolis-Hastings log ratio:
/// `T · (Δ log-likelihood + Δ log-prior) + log Q`.
pub(crate) fn log_mh_ratio(
    temperature: f64,
    log_likelihood_ratio: f64,
    log_prior_ratio: f64,
    log_q_ratio: f64,
) -> f64 {
    temperature * (log_likelihood_ratio + log_prior_ratio) + log_q_ratio
}

/// Map a log ratio to an acceptance probability; NaN forces rejection.
pub(crate) fn clamp_ratio(log_ratio: f64) -> f64 {
    if log_ratio.is_nan() {
        return 0.0;
    }
    log_ratio.exp().min(1.0)
}

/// Likelihoods before and after a move.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tentative {
    pub current: f64,
    pub proposed: f64,
}

impl Default for Tentative {
    fn default() -> Self {
        Self {
            current: f64::NEG_INFINITY,
            proposed: f64::NEG_INFINITY,
        }
    }
}

impl Tentative {
    pub fn log_ratio(&self) -> f64 {
        self.proposed - self.current
    }
}

/// Draw a location uniformly over the tree, strictly inside a branch.
pub(crate) fn draw_location<R: Rng + ?Sized>(model: &TraitModel, rng: &mut R) -> (NodeId, f64) {
    let tree = model.tree();
    let length = model.tree_length();
    let mut last = None;
    for _ in 0..64 {
        let Some((node, time)) = tree.locate(rng.gen::<f64>() * length) else {
            break;
        };
        if time > tree.branch_start(node) && time < tree.branch_end(node) {
            return (node, time);
        }
        last = Some(node);
    }
    // Only reachable on degenerate draws that keep landing on a node.
    let node = last.unwrap_or_else(|| tree.leaves()[0]);
    (node, 0.5 * (tree.branch_start(node) + tree.branch_end(node)))
}
