//! Rate-shift events attached to branches.

use rateshift_core::rate;
use rateshift_core::EventRow;

use crate::tree::{NodeId, PhyloTree};

/// A point on the tree after which a new exponential rate regime applies.
///
/// The regime's rate is `lambda_init · exp(lambda_shift · (t − time))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchEvent {
    /// Node whose branch carries the event.
    pub node: NodeId,
    /// Absolute origin time; strictly inside the owning branch for shifts.
    pub time: f64,
    pub lambda_init: f64,
    pub lambda_shift: f64,
}

impl BranchEvent {
    pub fn new(node: NodeId, time: f64, lambda_init: f64, lambda_shift: f64) -> Self {
        Self {
            node,
            time,
            lambda_init,
            lambda_shift,
        }
    }

    /// Instantaneous rate at absolute time `t`.
    pub fn rate_at(&self, t: f64) -> f64 {
        rate::rate_at(t - self.time, self.lambda_init, self.lambda_shift)
    }

    /// Integral of the rate over the absolute interval `[from, to]`.
    pub fn integrated_rate(&self, from: f64, to: f64) -> f64 {
        rate::time_integrated(
            from - self.time,
            to - self.time,
            self.lambda_init,
            self.lambda_shift,
        )
    }

    /// True if the origin lies strictly inside the owning branch.
    pub fn is_inside_branch(&self, tree: &PhyloTree) -> bool {
        self.time > tree.branch_start(self.node) && self.time < tree.branch_end(self.node)
    }

    pub fn to_row(&self) -> EventRow {
        EventRow {
            time: self.time,
            lambda_init: self.lambda_init,
            lambda_shift: self.lambda_shift,
        }
    }
}

/// Handle to an event owned by a [`crate::model::TraitModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventRef {
    /// The background regime starting at the root.
    Root,
    /// Position in the model's ordered list of shift events.
    Shift(usize),
}

impl EventRef {
    pub fn is_root(self) -> bool {
        matches!(self, EventRef::Root)
    }
}
