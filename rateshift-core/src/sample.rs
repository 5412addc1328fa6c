//! Fixed-schema tables exchanged between the sampler and rate reconstruction.
//!
//! Tables are stored column-wise. Event rows are addressed by a 1-based
//! index, matching the `event` column of [`SegmentTable`].

use std::collections::HashSet;

use crate::{RateShiftError, Result};

/// Index of a node in a tree's node arena.
pub type NodeId = usize;

/// One rate regime: origin time and `(λ1, λ2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventRow {
    pub time: f64,
    pub lambda_init: f64,
    pub lambda_shift: f64,
}

/// Per-sample event parameters.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventTable {
    time: Vec<f64>,
    lambda_init: Vec<f64>,
    lambda_shift: Vec<f64>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row and return its 1-based index.
    pub fn push(&mut self, row: EventRow) -> usize {
        self.time.push(row.time);
        self.lambda_init.push(row.lambda_init);
        self.lambda_shift.push(row.lambda_shift);
        self.time.len()
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Row at a 1-based index, or `None` when out of range (including 0).
    pub fn get(&self, index: usize) -> Option<EventRow> {
        let i = index.checked_sub(1)?;
        Some(EventRow {
            time: *self.time.get(i)?,
            lambda_init: self.lambda_init[i],
            lambda_shift: self.lambda_shift[i],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = EventRow> + '_ {
        (0..self.len()).map(move |i| EventRow {
            time: self.time[i],
            lambda_init: self.lambda_init[i],
            lambda_shift: self.lambda_shift[i],
        })
    }
}

/// One coarse segment: a piece of a branch governed by a single event.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentRow {
    pub node: NodeId,
    pub start: f64,
    pub end: f64,
    /// 1-based row in the sample's [`EventTable`].
    pub event: usize,
}

/// Per-sample coarse segmentation of every branch.
///
/// Rows for one node are contiguous, time-ordered, and tile its branch.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentTable {
    node: Vec<NodeId>,
    start: Vec<f64>,
    end: Vec<f64>,
    event: Vec<usize>,
}

impl SegmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: SegmentRow) {
        self.node.push(row.node);
        self.start.push(row.start);
        self.end.push(row.end);
        self.event.push(row.event);
    }

    pub fn len(&self) -> usize {
        self.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }

    /// Row `i` (0-based). Panics when out of range, like slice indexing.
    pub fn row(&self, i: usize) -> SegmentRow {
        SegmentRow {
            node: self.node[i],
            start: self.start[i],
            end: self.end[i],
            event: self.event[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = SegmentRow> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    /// Check that each node's rows are contiguous in the table, ordered, and
    /// meet end-to-start within `tolerance`.
    ///
    /// `sample` is only used to label the error.
    pub fn validate_tiling(&self, sample: usize, tolerance: f64) -> Result<()> {
        let mut finished: HashSet<NodeId> = HashSet::new();
        for i in 0..self.len() {
            let row = self.row(i);
            let fail = |reason: String| RateShiftError::BadTiling {
                sample,
                node: row.node,
                reason,
            };
            if row.end < row.start {
                return Err(fail(format!("row {} ends before it starts", i)));
            }
            let continues = i > 0 && self.node[i - 1] == row.node;
            if continues {
                let gap = row.start - self.end[i - 1];
                if gap.abs() > tolerance {
                    return Err(fail(format!(
                        "row {} starts {} away from the previous row's end",
                        i, gap
                    )));
                }
            } else if !finished.insert(row.node) {
                return Err(fail(format!("rows are split around row {}", i)));
            }
        }
        Ok(())
    }
}

/// One fine segment of the reconstruction output grid.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FineSegmentRow {
    pub node: NodeId,
    pub start: f64,
    pub end: f64,
}

/// Sample-independent output grid for rate reconstruction.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FineSegmentTable {
    node: Vec<NodeId>,
    start: Vec<f64>,
    end: Vec<f64>,
}

impl FineSegmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: FineSegmentRow) {
        self.node.push(row.node);
        self.start.push(row.start);
        self.end.push(row.end);
    }

    pub fn len(&self) -> usize {
        self.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.node
    }

    pub fn row(&self, i: usize) -> FineSegmentRow {
        FineSegmentRow {
            node: self.node[i],
            start: self.start[i],
            end: self.end[i],
        }
    }
}

impl FromIterator<FineSegmentRow> for FineSegmentTable {
    fn from_iter<I: IntoIterator<Item = FineSegmentRow>>(iter: I) -> Self {
        let mut table = Self::new();
        for row in iter {
            table.push(row);
        }
        table
    }
}

/// One saved chain state.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PosteriorSample {
    pub events: EventTable,
    pub segments: SegmentTable,
}
