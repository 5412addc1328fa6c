//! Shared primitives for the rateshift crates.
//!
//! `rateshift-core` provides the foundation that the sampler and the rate
//! reconstruction build on:
//!
//! - **Error types**: [`RateShiftError`] and [`Result`] for structured error handling
//! - **Rate math**: closed-form integrals and averages of exponential rate regimes
//! - **Sample tables**: columnar event and segment tables that carry posterior samples

pub mod error;
pub mod rate;
pub mod sample;

pub use error::{RateShiftError, Result};
pub use sample::{
    EventRow, EventTable, FineSegmentRow, FineSegmentTable, NodeId, PosteriorSample, SegmentRow,
    SegmentTable,
};
