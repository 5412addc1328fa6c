//! Branch-rate reconstruction from rate-shift posterior samples.
//!
//! Turns the per-sample coarse segmentations written by the sampler into a
//! posterior-mean rate for every row of a caller-fixed fine segmentation.
//! With the `parallel` feature (on by default) samples are processed on the
//! rayon thread pool.

pub mod reconstruct;

pub use reconstruct::reconstruct_rates;
