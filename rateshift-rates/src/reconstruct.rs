//! Posterior-mean branch rates on a fixed output grid.
//!
//! Each posterior sample describes every branch as a run of coarse
//! segments, one per rate regime. The caller supplies a fine segmentation
//! that does not depend on the sample. For every fine segment and sample
//! we take the time-averaged rate over the segment, then average over
//! samples:
//!
//! - a fine segment inside one coarse segment (within `tolerance`) gets the
//!   mean of that regime over its span;
//! - a fine segment that strictly brackets the boundary between two
//!   consecutive coarse segments of the same node gets the integral of the
//!   earlier regime up to the boundary plus the later regime from the
//!   boundary, divided by its width.
//!
//! Containment is tested with the tolerance and the straddle with strict
//! inequalities. Within one sample a fine segment takes a single
//! contribution: the first coarse row, in table order, that contains or
//! straddles it. A fine segment spanning several shifts is therefore
//! split only at the first of them; the fine grid should be at least as
//! fine as the shift spacing.

use std::collections::HashMap;

use tracing::debug;

use rateshift_core::rate::{mean_rate, time_integrated};
use rateshift_core::{
    EventRow, FineSegmentTable, NodeId, PosteriorSample, RateShiftError, Result, SegmentRow,
};

/// Fine-row positions grouped by node, in table order.
fn index_by_node(fine: &FineSegmentTable) -> HashMap<NodeId, Vec<usize>> {
    let mut index: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for (i, &node) in fine.nodes().iter().enumerate() {
        index.entry(node).or_default().push(i);
    }
    index
}

fn lookup(sample_idx: usize, sample: &PosteriorSample, row: &SegmentRow) -> Result<EventRow> {
    sample
        .events
        .get(row.event)
        .ok_or(RateShiftError::MissingEvent {
            sample: sample_idx,
            index: row.event,
            available: sample.events.len(),
        })
}

/// Mean rate of each fine row under one sample; rows the sample does not
/// cover stay at zero. Also returns how many rows were left uncovered.
fn sample_rates(
    sample_idx: usize,
    sample: &PosteriorSample,
    fine: &FineSegmentTable,
    index: &HashMap<NodeId, Vec<usize>>,
    tolerance: f64,
) -> Result<(Vec<f64>, usize)> {
    let mut rates = vec![0.0; fine.len()];
    let mut covered = vec![false; fine.len()];
    let segments = &sample.segments;

    for j in 0..segments.len() {
        let coarse = segments.row(j);
        let event = lookup(sample_idx, sample, &coarse)?;
        let Some(rows) = index.get(&coarse.node) else {
            continue;
        };
        // The last row of the table has no successor to straddle into.
        let next = (j + 1 < segments.len())
            .then(|| segments.row(j + 1))
            .filter(|next| next.node == coarse.node);

        for &f in rows {
            if covered[f] {
                continue;
            }
            let seg = fine.row(f);
            if seg.start >= coarse.start - tolerance && seg.end <= coarse.end + tolerance {
                rates[f] += mean_rate(
                    seg.start - event.time,
                    seg.end - event.time,
                    event.lambda_init,
                    event.lambda_shift,
                );
                covered[f] = true;
                continue;
            }
            let Some(next) = next else {
                continue;
            };
            let shift = coarse.end;
            if seg.start < shift && shift < seg.end {
                let later = lookup(sample_idx, sample, &next)?;
                let left = time_integrated(
                    seg.start - event.time,
                    shift - event.time,
                    event.lambda_init,
                    event.lambda_shift,
                );
                let right =
                    time_integrated(0.0, seg.end - shift, later.lambda_init, later.lambda_shift);
                rates[f] += (left + right) / (seg.end - seg.start);
                covered[f] = true;
            }
        }
    }

    let uncovered = covered.iter().filter(|&&c| !c).count();
    Ok((rates, uncovered))
}

/// Average rate of every fine segment over all posterior samples, in the
/// row order of `fine`.
///
/// `tolerance` widens the containment test and must be finite and
/// non-negative. An empty sample list yields zeros. Any segment row whose
/// event index has no record fails the whole reconstruction.
#[tracing::instrument(skip_all, fields(samples = samples.len(), fine_rows = fine.len()))]
pub fn reconstruct_rates(
    samples: &[PosteriorSample],
    fine: &FineSegmentTable,
    tolerance: f64,
) -> Result<Vec<f64>> {
    if !(tolerance.is_finite() && tolerance >= 0.0) {
        return Err(RateShiftError::InvalidInput(format!(
            "tolerance must be finite and >= 0, got {}",
            tolerance
        )));
    }
    let mut totals = vec![0.0; fine.len()];
    if samples.is_empty() {
        return Ok(totals);
    }
    let index = index_by_node(fine);

    #[cfg(feature = "parallel")]
    let per_sample: Vec<(Vec<f64>, usize)> = {
        use rayon::prelude::*;
        samples
            .par_iter()
            .enumerate()
            .map(|(s, sample)| sample_rates(s, sample, fine, &index, tolerance))
            .collect::<Result<_>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let per_sample: Vec<(Vec<f64>, usize)> = samples
        .iter()
        .enumerate()
        .map(|(s, sample)| sample_rates(s, sample, fine, &index, tolerance))
        .collect::<Result<_>>()?;

    // Summed in sample order so the result does not depend on scheduling.
    let n = samples.len() as f64;
    let mut uncovered = 0;
    for (rates, missed) in &per_sample {
        for (total, r) in totals.iter_mut().zip(rates) {
            *total += r / n;
        }
        uncovered += missed;
    }
    debug!(uncovered, "reconstruction finished");
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rateshift_core::{EventTable, FineSegmentRow, SegmentTable};

    fn event(time: f64, lambda_init: f64, lambda_shift: f64) -> EventRow {
        EventRow {
            time,
            lambda_init,
            lambda_shift,
        }
    }

    fn seg(node: NodeId, start: f64, end: f64, event: usize) -> SegmentRow {
        SegmentRow {
            node,
            start,
            end,
            event,
        }
    }

    fn sample(events: &[EventRow], segments: &[SegmentRow]) -> PosteriorSample {
        let mut ev = EventTable::new();
        for &e in events {
            ev.push(e);
        }
        let mut sg = SegmentTable::new();
        for &s in segments {
            sg.push(s);
        }
        PosteriorSample {
            events: ev,
            segments: sg,
        }
    }

    fn fine(rows: &[(NodeId, f64, f64)]) -> FineSegmentTable {
        rows.iter()
            .map(|&(node, start, end)| FineSegmentRow { node, start, end })
            .collect()
    }

    /// Two regimes on node 1 meeting at t = 3.
    fn two_regimes(lambda_b: f64) -> PosteriorSample {
        sample(
            &[event(0.0, 1.0, 0.0), event(3.0, lambda_b, 0.0)],
            &[seg(1, 0.0, 3.0, 1), seg(1, 3.0, 6.0, 2)],
        )
    }

    #[test]
    fn contained_segment_gets_regime_mean() {
        let s = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 5.0, 1)]);
        let rates = reconstruct_rates(&[s], &fine(&[(1, 0.0, 2.0)]), 1e-8).unwrap();
        assert_eq!(rates, vec![1.0]);
    }

    #[test]
    fn straddling_segment_splits_at_shift() {
        let rates = reconstruct_rates(&[two_regimes(2.0)], &fine(&[(1, 2.0, 4.0)]), 1e-8).unwrap();
        assert!((rates[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn samples_are_averaged() {
        let a = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 5.0, 1)]);
        let b = sample(&[event(0.0, 3.0, 0.0)], &[seg(1, 0.0, 5.0, 1)]);
        let rates = reconstruct_rates(&[a, b], &fine(&[(1, 1.0, 2.0)]), 1e-8).unwrap();
        assert!((rates[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn output_follows_fine_row_order() {
        let grid = fine(&[(1, 4.0, 6.0), (1, 0.0, 1.0), (1, 2.0, 4.0)]);
        let rates = reconstruct_rates(&[two_regimes(2.0)], &grid, 1e-8).unwrap();
        assert!((rates[0] - 2.0).abs() < 1e-12);
        assert!((rates[1] - 1.0).abs() < 1e-12);
        assert!((rates[2] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn exponential_straddle_matches_quadrature() {
        let s = sample(
            &[event(0.0, 1.0, 0.5), event(3.0, 2.0, -0.2)],
            &[seg(1, 0.0, 3.0, 1), seg(1, 3.0, 6.0, 2)],
        );
        let rates = reconstruct_rates(&[s], &fine(&[(1, 2.0, 4.0)]), 1e-8).unwrap();
        let steps = 20_000;
        let h = 2.0 / steps as f64;
        let integral: f64 = (0..steps)
            .map(|k| {
                let t = 2.0 + (k as f64 + 0.5) * h;
                let r = if t < 3.0 {
                    (0.5 * t).exp()
                } else {
                    2.0 * (-0.2 * (t - 3.0)).exp()
                };
                r * h
            })
            .sum();
        assert!((rates[0] - integral / 2.0).abs() < 1e-6);
    }

    #[test]
    fn later_regime_does_not_leak_into_earlier_rows() {
        // A straddle reads the successor's parameters; the next fine row of
        // the earlier regime must still use the earlier parameters.
        let grid = fine(&[(1, 2.0, 4.0), (1, 0.0, 1.0)]);
        let rates = reconstruct_rates(&[two_regimes(5.0)], &grid, 1e-8).unwrap();
        assert!((rates[0] - 3.0).abs() < 1e-12);
        assert_eq!(rates[1], 1.0);
    }

    #[test]
    fn tolerant_containment_blocks_straddle() {
        let grid = fine(&[(1, 0.0, 3.0 + 1e-9)]);
        let rates = reconstruct_rates(&[two_regimes(2.0)], &grid, 1e-8).unwrap();
        assert_eq!(rates, vec![1.0]);
    }

    #[test]
    fn row_spanning_two_shifts_takes_first_split_only() {
        let s = sample(
            &[event(0.0, 1.0, 0.0), event(2.0, 2.0, 0.0), event(4.0, 4.0, 0.0)],
            &[seg(1, 0.0, 2.0, 1), seg(1, 2.0, 4.0, 2), seg(1, 4.0, 6.0, 3)],
        );
        let rates = reconstruct_rates(&[s], &fine(&[(1, 1.0, 5.0)]), 1e-8).unwrap();
        // 1 * (2 - 1) + 2 * (5 - 2) over a width of 4.
        assert!((rates[0] - 1.75).abs() < 1e-12);
    }

    #[test]
    fn final_row_has_no_successor() {
        let s = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 3.0, 1)]);
        let rates = reconstruct_rates(&[s], &fine(&[(1, 2.0, 4.0)]), 1e-8).unwrap();
        assert_eq!(rates, vec![0.0]);
    }

    #[test]
    fn successor_on_another_node_is_not_a_shift() {
        let s = sample(
            &[event(0.0, 1.0, 0.0), event(0.0, 9.0, 0.0)],
            &[seg(1, 0.0, 3.0, 1), seg(2, 3.0, 6.0, 2)],
        );
        let rates = reconstruct_rates(&[s], &fine(&[(1, 2.0, 4.0)]), 1e-8).unwrap();
        assert_eq!(rates, vec![0.0]);
    }

    #[test]
    fn missing_event_fails_whole_run() {
        let good = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 5.0, 1)]);
        let bad = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 5.0, 2)]);
        let err = reconstruct_rates(&[good, bad], &fine(&[(1, 0.0, 1.0)]), 1e-8).unwrap_err();
        match err {
            RateShiftError::MissingEvent {
                sample,
                index,
                available,
            } => {
                assert_eq!((sample, index, available), (1, 2, 1));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn event_index_zero_is_missing() {
        let s = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 5.0, 0)]);
        assert!(reconstruct_rates(&[s], &fine(&[(1, 0.0, 1.0)]), 0.0).is_err());
    }

    #[test]
    fn missing_successor_event_fails_straddle() {
        let s = sample(
            &[event(0.0, 1.0, 0.0)],
            &[seg(1, 0.0, 3.0, 1), seg(1, 3.0, 6.0, 7)],
        );
        assert!(reconstruct_rates(&[s], &fine(&[(1, 2.0, 4.0)]), 1e-8).is_err());
    }

    #[test]
    fn invalid_tolerance_rejected() {
        let grid = fine(&[(1, 0.0, 1.0)]);
        assert!(reconstruct_rates(&[], &grid, -1e-9).is_err());
        assert!(reconstruct_rates(&[], &grid, f64::NAN).is_err());
        assert!(reconstruct_rates(&[], &grid, f64::INFINITY).is_err());
    }

    #[test]
    fn no_samples_yields_zeros() {
        let rates = reconstruct_rates(&[], &fine(&[(1, 0.0, 1.0), (2, 0.0, 1.0)]), 1e-8).unwrap();
        assert_eq!(rates, vec![0.0, 0.0]);
    }

    #[test]
    fn node_without_coarse_rows_stays_zero() {
        let s = sample(&[event(0.0, 1.0, 0.0)], &[seg(1, 0.0, 5.0, 1)]);
        let rates = reconstruct_rates(&[s], &fine(&[(3, 0.0, 1.0)]), 1e-8).unwrap();
        assert_eq!(rates, vec![0.0]);
    }

    #[test]
    fn ordered_sum_matches_sequential_fold() {
        let samples: Vec<_> = (0..25)
            .map(|i| {
                let l = 0.1 + i as f64 * 0.37;
                sample(
                    &[event(0.0, l, 0.01 * i as f64), event(2.5, 1.0 / l, -0.03)],
                    &[seg(1, 0.0, 2.5, 1), seg(1, 2.5, 6.0, 2), seg(2, 0.0, 4.0, 1)],
                )
            })
            .collect();
        let grid = fine(&[(1, 0.0, 2.0), (1, 2.0, 3.0), (1, 3.0, 6.0), (2, 1.0, 4.0)]);
        let index = index_by_node(&grid);
        let mut expected = vec![0.0; grid.len()];
        for (s, x) in samples.iter().enumerate() {
            let (rates, _) = sample_rates(s, x, &grid, &index, 1e-8).unwrap();
            for (e, r) in expected.iter_mut().zip(&rates) {
                *e += r / samples.len() as f64;
            }
        }
        let got = reconstruct_rates(&samples, &grid, 1e-8).unwrap();
        for (g, e) in got.iter().zip(&expected) {
            assert_eq!(g.to_bits(), e.to_bits());
        }
    }
}
