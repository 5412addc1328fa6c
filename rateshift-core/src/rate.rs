//! Piecewise-exponential rate functions.
//!
//! A rate regime starting at origin `T0` has instantaneous rate
//! `λ1 · exp(λ2 · (t − T0))`. All helpers here take times already shifted
//! to the regime origin, so `t = 0` is the moment the regime begins.
//!
//! The exponential branches are written with [`f64::exp_m1`], which is the
//! same closed form as `(λ1/λ2)·(exp(λ2·t2) − exp(λ2·t1))` but keeps its
//! precision when `λ2·(t2 − t1)` is tiny.

/// Instantaneous rate at relative time `t`.
pub fn rate_at(t: f64, lambda_init: f64, lambda_shift: f64) -> f64 {
    if lambda_shift == 0.0 {
        return lambda_init;
    }
    lambda_init * (lambda_shift * t).exp()
}

/// Integral of the rate over the relative interval `[t1, t2]`.
pub fn time_integrated(t1: f64, t2: f64, lambda_init: f64, lambda_shift: f64) -> f64 {
    if lambda_shift == 0.0 {
        return lambda_init * (t2 - t1);
    }
    (lambda_init / lambda_shift) * (lambda_shift * t1).exp() * (lambda_shift * (t2 - t1)).exp_m1()
}

/// Time-averaged rate over the relative interval `[t1, t2]`.
///
/// A zero-width interval returns the instantaneous rate at `t1`, which is
/// the limit of the average as the width goes to zero.
pub fn mean_rate(t1: f64, t2: f64, lambda_init: f64, lambda_shift: f64) -> f64 {
    if lambda_shift == 0.0 {
        return lambda_init;
    }
    let width = t2 - t1;
    if width == 0.0 {
        return rate_at(t1, lambda_init, lambda_shift);
    }
    time_integrated(t1, t2, lambda_init, lambda_shift) / width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_regime_mean_is_lambda_init() {
        assert_eq!(mean_rate(0.0, 2.0, 1.0, 0.0), 1.0);
        assert_eq!(mean_rate(-3.0, 7.5, 0.25, 0.0), 0.25);
    }

    #[test]
    fn constant_regime_integral_is_rate_times_width() {
        assert_eq!(time_integrated(1.0, 4.0, 2.0, 0.0), 6.0);
    }

    #[test]
    fn exponential_integral_matches_closed_form() {
        let (t1, t2, l1, l2): (f64, f64, f64, f64) = (0.5, 2.0, 1.3, -0.4);
        let direct = (l1 / l2) * ((l2 * t2).exp() - (l2 * t1).exp());
        assert!((time_integrated(t1, t2, l1, l2) - direct).abs() < 1e-12);
    }

    #[test]
    fn zero_width_mean_is_instantaneous_rate() {
        assert!((mean_rate(1.5, 1.5, 2.0, 0.3) - 2.0 * (0.45f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn rate_at_origin_is_lambda_init() {
        assert_eq!(rate_at(0.0, 0.7, -1.2), 0.7);
    }
}
