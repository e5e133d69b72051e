//! Internal rate of return by bisection.

use crate::core::error::CalcError;
use tracing::debug;

pub const LOWER_BOUND: f64 = -0.99;
pub const UPPER_BOUND: f64 = 10.0;
const RELATIVE_TOLERANCE: f64 = 1e-6;
const ABSOLUTE_TOLERANCE: f64 = 1e-9;
const MAX_ITERATIONS: usize = 200;

/// Net present value of `flows`, where `flows[t]` occurs at the end of year `t`.
pub fn npv(rate: f64, flows: &[f64]) -> f64 {
    let base = 1.0 + rate;
    flows
        .iter()
        .enumerate()
        .map(|(t, cf)| cf / base.powi(t as i32))
        .sum()
}

/// Finds the rate in [-0.99, 10.0] at which `npv` crosses zero.
///
/// Fails with [`CalcError::NoConvergence`] when the NPV has the same sign at
/// both ends of the bracket.
pub fn irr(flows: &[f64]) -> Result<f64, CalcError> {
    if flows.len() < 2 {
        return Err(CalcError::NoConvergence(
            "need at least two cash flows".to_string(),
        ));
    }

    let (mut lo, mut hi) = (LOWER_BOUND, UPPER_BOUND);
    let mut npv_lo = npv(lo, flows);
    let npv_hi = npv(hi, flows);

    if npv_lo == 0.0 {
        return Ok(lo);
    }
    if npv_hi == 0.0 {
        return Ok(hi);
    }
    if npv_lo.signum() == npv_hi.signum() {
        return Err(CalcError::NoConvergence(format!(
            "no sign change between {LOWER_BOUND} and {UPPER_BOUND}"
        )));
    }

    for iteration in 1..=MAX_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        let npv_mid = npv(mid, flows);

        if npv_mid == 0.0
            || (hi - lo) / 2.0 <= (RELATIVE_TOLERANCE * mid.abs()).max(ABSOLUTE_TOLERANCE)
        {
            debug!(iteration, rate = mid, "IRR converged");
            return Ok(mid);
        }

        if npv_mid.signum() == npv_lo.signum() {
            lo = mid;
            npv_lo = npv_mid;
        } else {
            hi = mid;
        }
    }

    Err(CalcError::NoConvergence(format!(
        "bracket still wider than tolerance after {MAX_ITERATIONS} iterations"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_doubling() {
        // -100 today, +121 in two years => 10%
        let rate = irr(&[-100.0, 0.0, 121.0]).unwrap();
        assert!((rate - 0.10).abs() < 1e-6, "rate was {rate}");
    }

    #[test]
    fn test_root_zeroes_npv() {
        let flows = [-110000.0, 4000.0, 4000.0, 4000.0, 4000.0, 130000.0];
        let rate = irr(&flows).unwrap();
        // bracket half-width is ~1e-7, NPV slope here is ~4e5 per unit rate
        assert!(npv(rate, &flows).abs() < 0.5);
    }

    #[test]
    fn test_negative_return() {
        let flows = [-1000.0, 100.0, 100.0, 500.0];
        let rate = irr(&flows).unwrap();
        assert!(rate < 0.0);
        assert!(npv(rate, &flows).abs() < 1e-2);
    }

    #[test]
    fn test_no_sign_change_does_not_converge() {
        assert!(matches!(
            irr(&[100.0, 50.0, 25.0]),
            Err(CalcError::NoConvergence(_))
        ));
        assert!(matches!(
            irr(&[-100.0, -50.0]),
            Err(CalcError::NoConvergence(_))
        ));
        assert!(matches!(irr(&[-100.0]), Err(CalcError::NoConvergence(_))));
    }
}
