//! # Relative Inhibition (RI)
//!
//! RI is the average inhibition over the tested log10-dose window, obtained by closed-form
//! integration of the fitted curve rather than by numerical quadrature.
//!
//! Fitted asymptotes are on the percent scale. They are converted to fractional
//! inhibition before integrating, and the normalized area is multiplied back by 100, so a
//! curve sitting flat at 10% inhibition scores 10.

use std::f64::consts::LN_10;

use crate::fit::{FitError, FitOptions, fit_curve};
use crate::types::{DoseResponseCurve, FittedModel, ModelFamily};

/// Inhibition threshold subtracted from the area. Always zero for RI.
pub const BASELINE_THRESHOLD: f64 = 0.0;

/// Rounds to 3 decimal digits, the precision every reported score carries.
#[inline]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// `ln(1 + 10^(beta * (x - y)))`, switching to the linear asymptote when the power overflows.
fn log1p_pow10(beta: f64, x: f64, y: f64) -> f64 {
    let exponent = beta * (x - y);
    let arg = 1.0 + 10f64.powf(exponent);
    if arg.is_infinite() {
        exponent * LN_10
    } else {
        arg.ln()
    }
}

/// `ln(1 + exp(x))`, switching to `x` when the exponential overflows.
fn log1p_exp(x: f64) -> f64 {
    let arg = 1.0 + x.exp();
    if arg.is_infinite() { x } else { arg.ln() }
}

/// Normalized area under a fitted curve between log10 doses `c1 < c2`, times 100.
///
/// The result is not clamped: noisy curves may score below 0 or above 100.
pub fn score_curve(model: &FittedModel, c1: f64, c2: f64) -> f64 {
    let b = model.b;
    let c = model.c / 100.0;
    let d = model.d / 100.0;

    let int_y = match model.family {
        ModelFamily::LL4 => {
            let m = model.e.log10();
            if b == 0.0 {
                0.5 * (c + d) * (c2 - c1)
            } else {
                let antiderivative =
                    |x: f64| ((d - c) * log1p_pow10(-b, x, m)) / (-b * LN_10) + c * x;
                antiderivative(c2) - antiderivative(c1)
            }
        }
        ModelFamily::L4 => {
            let e = model.e;
            if b == 0.0 {
                0.5 * (c + d) * (c2 - c1)
            } else {
                d * (c2 - c1) + ((c - d) / b) * (log1p_exp(b * (c2 - e)) - log1p_exp(b * (c1 - e)))
            }
        }
    };

    100.0 * int_y / ((1.0 - BASELINE_THRESHOLD) * (c2 - c1))
}

/// Scores a single-drug curve.
///
/// The zero-dose anchor is dropped first. With one remaining dose the raw response is
/// the score. A curve with no positive dose at all scores its zero-dose response. When
/// neither curve family can be fitted, the mean observed response is returned instead.
/// Only an empty curve is an error.
pub fn calculate_ri(curve: &DoseResponseCurve, options: &FitOptions) -> Result<f64, FitError> {
    let treated = curve.without_zero_dose();
    match treated.len() {
        0 => match curve.points().first() {
            Some(anchor) => Ok(round3(anchor.response)),
            None => Err(FitError::TooFewPoints {
                family: ModelFamily::LL4,
                found: 0,
                required: 1,
            }),
        },
        1 => Ok(round3(treated.points()[0].response)),
        _ => {
            let doses = treated.doses();
            let c1 = doses[0].log10();
            let c2 = doses[doses.len() - 1].log10();
            match fit_curve(&treated, options) {
                Ok(model) => Ok(round3(score_curve(&model, c1, c2))),
                Err(e) => {
                    log::warn!("Scoring a curve with its mean response: {e}");
                    Ok(round3(treated.mean_response()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Trapezoid rule on a fine log10 grid, as an independent check of the closed forms.
    fn numeric_score(model: &FittedModel, c1: f64, c2: f64) -> f64 {
        let steps = 20_000;
        let h = (c2 - c1) / steps as f64;
        let mut area = 0.0;
        for i in 0..=steps {
            let x = c1 + h * i as f64;
            let w = if i == 0 || i == steps { 0.5 } else { 1.0 };
            area += w * model.evaluate(10f64.powf(x));
        }
        area * h / (c2 - c1)
    }

    #[test]
    fn log_logistic_closed_form_matches_quadrature() {
        let model = FittedModel {
            family: ModelFamily::LL4,
            b: -1.3,
            c: 2.0,
            d: 75.0,
            e: 4.0,
        };
        let (c1, c2) = (0.1954_f64.log10(), 50.0_f64.log10());
        assert_abs_diff_eq!(score_curve(&model, c1, c2), numeric_score(&model, c1, c2), epsilon = 1e-4);
    }

    #[test]
    fn logistic_closed_form_matches_quadrature() {
        let model = FittedModel {
            family: ModelFamily::L4,
            b: -2.4,
            c: -3.0,
            d: 88.0,
            e: 0.3,
        };
        let (c1, c2) = (-1.0, 2.0);
        assert_abs_diff_eq!(score_curve(&model, c1, c2), numeric_score(&model, c1, c2), epsilon = 1e-4);
    }

    #[test]
    fn extreme_slopes_stay_finite() {
        for b in [-1e4, 1e4] {
            for family in [ModelFamily::LL4, ModelFamily::L4] {
                let model = FittedModel {
                    family,
                    b,
                    c: 0.0,
                    d: 100.0,
                    e: 1.0,
                };
                let score = score_curve(&model, -2.0, 2.0);
                assert!(score.is_finite(), "{family} with b={b} gave {score}");
                assert!((-1e-6..=100.0 + 1e-6).contains(&score));
            }
        }
    }

    #[test]
    fn overflow_guard_uses_linear_asymptote() {
        assert_abs_diff_eq!(log1p_pow10(1.0, 400.0, 0.0), 400.0 * LN_10, epsilon = 1e-9);
        assert_abs_diff_eq!(log1p_exp(1000.0), 1000.0, epsilon = 1e-12);
        assert_abs_diff_eq!(log1p_exp(0.0), 2.0_f64.ln(), epsilon = 1e-15);
    }

    #[test]
    fn single_treated_dose_returns_its_response() {
        let curve = DoseResponseCurve::from_pairs(&[0.0, 12.5], &[1.0, 37.12345]);
        let ri = calculate_ri(&curve, &FitOptions::default()).unwrap();
        assert_eq!(ri, 37.123);
    }

    #[test]
    fn untreated_only_curve_returns_anchor_response() {
        let curve = DoseResponseCurve::from_pairs(&[0.0], &[4.5]);
        assert_eq!(calculate_ri(&curve, &FitOptions::default()).unwrap(), 4.5);
        assert!(calculate_ri(&DoseResponseCurve::default(), &FitOptions::default()).is_err());
    }

    #[test]
    fn flat_curve_scores_its_level() {
        let curve = DoseResponseCurve::from_pairs(&[1.0, 2.0, 4.0, 8.0], &[10.0, 10.0, 10.0, 10.0]);
        let ri = calculate_ri(&curve, &FitOptions::default()).unwrap();
        assert_abs_diff_eq!(ri, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn scores_are_rounded_to_three_decimals() {
        assert_eq!(round3(12.34567), 12.346);
        assert_eq!(round3(-0.0004), -0.0);
    }
}
