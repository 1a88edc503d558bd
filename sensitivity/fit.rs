//! # Four-Parameter Dose-Response Fitting
//!
//! Fits `f(x) = c + (d - c) / (1 + exp(b * (t(x) - t(e))))` to a dose-response curve by
//! least squares. Two parameterizations are tried in order:
//!
//! 1.  `LL4` (primary): the classic log-logistic model. It reports the inflection `e`
//!     on the dose scale but optimizes `ln e`, because the gradient in `e` shrinks like
//!     `1/e` and stalls the optimizer for inflections in the hundreds of dose units.
//! 2.  `L4` (fallback): the same sigmoid expressed on `log10(dose)`. Non-positive doses
//!     cannot be log-transformed and are dropped for this family.
//!
//! `L4` runs when `LL4` fails, and also when a converged `LL4` fit still leaves a
//! residual. In that case the family with the clearly smaller residual on the
//! positive doses wins.
//!
//! The optimizer is BFGS with a Wolfe line search, driven with analytic gradients of the
//! mean squared residual. Responses are divided by their largest magnitude before
//! fitting so the convergence tolerance means the same thing for every curve.

use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::types::{DoseResponseCurve, FittedModel, ModelFamily, decay, zero_dose_limit};
use ndarray::{Array1, array};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Added to the response at the highest dose when the whole curve is flat.
pub const ZERO_VARIANCE_EPSILON: f64 = 1e-10;

/// Cost returned for parameter vectors outside the model's domain, so the line
/// search backs off instead of diverging.
const INFEASIBLE_COST: f64 = 1e10;

/// Minimum number of distinct doses for a fit to be attempted.
pub const MIN_FIT_POINTS: usize = 2;

/// Mean squared residual, relative to the squared response scale, below which a fit
/// is taken as exact and no other family is tried.
const EXACT_FIT_RESIDUAL: f64 = 1e-12;

/// A converged `LL4` fit is replaced only when `L4` cuts its residual below this share.
const FALLBACK_IMPROVEMENT: f64 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("At least {required} distinct doses are needed to fit a {family} curve, found {found}.")]
    TooFewPoints {
        family: ModelFamily,
        found: usize,
        required: usize,
    },

    #[error("The {family} fit produced non-finite parameters.")]
    NonFinite { family: ModelFamily },

    #[error("The {family} fit placed the inflection at a non-positive dose ({e:.6e}).")]
    NonPositiveInflection { family: ModelFamily, e: f64 },

    #[error("The {family} optimization failed to converge: {reason}")]
    OptimizerFailed { family: ModelFamily, reason: String },
}

/// Bounds on the inner optimizer. Fits either converge within `max_iterations` or fail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Gradient-norm tolerance on the scaled objective.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-7,
        }
    }
}

/// Fits a curve, trying `LL4` first and falling back to `L4` when it fails.
///
/// A curve whose responses are all identical gets its highest-dose response nudged by
/// `ZERO_VARIANCE_EPSILON` before fitting. The error returned when both families fail
/// is the fallback's error.
pub fn fit_curve(curve: &DoseResponseCurve, options: &FitOptions) -> Result<FittedModel, FitError> {
    let perturbed;
    let curve = if curve.has_constant_response() && !curve.is_empty() {
        let last = curve.points()[curve.len() - 1].response;
        perturbed = curve.with_last_response(last + ZERO_VARIANCE_EPSILON);
        &perturbed
    } else {
        curve
    };

    select_family(curve, options, fit_family(curve, ModelFamily::LL4, options))
}

/// Decides between the primary `LL4` outcome and an `L4` fit of the same curve.
fn select_family(
    curve: &DoseResponseCurve,
    options: &FitOptions,
    primary: Result<FittedModel, FitError>,
) -> Result<FittedModel, FitError> {
    match primary {
        Ok(ll4) => {
            let ll4_residual = positive_dose_residual(&ll4, curve);
            if ll4_residual <= EXACT_FIT_RESIDUAL * response_scale(curve).powi(2) {
                return Ok(ll4);
            }
            match fit_family(curve, ModelFamily::L4, options) {
                Ok(l4) if positive_dose_residual(&l4, curve) < FALLBACK_IMPROVEMENT * ll4_residual => {
                    log::debug!(
                        "LL4 fit left a residual of {ll4_residual:.4e}, the log10-dose fit is kept instead."
                    );
                    Ok(l4)
                }
                _ => Ok(ll4),
            }
        }
        Err(primary) => {
            log::debug!("{primary} Falling back to the log10-dose parameterization.");
            fit_family(curve, ModelFamily::L4, options).inspect_err(|fallback| {
                log::warn!("Both curve families failed. LL4: {primary} L4: {fallback}");
            })
        }
    }
}

/// Mean squared residual over the positive doses, the points both families see.
fn positive_dose_residual(model: &FittedModel, curve: &DoseResponseCurve) -> f64 {
    let (sum, n) = curve
        .points()
        .iter()
        .filter(|p| p.dose > 0.0)
        .fold((0.0, 0usize), |(sum, n), p| {
            (sum + (model.evaluate(p.dose) - p.response).powi(2), n + 1)
        });
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn response_scale(curve: &DoseResponseCurve) -> f64 {
    curve
        .points()
        .iter()
        .fold(0.0_f64, |acc, p| acc.max(p.response.abs()))
        .max(1.0)
}

/// Fits a single model family without any fallback.
pub fn fit_family(
    curve: &DoseResponseCurve,
    family: ModelFamily,
    options: &FitOptions,
) -> Result<FittedModel, FitError> {
    let problem = FitProblem::new(curve, family)?;
    let initial = problem.initial_parameters();

    let cost_and_grad = |params: &Array1<f64>| -> (f64, Array1<f64>) { problem.cost_and_gradient(params) };

    let BfgsSolution {
        final_point,
        iterations,
        ..
    } = Bfgs::new(initial, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run()
        .map_err(|e| FitError::OptimizerFailed {
            family,
            reason: format!("{e:?}"),
        })?;

    if final_point.iter().any(|v| !v.is_finite())
        || problem.cost_and_gradient(&final_point).0 >= INFEASIBLE_COST
    {
        return Err(FitError::NonFinite { family });
    }

    let model = FittedModel {
        family,
        b: final_point[0],
        c: final_point[1] * problem.scale,
        d: final_point[2] * problem.scale,
        e: match family {
            ModelFamily::LL4 => final_point[3].exp(),
            ModelFamily::L4 => final_point[3],
        },
    };
    if !model.e.is_finite() {
        return Err(FitError::NonFinite { family });
    }
    if family == ModelFamily::LL4 && model.e <= 0.0 {
        return Err(FitError::NonPositiveInflection { family, e: model.e });
    }

    log::debug!(
        "{family} fit converged in {iterations} iterations: b={:.4}, c={:.4}, d={:.4}, e={:.4e}",
        model.b,
        model.c,
        model.d,
        model.e
    );
    Ok(model)
}

/// The least-squares objective for one family over one curve.
struct FitProblem {
    family: ModelFamily,
    /// Raw doses for `LL4`, `log10` doses for `L4`.
    predictors: Vec<f64>,
    /// Responses divided by `scale`.
    responses: Vec<f64>,
    scale: f64,
}

impl FitProblem {
    fn new(curve: &DoseResponseCurve, family: ModelFamily) -> Result<Self, FitError> {
        let points: Vec<(f64, f64)> = match family {
            ModelFamily::LL4 => curve
                .points()
                .iter()
                .filter(|p| p.dose >= 0.0)
                .map(|p| (p.dose, p.response))
                .collect(),
            ModelFamily::L4 => curve
                .points()
                .iter()
                .filter(|p| p.dose > 0.0)
                .map(|p| (p.dose.log10(), p.response))
                .collect(),
        };

        if points.len() < MIN_FIT_POINTS {
            return Err(FitError::TooFewPoints {
                family,
                found: points.len(),
                required: MIN_FIT_POINTS,
            });
        }

        let scale = response_scale(curve);

        Ok(Self {
            family,
            predictors: points.iter().map(|&(x, _)| x).collect(),
            responses: points.iter().map(|&(_, y)| y / scale).collect(),
            scale,
        })
    }

    /// The predictor on the scale where the sigmoid is symmetric (`ln` dose or `log10` dose).
    fn linear_predictor(&self, x: f64) -> f64 {
        match self.family {
            ModelFamily::LL4 => x.ln(),
            ModelFamily::L4 => x,
        }
    }

    /// Self-starting values: asymptotes from the padded response range, slope and
    /// inflection from regressing the logit-transformed response on the predictor.
    fn initial_parameters(&self) -> Array1<f64> {
        let lo = self.responses.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = self.responses.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let pad = 0.05 * (hi - lo) + 1e-8;
        let c0 = lo - pad;
        let d0 = hi + pad;

        let pairs: Vec<(f64, f64)> = self
            .predictors
            .iter()
            .zip(&self.responses)
            .map(|(&x, &y)| (self.linear_predictor(x), ((d0 - y) / (y - c0)).ln()))
            .filter(|(t, z)| t.is_finite() && z.is_finite())
            .collect();

        let mid = if pairs.is_empty() {
            0.0
        } else {
            pairs.iter().map(|(t, _)| t).sum::<f64>() / pairs.len() as f64
        };

        let (mut b0, mut m0) = (-1.0, mid);
        if pairs.len() >= 2 {
            let z_mean = pairs.iter().map(|(_, z)| z).sum::<f64>() / pairs.len() as f64;
            let sxx: f64 = pairs.iter().map(|(t, _)| (t - mid).powi(2)).sum();
            let sxz: f64 = pairs.iter().map(|(t, z)| (t - mid) * (z - z_mean)).sum();
            if sxx > 0.0 {
                let slope = sxz / sxx;
                let intercept = z_mean - slope * mid;
                let inflection = -intercept / slope;
                let t_min = pairs.iter().map(|(t, _)| *t).fold(f64::INFINITY, f64::min);
                let t_max = pairs.iter().map(|(t, _)| *t).fold(f64::NEG_INFINITY, f64::max);
                let margin = (t_max - t_min) + 1.0;
                let plausible = inflection >= t_min - margin && inflection <= t_max + margin;
                if slope.is_finite() && slope.abs() > 1e-8 && plausible {
                    b0 = slope;
                    m0 = inflection;
                }
            }
        }

        array![b0, c0, d0, m0]
    }

    /// Half the mean squared residual, and its gradient in `(b, c, d, e)`.
    fn cost_and_gradient(&self, params: &Array1<f64>) -> (f64, Array1<f64>) {
        let (b, c, d, e) = (params[0], params[1], params[2], params[3]);
        let infeasible = (INFEASIBLE_COST, Array1::zeros(4));
        if params.iter().any(|v| !v.is_finite()) {
            return infeasible;
        }

        let n = self.responses.len() as f64;
        let mut cost = 0.0;
        let mut grad = Array1::<f64>::zeros(4);
        for (&x, &y) in self.predictors.iter().zip(&self.responses) {
            let (value, partials) = self.evaluate_with_partials(b, c, d, e, x);
            let residual = value - y;
            cost += residual * residual;
            for k in 0..4 {
                grad[k] += residual * partials[k];
            }
        }
        cost *= 0.5 / n;
        grad.mapv_inplace(|g| g / n);

        if !cost.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return infeasible;
        }
        (cost, grad)
    }

    fn evaluate_with_partials(&self, b: f64, c: f64, d: f64, e: f64, x: f64) -> (f64, [f64; 4]) {
        if self.family == ModelFamily::LL4 && x <= 0.0 {
            let s = zero_dose_limit(b);
            return (c + (d - c) * s, [0.0, 1.0 - s, s, 0.0]);
        }

        // u = b * (t(x) - e), with e on the predictor scale
        let offset = self.linear_predictor(x) - e;
        let s = decay(b * offset);
        let slope = -(d - c) * s * (1.0 - s);
        (c + (d - c) * s, [slope * offset, 1.0 - s, s, -slope * b])
    }
}
