//! Response prediction at doses that were not measured directly.

use crate::fit::{FitError, FitOptions, fit_curve};
use crate::types::{DoseResponseCurve, ModelFamily};

/// Fitted predictions are capped here; a model cannot inhibit more than completely.
pub const MAX_PREDICTED_RESPONSE: f64 = 100.0;

/// Predicts the response of `table` at `dose`.
///
/// - One point: that point's response.
/// - Two points: treated as a line segment, the second point's response is returned.
/// - Constant responses: the first response, no fit.
/// - Otherwise a curve is fitted and evaluated at `dose`, capped at
///   [`MAX_PREDICTED_RESPONSE`]. If no curve family can be fitted, the response
///   measured at the nearest dose is used.
///
/// Measured responses are returned as they are, even above 100.
pub fn predict_response(
    table: &DoseResponseCurve,
    dose: f64,
    options: &FitOptions,
) -> Result<f64, FitError> {
    let points = table.points();
    let predicted = match points.len() {
        0 => {
            return Err(FitError::TooFewPoints {
                family: ModelFamily::LL4,
                found: 0,
                required: 1,
            });
        }
        1 => points[0].response,
        2 => points[1].response,
        _ if table.has_constant_response() => points[0].response,
        _ => match fit_curve(table, options) {
            Ok(model) => model.evaluate(dose).min(MAX_PREDICTED_RESPONSE),
            Err(e) => {
                log::warn!("Predicting from the nearest measured dose: {e}");
                nearest_response(table, dose)
            }
        },
    };
    Ok(predicted)
}

fn nearest_response(table: &DoseResponseCurve, dose: f64) -> f64 {
    table
        .points()
        .iter()
        .min_by(|a, b| (a.dose - dose).abs().total_cmp(&(b.dose - dose).abs()))
        .map_or(f64::NAN, |p| p.response)
}
