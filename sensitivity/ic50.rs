//! Relative IC50 extraction from fitted curves.

use crate::fit::{FitOptions, fit_curve};
use crate::types::{DoseResponseCurve, FittedModel, ModelFamily};

/// The dose at half the modeled effect range, capped at `max_dose`.
///
/// The system never reports an IC50 outside the tested dose range.
pub fn relative_ic50(model: &FittedModel, max_dose: f64) -> f64 {
    let ic50 = match model.family {
        ModelFamily::LL4 => model.e,
        ModelFamily::L4 => 10f64.powf(model.e),
    };
    if ic50.is_nan() || ic50 > max_dose {
        max_dose
    } else {
        ic50
    }
}

/// Fits a single-drug curve (zero-dose anchor included) and extracts its IC50.
///
/// Curves that cannot be fitted report their maximum tested dose. An empty curve has
/// no IC50.
pub fn curve_ic50(curve: &DoseResponseCurve, options: &FitOptions) -> Option<f64> {
    let max_dose = curve.max_dose()?;
    match fit_curve(curve, options) {
        Ok(model) => Some(relative_ic50(&model, max_dose)),
        Err(e) => {
            log::warn!("IC50 set to the maximum tested dose ({max_dose}): {e}");
            Some(max_dose)
        }
    }
}
