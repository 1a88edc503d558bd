//! Baseline correction of block responses.
//!
//! The baseline is the lowest value any fitted single-drug curve reaches at its tested
//! doses. Subtracting a dose-weighted share of it removes the drift that makes
//! untreated wells read as slightly inhibited (or slightly stimulated).

use crate::data::Block;
use crate::fit::{FitOptions, fit_curve};
use serde::{Deserialize, Serialize};

/// Which responses the baseline correction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectBaseline {
    /// Leave responses untouched.
    #[default]
    Non,
    /// Adjust only negative responses.
    Part,
    /// Adjust every response.
    All,
}

/// Minimum fitted value across all single-drug curves of the block.
///
/// Drugs whose curve cannot be fitted are skipped. Returns `None` when no curve fits.
pub fn fitted_baseline(block: &Block, options: &FitOptions) -> Option<f64> {
    block
        .single_drug_curves()
        .iter()
        .filter_map(|curve| {
            let model = fit_curve(curve, options).ok()?;
            curve
                .doses()
                .into_iter()
                .map(|dose| model.evaluate(dose))
                .filter(|v| v.is_finite())
                .reduce(f64::min)
        })
        .reduce(f64::min)
}

/// `r - (100 - r) / 100 * baseline`.
#[inline]
pub fn adjust_response(response: f64, baseline: f64) -> f64 {
    response - (100.0 - response) / 100.0 * baseline
}

/// Applies the requested correction, returning a block with adjusted responses.
pub fn correct_baseline(block: &Block, method: CorrectBaseline, options: &FitOptions) -> Block {
    if method == CorrectBaseline::Non {
        return block.clone();
    }
    let Some(baseline) = fitted_baseline(block, options) else {
        log::warn!(
            "Block '{}': no single-drug curve could be fitted, baseline correction skipped.",
            block.block_id
        );
        return block.clone();
    };
    log::debug!("Block '{}': baseline {baseline:.4}", block.block_id);

    let corrected = block.responses().mapv(|r| match method {
        CorrectBaseline::All => adjust_response(r, baseline),
        CorrectBaseline::Part if r < 0.0 => adjust_response(r, baseline),
        _ => r,
    });
    block.with_responses(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn block() -> Block {
        Block::new(
            "b",
            array![
                [0.0, 0.0],
                [1.0, 0.0],
                [3.0, 0.0],
                [10.0, 0.0],
                [0.0, 1.0],
                [0.0, 3.0],
                [0.0, 10.0],
                [10.0, 10.0]
            ],
            array![-4.0, 10.0, 35.0, 70.0, 5.0, 25.0, 60.0, 90.0],
        )
        .unwrap()
    }

    #[test]
    fn adjustment_formula() {
        assert_eq!(adjust_response(50.0, 10.0), 45.0);
        assert_eq!(adjust_response(100.0, 10.0), 100.0);
        assert_eq!(adjust_response(-10.0, -5.0), -4.5);
    }

    #[test]
    fn non_leaves_block_untouched() {
        let b = block();
        assert_eq!(correct_baseline(&b, CorrectBaseline::Non, &FitOptions::default()), b);
    }

    #[test]
    fn part_only_touches_negative_responses() {
        let b = block();
        let corrected = correct_baseline(&b, CorrectBaseline::Part, &FitOptions::default());
        for (orig, new) in b.responses().iter().zip(corrected.responses().iter()) {
            if *orig >= 0.0 {
                assert_eq!(orig, new);
            }
        }
    }

    #[test]
    fn all_moves_every_response_toward_the_baseline() {
        let b = block();
        let options = FitOptions::default();
        let baseline = fitted_baseline(&b, &options).expect("curves should fit");
        let corrected = correct_baseline(&b, CorrectBaseline::All, &options);
        for (orig, new) in b.responses().iter().zip(corrected.responses().iter()) {
            assert!((new - adjust_response(*orig, baseline)).abs() < 1e-12);
        }
    }
}
