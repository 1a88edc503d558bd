//! # Combination Sensitivity Score (CSS)
//!
//! For every directed pair (varied drug A, fixed drug B) of a block, the dose matrix is
//! restricted to rows where all other drugs are absent. Each concentration of A then
//! yields a small curve along B, from which the response at `IC50(B)` is read off
//! (directly for two-point curves, otherwise through a fitted curve). The resulting
//! synthetic curve along A is scored with the RI procedure. The block CSS is the mean
//! over all `2 * C(n, 2)` directed pairs.

use crate::data::Block;
use crate::fit::{FitError, FitOptions};
use crate::predict::predict_response;
use crate::score::calculate_ri;
use crate::types::{DoseResponseCurve, DoseResponsePoint, DrugPair, directed_pairs};
use itertools::Itertools;
use ndarray::Axis;

/// CSS of every directed pair of a block, plus their mean.
#[derive(Debug, Clone, PartialEq)]
pub struct CssScores {
    pub pairs: Vec<(DrugPair, f64)>,
    pub css: f64,
}

/// One row of the restricted matrix: `(dose of the varied drug, dose of the fixed drug, response)`.
type PairRow = (f64, f64, f64);

/// Rows where every drug other than the pair's two is at dose 0.
fn pair_rows(block: &Block, pair: DrugPair) -> Vec<PairRow> {
    block
        .concs()
        .axis_iter(Axis(0))
        .zip(block.responses().iter())
        .filter(|(row, _)| {
            row.iter()
                .enumerate()
                .all(|(j, &dose)| j == pair.varied || j == pair.fixed || dose == 0.0)
        })
        .map(|(row, &response)| (row[pair.varied], row[pair.fixed], response))
        .collect()
}

/// CSS of `pair`: the RI of the varied drug's curve with the fixed drug held at `fixed_ic50`.
pub fn pair_css(
    block: &Block,
    pair: DrugPair,
    fixed_ic50: f64,
    options: &FitOptions,
) -> Result<f64, FitError> {
    let mut rows = pair_rows(block, pair);
    rows.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut synthetic = Vec::new();
    for (varied_dose, group) in &rows.into_iter().chunk_by(|row| row.0.to_bits()) {
        let along_fixed = DoseResponseCurve::from_points(group.map(|(_, dose, response)| {
            DoseResponsePoint { dose, response }
        }));
        let response = predict_response(&along_fixed, fixed_ic50, options)?;
        synthetic.push(DoseResponsePoint {
            dose: f64::from_bits(varied_dose),
            response,
        });
    }

    calculate_ri(&DoseResponseCurve::from_points(synthetic), options)
}

/// Scores every directed pair of the block. `ic50` holds one value per drug.
pub fn calculate_css(block: &Block, ic50: &[f64], options: &FitOptions) -> Result<CssScores, FitError> {
    debug_assert_eq!(ic50.len(), block.num_drugs());

    let pairs = directed_pairs(block.num_drugs())
        .into_iter()
        .map(|pair| Ok((pair, pair_css(block, pair, ic50[pair.fixed], options)?)))
        .collect::<Result<Vec<_>, FitError>>()?;

    let css = pairs.iter().map(|(_, v)| v).sum::<f64>() / pairs.len() as f64;
    Ok(CssScores { pairs, css })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    /// A full 4x4 two-drug matrix with an additive-ish response surface.
    fn matrix_block() -> Block {
        let doses = [0.0, 1.0, 3.0, 10.0];
        let mut concs = Vec::new();
        let mut responses = Vec::new();
        for &a in &doses {
            for &b in &doses {
                concs.extend_from_slice(&[a, b]);
                let ea = 80.0 * a / (a + 3.0);
                let eb = 60.0 * b / (b + 2.0);
                responses.push(ea + eb - ea * eb / 100.0);
            }
        }
        Block::new(
            "m",
            Array2::from_shape_vec((16, 2), concs).unwrap(),
            Array1::from_vec(responses),
        )
        .unwrap()
    }

    #[test]
    fn two_drug_block_yields_exactly_two_pair_scores() {
        let block = matrix_block();
        let scores = calculate_css(&block, &[3.0, 2.0], &FitOptions::default()).unwrap();
        assert_eq!(scores.pairs.len(), 2);
        assert_eq!(scores.pairs[0].0, DrugPair { varied: 0, fixed: 1 });
        assert_eq!(scores.pairs[1].0, DrugPair { varied: 1, fixed: 0 });
        let mean = (scores.pairs[0].1 + scores.pairs[1].1) / 2.0;
        assert!((scores.css - mean).abs() < 1e-12);
    }

    #[test]
    fn holding_a_partner_raises_the_score_above_the_single_agent() {
        let block = matrix_block();
        let options = FitOptions::default();
        let single = calculate_ri(&block.single_drug_curve(0), &options).unwrap();
        let combined = pair_css(&block, DrugPair { varied: 0, fixed: 1 }, 2.0, &options).unwrap();
        assert!(combined > single);
    }

    #[test]
    fn rows_with_a_third_drug_are_excluded_from_the_pair() {
        let block = Block::new(
            "t",
            Array2::from_shape_vec(
                (4, 3),
                vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 5.0],
            )
            .unwrap(),
            Array1::from_vec(vec![0.0, 10.0, 30.0, 99.0]),
        )
        .unwrap();
        let rows = pair_rows(&block, DrugPair { varied: 0, fixed: 1 });
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|&(_, _, r)| r < 99.0));
    }
}
