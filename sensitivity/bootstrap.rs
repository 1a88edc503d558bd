//! # Bootstrap Resampling and Summary Statistics
//!
//! Replicated blocks are scored once per bootstrap iteration on a resample of their
//! rows, and each scalar output is then summarized across iterations.
//!
//! Every iteration owns a `ChaCha8Rng` seeded from `(seed, block_id, iteration)`. The
//! stream of draws therefore does not depend on scheduling, so iterations (and blocks)
//! may run in parallel and still reproduce bit-identical statistics.
//!
//! The p-value is `exp(-0.717 z - 0.416 z^2)` with `z = |mean| / sd`. This is a
//! normal-tail approximation kept for output compatibility; it is not an exact test
//! and should not be read as one.

use crate::data::Block;
use crate::types::{FieldStatistics, PValue, ScoreField, SensitivityResult, SensitivityStatistics};
use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seed used when the configuration leaves it unset.
pub const DEFAULT_SEED: u64 = 1;

/// SplitMix64 finalizer, used to decorrelate derived seeds.
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// FNV-1a over the block id bytes. Stable across platforms and releases.
fn block_hash(block_id: &str) -> u64 {
    block_id
        .bytes()
        .fold(0xCBF2_9CE4_8422_2325_u64, |h, byte| {
            (h ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01B3)
        })
}

/// The seed of one iteration's random stream.
pub fn iteration_seed(seed: u64, block_id: &str, iteration: usize) -> u64 {
    mix64(mix64(seed ^ mix64(block_hash(block_id))) ^ iteration as u64)
}

/// A fresh, independent random stream for one bootstrap iteration.
pub fn iteration_rng(seed: u64, block_id: &str, iteration: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(iteration_seed(seed, block_id, iteration))
}

/// Resamples the block's responses with replacement within each replicate group.
///
/// Every group keeps its size; the dose matrix is unchanged.
pub fn resample_block<R: Rng>(block: &Block, groups: &[Vec<usize>], rng: &mut R) -> Block {
    let source = block.responses();
    let mut resampled = Array1::<f64>::zeros(source.len());
    for group in groups {
        for &row in group {
            let pick = group[rng.gen_range(0..group.len())];
            resampled[row] = source[pick];
        }
    }
    block.with_responses(resampled)
}

/// Linear interpolation between order statistics (R's default quantile type 7).
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q;
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Approximate two-sided p-value of a mean against zero.
pub fn approximate_p_value(mean: f64, sd: f64) -> f64 {
    let z = if sd > 0.0 {
        mean.abs() / sd
    } else if mean != 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    (-0.717 * z - 0.416 * z * z).exp()
}

/// Mean, sample SD, SEM, empirical 95% interval and approximate p-value of `values`.
pub fn summarize(values: &[f64]) -> FieldStatistics {
    let n = values.len();
    if n == 0 {
        return FieldStatistics {
            mean: f64::NAN,
            sd: f64::NAN,
            sem: f64::NAN,
            ci_left: f64::NAN,
            ci_right: f64::NAN,
            p_value: PValue(f64::NAN),
        };
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let sd = if n > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    let sem = sd / (n as f64).sqrt();

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    FieldStatistics {
        mean,
        sd,
        sem,
        ci_left: percentile(&sorted, 0.025),
        ci_right: percentile(&sorted, 0.975),
        p_value: PValue(approximate_p_value(mean, sd)),
    }
}

/// Aggregates per-iteration results into the block's mean result and its statistics.
///
/// Fields are matched by `ScoreField`, so every iteration must describe the same drugs.
/// Returns `None` when `results` is empty.
pub fn aggregate(results: &[SensitivityResult]) -> Option<(SensitivityResult, SensitivityStatistics)> {
    let first = results.first()?;

    let fields: Vec<_> = first
        .fields()
        .into_iter()
        .map(|(field, _)| {
            let values: Vec<f64> = results
                .iter()
                .map(|r| r.value(field).unwrap_or(f64::NAN))
                .collect();
            (field, summarize(&values))
        })
        .collect();

    let mean_of = |field: ScoreField| -> f64 {
        fields
            .iter()
            .find(|(f, _)| *f == field)
            .map_or(f64::NAN, |(_, s)| s.mean)
    };
    let mean_result = SensitivityResult {
        ic50: (0..first.num_drugs())
            .map(|i| mean_of(ScoreField::Ic50(i)))
            .collect(),
        ri: (0..first.num_drugs())
            .map(|i| mean_of(ScoreField::Ri(i)))
            .collect(),
        css_pairs: first
            .css_pairs
            .iter()
            .map(|&(pair, _)| (pair, mean_of(ScoreField::Css(pair))))
            .collect(),
        css: mean_of(ScoreField::CssOverall),
    };

    Some((
        mean_result,
        SensitivityStatistics {
            iterations: results.len(),
            fields,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DrugPair;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn result(scale: f64) -> SensitivityResult {
        SensitivityResult {
            ic50: vec![1.0 * scale, 2.0 * scale],
            ri: vec![10.0 * scale, 20.0 * scale],
            css_pairs: vec![
                (DrugPair { varied: 0, fixed: 1 }, 30.0 * scale),
                (DrugPair { varied: 1, fixed: 0 }, 50.0 * scale),
            ],
            css: 40.0 * scale,
        }
    }

    #[test]
    fn summary_of_known_values() {
        let stats = summarize(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_abs_diff_eq!(stats.mean, 3.0);
        assert_abs_diff_eq!(stats.sd, 2.5_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(stats.sem, 2.5_f64.sqrt() / 5.0_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(stats.ci_left, 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.ci_right, 4.9, epsilon = 1e-12);
        let z = 3.0 / 2.5_f64.sqrt();
        assert_abs_diff_eq!(stats.p_value.0, (-0.717 * z - 0.416 * z * z).exp(), epsilon = 1e-15);
    }

    #[test]
    fn single_iteration_collapses_the_interval() {
        let stats = summarize(&[7.5]);
        assert_eq!(stats.mean, 7.5);
        assert_eq!(stats.sd, 0.0);
        assert_eq!(stats.sem, 0.0);
        assert_eq!(stats.ci_left, 7.5);
        assert_eq!(stats.ci_right, 7.5);
        assert_eq!(stats.p_value.0, 0.0);
    }

    #[test]
    fn p_value_edge_cases() {
        assert_eq!(approximate_p_value(0.0, 0.0), 1.0);
        assert_eq!(approximate_p_value(0.0, 3.0), 1.0);
        assert_eq!(approximate_p_value(2.0, 0.0), 0.0);
        assert!(approximate_p_value(1.0, 1.0) < 1.0);
    }

    #[test]
    fn aggregation_matches_fields_by_identifier() {
        let (mean, stats) = aggregate(&[result(1.0), result(3.0)]).unwrap();
        assert_eq!(mean.ic50, vec![2.0, 4.0]);
        assert_eq!(mean.css, 80.0);
        assert_eq!(mean.css_pairs[1], (DrugPair { varied: 1, fixed: 0 }, 100.0));
        assert_eq!(stats.iterations, 2);
        let css = stats.get(ScoreField::CssOverall).unwrap();
        assert_abs_diff_eq!(css.sd, (2.0_f64 * 40.0 * 40.0).sqrt(), epsilon = 1e-9);
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn iteration_seeds_are_distinct_and_stable() {
        let a = iteration_seed(42, "block-1", 0);
        assert_eq!(a, iteration_seed(42, "block-1", 0));
        assert_ne!(a, iteration_seed(42, "block-1", 1));
        assert_ne!(a, iteration_seed(42, "block-2", 0));
        assert_ne!(a, iteration_seed(43, "block-1", 0));
    }

    #[test]
    fn resampling_stays_within_replicate_groups() {
        let block = Block::new(
            "r",
            array![[0.0, 0.0], [0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            array![1.0, 2.0, 50.0, 60.0, 33.0],
        )
        .unwrap();
        let groups = block.replicate_groups();
        let mut rng = iteration_rng(7, &block.block_id, 0);
        for _ in 0..20 {
            let sample = resample_block(&block, &groups, &mut rng);
            let r = sample.responses();
            assert!([1.0, 2.0].contains(&r[0]) && [1.0, 2.0].contains(&r[1]));
            assert!([50.0, 60.0].contains(&r[2]) && [50.0, 60.0].contains(&r[3]));
            assert_eq!(r[4], 33.0);
        }
    }
}
