//! # Sensitivity Orchestration
//!
//! Drives every block through baseline correction, per-drug IC50/RI and pairwise CSS.
//! Replicated blocks repeat this on `iteration` bootstrap resamples and are summarized
//! by the bootstrap engine instead of being scored once.
//!
//! Blocks are independent, as are the iterations of one block, so both levels run on
//! the rayon pool. Each task owns its resample and its random stream; nothing shared
//! is mutated. Output order always follows input order.

use crate::baseline::correct_baseline;
use crate::bootstrap::{aggregate, iteration_rng, resample_block};
use crate::config::SensitivityConfig;
use crate::css::calculate_css;
use crate::data::Block;
use crate::fit::{FitError, FitOptions};
use crate::ic50::curve_ic50;
use crate::score::calculate_ri;
use crate::types::{SensitivityResult, SensitivityStatistics};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A block could not be scored. Other blocks are unaffected.
    #[error("Computation fault in block '{block_id}': {reason}")]
    BlockComputation { block_id: String, reason: String },
}

/// The scored output of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    pub block_id: String,
    /// Scores of the block, or the mean over bootstrap iterations when replicated.
    pub result: SensitivityResult,
    /// Present only for replicated blocks.
    pub statistics: Option<SensitivityStatistics>,
}

/// Outcomes of every block that could be scored, and the faults of those that could not.
#[derive(Debug, Clone, Default)]
pub struct SensitivityReport {
    pub outcomes: Vec<BlockOutcome>,
    pub faults: Vec<PipelineError>,
}

impl SensitivityReport {
    pub fn has_statistics(&self) -> bool {
        self.outcomes.iter().any(|o| o.statistics.is_some())
    }
}

fn fault(block: &Block, reason: impl ToString) -> PipelineError {
    PipelineError::BlockComputation {
        block_id: block.block_id.clone(),
        reason: reason.to_string(),
    }
}

/// Scores one (already corrected) response matrix: IC50 and RI per drug, then CSS.
pub fn score_matrix(block: &Block, options: &FitOptions) -> Result<SensitivityResult, PipelineError> {
    let curves = block.single_drug_curves();

    let ic50 = curves
        .iter()
        .enumerate()
        .map(|(drug, curve)| {
            curve_ic50(curve, options).ok_or_else(|| {
                fault(block, format!("drug {} has no single-drug measurements", drug + 1))
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let ri = curves
        .iter()
        .map(|curve| calculate_ri(curve, options))
        .collect::<Result<Vec<f64>, FitError>>()
        .map_err(|e| fault(block, e))?;

    let css = calculate_css(block, &ic50, options).map_err(|e| fault(block, e))?;

    Ok(SensitivityResult {
        ic50,
        ri,
        css_pairs: css.pairs,
        css: css.css,
    })
}

/// Runs the full per-block state machine.
pub fn score_block(block: &Block, config: &SensitivityConfig) -> Result<BlockOutcome, PipelineError> {
    if !block.is_replicated() {
        log::info!("Block '{}': scoring {} rows.", block.block_id, block.num_rows());
        let corrected = correct_baseline(block, config.correct_baseline, &config.fit);
        return Ok(BlockOutcome {
            block_id: block.block_id.clone(),
            result: score_matrix(&corrected, &config.fit)?,
            statistics: None,
        });
    }

    log::info!(
        "Block '{}': replicated, running {} bootstrap iterations.",
        block.block_id,
        config.iteration
    );
    let groups = block.replicate_groups();
    let seed = config.effective_seed();

    let results = (0..config.iteration)
        .into_par_iter()
        .map(|iteration| {
            let mut rng = iteration_rng(seed, &block.block_id, iteration);
            let resampled = resample_block(block, &groups, &mut rng);
            let corrected = correct_baseline(&resampled, config.correct_baseline, &config.fit);
            score_matrix(&corrected, &config.fit)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (result, statistics) =
        aggregate(&results).ok_or_else(|| fault(block, "no bootstrap iterations were run"))?;
    Ok(BlockOutcome {
        block_id: block.block_id.clone(),
        result,
        statistics: Some(statistics),
    })
}

/// Scores every block. Faulty blocks are logged and reported, never fatal.
pub fn calculate_sensitivity(blocks: &[Block], config: &SensitivityConfig) -> SensitivityReport {
    log::info!(
        "Scoring {} blocks (baseline correction: {:?}, seed: {}).",
        blocks.len(),
        config.correct_baseline,
        config.effective_seed()
    );

    let scored: Vec<Result<BlockOutcome, PipelineError>> = blocks
        .par_iter()
        .map(|block| score_block(block, config))
        .collect();

    let mut report = SensitivityReport::default();
    for outcome in scored {
        match outcome {
            Ok(o) => report.outcomes.push(o),
            Err(e) => {
                log::warn!("{e}");
                report.faults.push(e);
            }
        }
    }
    log::info!(
        "Scored {} blocks, {} computation faults.",
        report.outcomes.len(),
        report.faults.len()
    );
    report
}
