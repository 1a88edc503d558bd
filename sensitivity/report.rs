//! Tab-separated output tables keyed by `block_id`.
//!
//! Columns follow `ScoreField::layout` for the widest block in the run. Blocks with
//! fewer drugs write `NA` in the columns they do not have.

use crate::data::BLOCK_ID_COLUMN;
use crate::pipeline::BlockOutcome;
use crate::types::{FieldStatistics, ScoreField};
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const SENSITIVITY_TABLE: &str = "sensitivity.tsv";
pub const STATISTICS_TABLE: &str = "sensitivity_statistics.tsv";

const MISSING: &str = "NA";
const STATISTIC_SUFFIXES: [&str; 6] = ["mean", "sd", "sem", "ci_left", "ci_right", "p_value"];

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error while writing '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write table row: {0}")]
    Csv(#[from] csv::Error),
}

fn number(value: f64) -> String {
    if value.is_nan() {
        MISSING.to_string()
    } else {
        format!("{value:.6}")
    }
}

fn tsv_writer<W: io::Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(out)
}

fn widest(outcomes: &[BlockOutcome]) -> usize {
    outcomes.iter().map(|o| o.result.num_drugs()).max().unwrap_or(0)
}

/// Writes one row per block with its IC50, RI and CSS columns.
pub fn write_sensitivity<W: io::Write>(out: W, outcomes: &[BlockOutcome]) -> Result<(), ReportError> {
    let layout = ScoreField::layout(widest(outcomes));
    let mut wtr = tsv_writer(out);

    let mut header = vec![BLOCK_ID_COLUMN.to_string()];
    header.extend(layout.iter().map(ScoreField::to_string));
    wtr.write_record(&header)?;

    for outcome in outcomes {
        let mut record = vec![outcome.block_id.clone()];
        record.extend(layout.iter().map(|&field| {
            outcome
                .result
                .value(field)
                .map_or_else(|| MISSING.to_string(), number)
        }));
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes one row per replicated block with the bootstrap summary of every field.
pub fn write_statistics<W: io::Write>(out: W, outcomes: &[BlockOutcome]) -> Result<(), ReportError> {
    let replicated: Vec<_> = outcomes
        .iter()
        .filter_map(|o| o.statistics.as_ref().map(|s| (&o.block_id, s)))
        .collect();
    let layout = ScoreField::layout(
        outcomes
            .iter()
            .filter(|o| o.statistics.is_some())
            .map(|o| o.result.num_drugs())
            .max()
            .unwrap_or(0),
    );
    let mut wtr = tsv_writer(out);

    let mut header = vec![BLOCK_ID_COLUMN.to_string()];
    for field in &layout {
        header.extend(STATISTIC_SUFFIXES.iter().map(|suffix| format!("{field}_{suffix}")));
    }
    wtr.write_record(&header)?;

    for (block_id, statistics) in replicated {
        let mut record = vec![block_id.clone()];
        for &field in &layout {
            match statistics.get(field) {
                Some(s) => record.extend(statistic_cells(s)),
                None => record.extend(STATISTIC_SUFFIXES.iter().map(|_| MISSING.to_string())),
            }
        }
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

fn statistic_cells(s: &FieldStatistics) -> [String; 6] {
    [
        number(s.mean),
        number(s.sd),
        number(s.sem),
        number(s.ci_left),
        number(s.ci_right),
        s.p_value.to_string(),
    ]
}

fn create(path: &Path) -> Result<File, ReportError> {
    File::create(path).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Writes `sensitivity.tsv`, and `sensitivity_statistics.tsv` when any block was
/// replicated, into `dir`. Returns the paths written.
pub fn write_tables(dir: &Path, outcomes: &[BlockOutcome]) -> Result<Vec<String>, ReportError> {
    std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut written = Vec::new();
    let sensitivity_path = dir.join(SENSITIVITY_TABLE);
    write_sensitivity(create(&sensitivity_path)?, outcomes)?;
    written.push(sensitivity_path.display().to_string());

    if outcomes.iter().any(|o| o.statistics.is_some()) {
        let statistics_path = dir.join(STATISTICS_TABLE);
        write_statistics(create(&statistics_path)?, outcomes)?;
        written.push(statistics_path.display().to_string());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DrugPair, PValue, SensitivityResult, SensitivityStatistics};

    fn outcome(id: &str, with_statistics: bool) -> BlockOutcome {
        let result = SensitivityResult {
            ic50: vec![1.5, 2.0],
            ri: vec![10.25, f64::NAN],
            css_pairs: vec![
                (DrugPair { varied: 0, fixed: 1 }, 30.0),
                (DrugPair { varied: 1, fixed: 0 }, 40.0),
            ],
            css: 35.0,
        };
        let statistics = with_statistics.then(|| SensitivityStatistics {
            iterations: 3,
            fields: result
                .fields()
                .into_iter()
                .map(|(field, value)| {
                    (
                        field,
                        FieldStatistics {
                            mean: value,
                            sd: 1.0,
                            sem: 0.5,
                            ci_left: value - 1.0,
                            ci_right: value + 1.0,
                            p_value: PValue(1e-12),
                        },
                    )
                })
                .collect(),
        });
        BlockOutcome {
            block_id: id.to_string(),
            result,
            statistics,
        }
    }

    #[test]
    fn sensitivity_table_layout() {
        let mut buf = Vec::new();
        write_sensitivity(&mut buf, &[outcome("b1", false)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "block_id\tic50_1\tic50_2\tri_1\tri_2\tcss1_ic502\tcss2_ic501\tcss"
        );
        assert_eq!(
            lines.next().unwrap(),
            "b1\t1.500000\t2.000000\t10.250000\tNA\t30.000000\t40.000000\t35.000000"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn statistics_table_lists_only_replicated_blocks() {
        let mut buf = Vec::new();
        write_statistics(&mut buf, &[outcome("plain", false), outcome("rep", true)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let header: Vec<&str> = lines[0].split('\t').collect();
        assert_eq!(header.len(), 1 + 6 * ScoreField::layout(2).len());
        assert_eq!(
            header[1..7],
            [
                "ic50_1_mean",
                "ic50_1_sd",
                "ic50_1_sem",
                "ic50_1_ci_left",
                "ic50_1_ci_right",
                "ic50_1_p_value"
            ]
        );
        let row: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(row[0], "rep");
        assert_eq!(row[1], "1.500000");
        assert_eq!(row[6], "< 1e-10");
    }

    #[test]
    fn statistics_table_is_skipped_without_replicates() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_tables(dir.path(), &[outcome("b1", false)]).unwrap();
        assert_eq!(written.len(), 1);
        assert!(dir.path().join(SENSITIVITY_TABLE).exists());
        assert!(!dir.path().join(STATISTICS_TABLE).exists());
    }
}
