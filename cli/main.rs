#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;

use drugsens::baseline::CorrectBaseline;
use drugsens::config::SensitivityConfig;
use drugsens::data::load_blocks;
use drugsens::pipeline::calculate_sensitivity;
use drugsens::report::write_tables;

#[derive(Clone, Copy, ValueEnum)]
pub enum CorrectBaselineCli {
    Non,
    Part,
    All,
}

impl From<CorrectBaselineCli> for CorrectBaseline {
    fn from(value: CorrectBaselineCli) -> Self {
        match value {
            CorrectBaselineCli::Non => CorrectBaseline::Non,
            CorrectBaselineCli::Part => CorrectBaseline::Part,
            CorrectBaselineCli::All => CorrectBaseline::All,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "drugsens",
    version,
    about = "Score drug combination blocks: relative IC50, RI and CSS, with bootstrap statistics for replicated blocks"
)]
pub struct Cli {
    /// Path to the block TSV file with block_id, conc1..concN and response columns
    pub table: String,

    /// Optional TOML configuration file; flags below override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Score the raw response_origin column instead of the adjusted response
    #[arg(long)]
    pub raw_response: bool,

    /// Baseline correction applied before scoring
    #[arg(long, value_enum)]
    pub correct_baseline: Option<CorrectBaselineCli>,

    /// Number of bootstrap iterations for replicated blocks
    #[arg(long, value_name = "N")]
    pub iteration: Option<usize>,

    /// Seed for bootstrap resampling
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Directory receiving sensitivity.tsv and sensitivity_statistics.tsv
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,
}

fn resolve_config(cli: &Cli) -> Result<SensitivityConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            log::info!("Loading configuration from '{path}'");
            SensitivityConfig::load(path)?
        }
        None => SensitivityConfig::default(),
    };

    if cli.raw_response {
        config.adjusted = false;
    }
    if let Some(method) = cli.correct_baseline {
        config.correct_baseline = method.into();
    }
    if let Some(iteration) = cli.iteration {
        config.iteration = iteration;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;
    Ok(config)
}

pub fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&cli)?;
    if config.seed.is_none() {
        log::info!("No seed given, using the default seed {}.", config.effective_seed());
    }

    let blocks = load_blocks(&cli.table, config.adjusted)?;
    let report = calculate_sensitivity(&blocks, &config);

    for path in write_tables(&cli.out_dir, &report.outcomes)? {
        println!("Results written to: {path}");
    }
    if !report.faults.is_empty() {
        eprintln!(
            "{} block(s) could not be scored and were omitted:",
            report.faults.len()
        );
        for fault in &report.faults {
            eprintln!("  {fault}");
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wolfe_bfgs", log::LevelFilter::Warn)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
