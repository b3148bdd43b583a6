//! Sweep command implementation
//!
//! Runs one scenario from a range of consecutive seeds in parallel. Every
//! run owns its generators; the compiler and scenario are shared.

use rayon::prelude::*;
use tracing::info;

use rngtrace_compile::scenarios;

use super::driver_for;
use super::run::ReportRow;
use crate::config::CliConfig;
use crate::{CliError, Result};

/// Summary of a sweep
#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub rows: Vec<ReportRow>,
    pub failed: usize,
}

/// Runs `name` from `seeds` consecutive seeds starting at the configured seed
pub fn sweep(name: &str, seeds: u64, config: &CliConfig) -> Result<SweepSummary> {
    let scenario =
        scenarios::find(name).ok_or_else(|| CliError::UnknownScenario(name.to_string()))?;
    let driver = driver_for(config);

    let seed_list: Vec<u64> = (0..seeds).map(|k| config.seed.wrapping_add(k)).collect();
    let rows = seed_list
        .par_iter()
        .map(|&seed| -> Result<ReportRow> {
            let report = scenario.run(&driver, seed, config.iterations)?;
            Ok(ReportRow::new(&scenario, &report))
        })
        .collect::<Result<Vec<_>>>()?;

    let failed = rows.iter().filter(|r| !r.expectation_met).count();
    info!(scenario = name, seeds, failed, "sweep finished");
    Ok(SweepSummary { rows, failed })
}

/// Run the sweep command
pub fn run(name: &str, seeds: u64, config: &CliConfig) -> Result<()> {
    let summary = sweep(name, seeds, config)?;

    for row in summary.rows.iter().filter(|r| !r.expectation_met) {
        println!("seed {:<8} {}", row.seed, row.outcome);
    }
    println!(
        "{name}: {} of {} seeds met the expectation",
        summary.rows.len() - summary.failed,
        summary.rows.len()
    );

    if summary.failed > 0 {
        return Err(CliError::ExpectationFailed {
            failed: summary.failed,
            total: summary.rows.len(),
        });
    }
    Ok(())
}
