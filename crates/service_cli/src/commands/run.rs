//! Run command implementation
//!
//! Runs catalogue scenarios through the driver and reports whether each met
//! its expectation.

use serde::Serialize;
use tracing::{info, warn};

use rngtrace_compile::scenarios::{self, Scenario, ScenarioReport};

use super::{driver_for, OutputFormat};
use crate::config::CliConfig;
use crate::{CliError, Result};

/// Serialisable view of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub name: &'static str,
    pub seed: u64,
    pub expectation: String,
    pub outcome: String,
    pub expectation_met: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub progression: Vec<String>,
}

impl ReportRow {
    pub fn new(scenario: &Scenario, report: &ScenarioReport) -> Self {
        Self {
            name: report.name,
            seed: report.seed,
            expectation: scenario.expectation.to_string(),
            outcome: report.outcome.to_string(),
            expectation_met: report.expectation_met,
            progression: report.progression.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Selects the scenarios named on the command line
pub fn select(name: Option<&str>, all: bool) -> Result<Vec<Scenario>> {
    if all {
        return Ok(scenarios::catalogue());
    }
    let name = name.ok_or_else(|| {
        CliError::InvalidArgument("a scenario name or --all is required".to_string())
    })?;
    scenarios::find(name)
        .map(|s| vec![s])
        .ok_or_else(|| CliError::UnknownScenario(name.to_string()))
}

/// Runs `selected` from the configured seed
pub fn run_scenarios(selected: &[Scenario], config: &CliConfig) -> Result<Vec<ReportRow>> {
    let driver = driver_for(config);
    selected
        .iter()
        .map(|scenario| -> Result<ReportRow> {
            info!(scenario = scenario.name, seed = config.seed, "running scenario");
            let report = scenario.run(&driver, config.seed, config.iterations)?;
            if !report.expectation_met {
                warn!(scenario = scenario.name, outcome = %report.outcome, "expectation not met");
            }
            Ok(ReportRow::new(scenario, &report))
        })
        .collect()
}

/// Run the run command
pub fn run(name: Option<&str>, all: bool, config: &CliConfig, format: OutputFormat) -> Result<()> {
    let selected = select(name, all)?;
    let rows = run_scenarios(&selected, config)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => print_table(&rows),
    }

    let failed = rows.iter().filter(|r| !r.expectation_met).count();
    if failed > 0 {
        return Err(CliError::ExpectationFailed {
            failed,
            total: rows.len(),
        });
    }
    Ok(())
}

fn print_table(rows: &[ReportRow]) {
    println!("{:<20} {:<6} {:<4} Outcome", "Scenario", "Seed", "Ok");
    println!("{}", "-".repeat(80));
    for row in rows {
        let mark = if row.expectation_met { "yes" } else { "NO" };
        println!("{:<20} {:<6} {:<4} {}", row.name, row.seed, mark, row.outcome);
        for (iteration, state) in row.progression.iter().enumerate() {
            println!("{:>30} iteration {iteration}: {state}", "");
        }
    }
}
