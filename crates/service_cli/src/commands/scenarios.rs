//! Scenarios command implementation
//!
//! Lists the scenario catalogue.

use rngtrace_compile::scenarios::catalogue;

use crate::Result;

/// Run the scenarios command
pub fn run() -> Result<()> {
    println!(
        "{:<20} {:<18} {:<32} Description",
        "Name", "Kind", "Expectation"
    );
    println!("{}", "-".repeat(100));
    for scenario in catalogue() {
        println!(
            "{:<20} {:<18} {:<32} {}",
            scenario.name,
            scenario.kind.label(),
            scenario.expectation.to_string(),
            scenario.description
        );
    }
    Ok(())
}
