//! Inspect command implementation
//!
//! Shows how draws move the device generator's offset and that restoring
//! the entry snapshot replays them.

use rngtrace_core::{DeviceGenerator, GeneratorStateSnapshot, StatefulGenerator};

use crate::Result;

/// Generator states and values observed by one inspection
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub entry: GeneratorStateSnapshot,
    pub exit: GeneratorStateSnapshot,
    pub values: Vec<f64>,
    pub replay_matches: bool,
}

/// Draws `draws` values from `seed`, then restores and replays them
pub fn inspect(seed: u64, draws: usize, normal: bool) -> Inspection {
    let mut gen = DeviceGenerator::from_seed(seed);
    let fill = |gen: &mut DeviceGenerator, buffer: &mut [f64]| {
        if normal {
            gen.fill_normal(buffer);
        } else {
            gen.fill_uniform(buffer);
        }
    };

    let entry = gen.capture();
    let mut values = vec![0.0; draws];
    fill(&mut gen, &mut values);
    let exit = gen.capture();

    gen.restore(&entry);
    let mut replay = vec![0.0; draws];
    fill(&mut gen, &mut replay);

    Inspection {
        entry,
        exit,
        replay_matches: replay == values && gen.capture() == exit,
        values,
    }
}

fn hex(snapshot: &GeneratorStateSnapshot) -> String {
    snapshot
        .as_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Run the inspect command
pub fn run(seed: u64, draws: usize, normal: bool) -> Result<()> {
    let inspection = inspect(seed, draws, normal);

    println!("before: {}  [{}]", inspection.entry, hex(&inspection.entry));
    for (i, value) in inspection.values.iter().enumerate() {
        println!("  draw {i:>3}: {value:.12}");
    }
    println!("after:  {}  [{}]", inspection.exit, hex(&inspection.exit));
    println!(
        "consumed {} units; replay after restore {}",
        inspection.exit.units_since(&inspection.entry),
        if inspection.replay_matches { "matches" } else { "DIFFERS" }
    );
    Ok(())
}
