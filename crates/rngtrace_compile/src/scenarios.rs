//! Catalogue of generator-state scenarios.
//!
//! Each [`Scenario`] pairs traced functions with the way the [`Driver`]
//! should run them and the outcome expected. The catalogue covers the
//! supported idioms (read-modify-restore, saved state replayed in backward,
//! checkpoint recompute) and the patterns compilation must refuse.

use std::sync::Arc;

use rngtrace_core::{DeviceGenerator, GeneratorStateSnapshot, StatefulGenerator};

use crate::context::TraceContext;
use crate::driver::{Driver, DriverResult, Expectation, ScenarioOutcome};
use crate::error::{PatternKind, TraceResult};
use crate::graph::TensorRef;
use crate::kernels;

/// Shared traced function over the device generator.
pub type ScenarioFn = Arc<
    dyn Fn(&mut TraceContext<'_, DeviceGenerator>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>
        + Send
        + Sync,
>;

/// Length of every scenario input.
pub const INPUT_LEN: usize = 4;

/// Seed the generator is reset to before a backward pass.
pub const BACKWARD_SEED: u64 = 16;

/// Default number of checkpointed iterations.
pub const DEFAULT_ITERATIONS: usize = 16;

/// How a scenario is driven.
#[derive(Clone)]
pub enum ScenarioKind {
    /// Compile once and compare from several entry states.
    Direct {
        /// Traced function
        function: ScenarioFn,
    },
    /// Forward plus recompute of a checkpointed region.
    Checkpointed {
        /// Region body
        function: ScenarioFn,
    },
    /// Custom forward/backward pair.
    ForwardBackward {
        /// Forward pass
        forward: ScenarioFn,
        /// Backward pass
        backward: ScenarioFn,
    },
}

impl ScenarioKind {
    /// Short label for listings.
    pub fn label(&self) -> &'static str {
        match self {
            ScenarioKind::Direct { .. } => "direct",
            ScenarioKind::Checkpointed { .. } => "checkpointed",
            ScenarioKind::ForwardBackward { .. } => "forward-backward",
        }
    }
}

/// A named scenario with its expected outcome.
#[derive(Clone)]
pub struct Scenario {
    /// Catalogue name
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Expected outcome
    pub expectation: Expectation,
    /// How to drive it
    pub kind: ScenarioKind,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("expectation", &self.expectation)
            .finish()
    }
}

/// Result of running one scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Scenario name
    pub name: &'static str,
    /// Seed the run started from
    pub seed: u64,
    /// How it ended
    pub outcome: ScenarioOutcome,
    /// Whether the outcome matched the expectation
    pub expectation_met: bool,
    /// Generator state before each checkpointed iteration; empty otherwise
    pub progression: Vec<GeneratorStateSnapshot>,
}

/// Deterministic normal inputs for `seed`, drawn from a generator separate
/// from the one under test.
pub fn inputs_for(seed: u64) -> Vec<Vec<f64>> {
    let mut gen = DeviceGenerator::from_seed(seed ^ 0x5eed_1a7e_u64);
    vec![kernels::normal(&mut gen, INPUT_LEN)]
}

/// Entry states a direct scenario is replayed from.
pub fn entry_states(seed: u64) -> Vec<GeneratorStateSnapshot> {
    vec![
        GeneratorStateSnapshot::new(seed, 0),
        GeneratorStateSnapshot::new(seed.wrapping_add(1), 0),
        GeneratorStateSnapshot::new(seed, 24),
    ]
}

impl Scenario {
    /// Runs the scenario from `seed`.
    ///
    /// `iterations` applies to checkpointed scenarios only.
    pub fn run(&self, driver: &Driver, seed: u64, iterations: usize) -> DriverResult<ScenarioReport> {
        let inputs = inputs_for(seed);
        let (outcome, progression) = match &self.kind {
            ScenarioKind::Direct { function } => (
                driver.direct(function.as_ref(), &inputs, &entry_states(seed))?,
                Vec::new(),
            ),
            ScenarioKind::Checkpointed { function } => {
                let report = driver.checkpointed(function.as_ref(), &inputs, seed, iterations)?;
                (report.outcome, report.progression)
            }
            ScenarioKind::ForwardBackward { forward, backward } => (
                driver.forward_backward(
                    forward.as_ref(),
                    backward.as_ref(),
                    &inputs,
                    &[INPUT_LEN],
                    seed,
                    Some(BACKWARD_SEED),
                )?,
                Vec::new(),
            ),
        };

        Ok(ScenarioReport {
            name: self.name,
            seed,
            expectation_met: self.expectation.is_met_by(&outcome),
            outcome,
            progression,
        })
    }
}

type Ctx<'a> = TraceContext<'a, DeviceGenerator>;

/// Forward of a custom function: saves the entry state, draws, restores it
/// and draws the same values again.
fn custom_forward(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let x = inputs[0];
    let state = ctx.get_state();
    ctx.save_tensor(x)?;
    ctx.save_state(state)?;

    let r1 = ctx.rand(INPUT_LEN);
    let r2 = ctx.rand(INPUT_LEN);
    let sx = ctx.sin(x)?;
    let a = ctx.mul(r1, r2)?;
    let a = ctx.mul(a, sx)?;

    ctx.set_state(state)?;
    let r3 = ctx.rand(INPUT_LEN);
    let r4 = ctx.rand(INPUT_LEN);
    let b = ctx.mul(r3, r4)?;
    Ok(vec![ctx.mul(b, a)?])
}

/// Backward of the custom function: replays the forward's entry state.
fn custom_backward(ctx: &mut Ctx<'_>, grads: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let x = ctx.saved_tensor(0)?;
    let state = ctx.saved_state(0)?;
    ctx.set_state(state)?;
    let r = ctx.rand(INPUT_LEN);
    let g = ctx.mul(grads[0], r)?;
    let cx = ctx.cos(x)?;
    Ok(vec![ctx.mul(g, cx)?])
}

fn restore_in_between(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let state = ctx.get_state();
    let x = ctx.sin(inputs[0])?;
    let noise = ctx.rand(INPUT_LEN);
    let x = ctx.add(x, noise)?;
    ctx.set_state(state)?;
    let noise = ctx.rand(INPUT_LEN);
    Ok(vec![ctx.add(x, noise)?])
}

/// Reseeds, then restores a snapshot taken before the region began.
fn stale_restore() -> ScenarioFn {
    let mut outside = DeviceGenerator::from_seed(0);
    outside.manual_seed(BACKWARD_SEED);
    let bad_state = outside.capture();

    Arc::new(move |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> TraceResult<Vec<TensorRef>> {
        ctx.manual_seed(32);
        let x = ctx.sin(inputs[0])?;
        let noise = ctx.rand(INPUT_LEN);
        let x = ctx.add(x, noise)?;
        ctx.set_state(bad_state)?;
        let noise = ctx.rand(INPUT_LEN);
        Ok(vec![ctx.add(x, noise)?])
    })
}

/// Body of the checkpointed block.
fn checkpoint_block(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let x = inputs[0];
    let noise = ctx.rand(INPUT_LEN);
    let sx = ctx.sin(x)?;
    let a = ctx.add(noise, sx)?;

    let matrix = ctx.rand(INPUT_LEN * INPUT_LEN);
    let noise = ctx.sum_columns(matrix, INPUT_LEN)?;
    let sa = ctx.sin(a)?;
    let a = ctx.add(noise, sa)?;

    let noise = ctx.rand(INPUT_LEN);
    let sa = ctx.sin(a)?;
    let a = ctx.add(noise, sa)?;
    Ok(vec![ctx.dropout(a, 0.5)?])
}

fn draws_only(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let noise = ctx.randn(INPUT_LEN);
    let x = ctx.add(inputs[0], noise)?;
    let x = ctx.sigmoid(x)?;
    Ok(vec![ctx.dropout(x, 0.2)?])
}

/// Restores an inner read after an outer restore discarded the draws it saw.
/// The replayed graph takes the inner read again, so this stays consistent.
fn overlapping_restore(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let outer = ctx.get_state();
    let a = ctx.rand(INPUT_LEN);
    let inner = ctx.get_state();
    let b = ctx.rand(INPUT_LEN);
    ctx.set_state(outer)?;
    let c = ctx.rand(INPUT_LEN);
    ctx.set_state(inner)?;
    let d = ctx.rand(INPUT_LEN);

    let ab = ctx.add(a, b)?;
    let cd = ctx.add(c, d)?;
    let y = ctx.mul(ab, cd)?;
    Ok(vec![ctx.add(inputs[0], y)?])
}

/// Forward that saves an inner state and then discards it by restoring the
/// outer one.
fn leaky_forward(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let outer = ctx.get_state();
    let a = ctx.rand(INPUT_LEN);
    let inner = ctx.get_state();
    ctx.save_state(inner)?;
    let b = ctx.rand(INPUT_LEN);
    ctx.set_state(outer)?;
    let c = ctx.rand(INPUT_LEN);

    let ab = ctx.mul(a, b)?;
    let y = ctx.add(ab, c)?;
    Ok(vec![ctx.add(inputs[0], y)?])
}

/// Backward that brings the discarded inner state back.
fn leaky_backward(ctx: &mut Ctx<'_>, grads: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
    let inner = ctx.saved_state(0)?;
    ctx.set_state(inner)?;
    let r = ctx.rand(INPUT_LEN);
    Ok(vec![ctx.mul(grads[0], r)?])
}

/// Every scenario, in listing order.
pub fn catalogue() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "custom-function",
            description: "forward saves state, draws, restores and draws; backward restores the saved state",
            expectation: Expectation::Succeeds,
            kind: ScenarioKind::ForwardBackward {
                forward: Arc::new(custom_forward),
                backward: Arc::new(custom_backward),
            },
        },
        Scenario {
            name: "restore-in-between",
            description: "read, discarded draw, restore, real draw",
            expectation: Expectation::Succeeds,
            kind: ScenarioKind::Direct {
                function: Arc::new(restore_in_between),
            },
        },
        Scenario {
            name: "stale-restore",
            description: "reseed, then restore a snapshot captured before the region",
            expectation: Expectation::Rejects(PatternKind::StaleRestoreTarget),
            kind: ScenarioKind::Direct {
                function: stale_restore(),
            },
        },
        Scenario {
            name: "checkpointing",
            description: "checkpointed block of draws and dropout, recomputed every iteration",
            expectation: Expectation::Succeeds,
            kind: ScenarioKind::Checkpointed {
                function: Arc::new(checkpoint_block),
            },
        },
        Scenario {
            name: "draws-only",
            description: "normal draws and dropout with no state access",
            expectation: Expectation::Succeeds,
            kind: ScenarioKind::Direct {
                function: Arc::new(draws_only),
            },
        },
        Scenario {
            name: "overlapping-restore",
            description: "restore of an inner read after an outer restore closed its bracket",
            expectation: Expectation::Succeeds,
            kind: ScenarioKind::Direct {
                function: Arc::new(overlapping_restore),
            },
        },
        Scenario {
            name: "leaky-restore",
            description: "backward restores a state its forward discarded",
            expectation: Expectation::Rejects(PatternKind::UnsupportedLeakage),
            kind: ScenarioKind::ForwardBackward {
                forward: Arc::new(leaky_forward),
                backward: Arc::new(leaky_backward),
            },
        },
    ]
}

/// Looks up a scenario by name.
pub fn find(name: &str) -> Option<Scenario> {
    catalogue().into_iter().find(|s| s.name == name)
}
