//! CLI command implementations
//!
//! Each submodule implements a specific CLI command.

use clap::ValueEnum;
use rngtrace_compile::compiler::Compiler;
use rngtrace_compile::driver::Driver;

use crate::config::CliConfig;

pub mod inspect;
pub mod run;
pub mod scenarios;
pub mod sweep;
pub mod validate;

/// Output formats shared by reporting commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Driver compiling with the configured policy
pub(crate) fn driver_for(config: &CliConfig) -> Driver {
    Driver::new(Compiler::new(config.compiler))
}
