//! CLI command implementations

pub mod error;
pub mod plan;
pub mod run;
pub mod validate;

pub use error::CliError;
pub use plan::PlanCommand;
pub use run::{Cli, Commands, OutputFormat, RunCommand};
pub use validate::ValidateCommand;
