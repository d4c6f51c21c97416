//! Command dispatch: bridges CLI args -> pipeline calls -> output formatting.

pub mod batch;
pub mod cache;
pub mod config_cmd;
pub mod load;
pub mod simplify;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Load(args) => load::handle(args, global).await,
        Command::Batch(args) => batch::handle(args, global).await,
        Command::Simplify(args) => simplify::handle(args, global).await,
        Command::Cache(args) => cache::handle(args, global).await,
        Command::Config(args) => config_cmd::handle(args, global),
        Command::Completions(_) => Err(CliError::Internal(
            "completions are generated before dispatch".into(),
        )),
    }
}
