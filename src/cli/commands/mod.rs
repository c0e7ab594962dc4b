//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::Result;

pub mod backup;
pub mod bundle;
pub mod completions;
pub mod pull;
pub mod push;
pub mod setup;
pub mod status;

mod report;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Push(args) => push::run(ctx, args),
        Commands::Pull(args) => pull::run(ctx, args),
        Commands::Status(args) => status::run(ctx, args),
        Commands::Bundle(args) => bundle::run(ctx, args),
        Commands::Backup(args) => backup::run(ctx, args),
        Commands::Setup(args) => setup::run(ctx, args),
        Commands::Completions(args) => completions::run(args),
    }
}

/// Split a comma-separated `--skills` list, dropping blanks.
pub(crate) fn split_names(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_names_handles_commas_and_repeats() {
        let names = split_names(&["a, b".to_string(), "c".to_string(), ",".to_string()]);
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
