//! substrate - exchange skills between two workspaces through a shared git store.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use substrate::app::AppContext;
use substrate::cli::output::{emit_json, robot_error_structured};
use substrate::cli::{Cli, Commands, commands};
use substrate::{Result, SubstrateError};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&cli, &e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        return commands::completions::run(args);
    }
    let ctx = AppContext::from_cli(cli)?;
    substrate::transport::set_network_timeouts(ctx.config.timeout())?;
    commands::run(&ctx, &cli.command)
}

fn report_error(cli: &Cli, e: &SubstrateError) {
    if cli.robot {
        // A failed run already printed its report.
        if matches!(e, SubstrateError::RunFailed { .. }) {
            return;
        }
        if emit_json(&robot_error_structured(e)).is_err() {
            eprintln!("Error: {e}");
        }
        return;
    }
    eprintln!("Error: {e}");
    let suggestion = e.to_structured().suggestion;
    if !suggestion.is_empty() {
        eprintln!("  hint: {suggestion}");
    }
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "warn,substrate=info",
        1 => "info,substrate=debug",
        2 => "debug,substrate=trace",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.robot {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
