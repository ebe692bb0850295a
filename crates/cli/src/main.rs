use clap::Parser;
use tracing_subscriber::EnvFilter;
use warden_cli::commands::{Cmd, CliError, Command};

/// Warden CLI
///
/// Warden is an access-control vulnerability detector for Solidity
/// contracts: it compiles the source, reconstructs a control-flow graph
/// from the runtime bytecode, traces untrusted input into storage writes
/// of nominated key variables, and reports how well each write is guarded.
#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden: access-control write analysis for EVM contracts")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

/// Runs the Warden CLI with the provided arguments.
fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .without_time()
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.command.execute() {
        eprintln!("error: {err}");
        let code = err
            .downcast_ref::<CliError>()
            .map(CliError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
