use clap::Subcommand;
use std::error::Error;
use thiserror::Error;

pub mod analyze;
pub mod cfg;
pub mod disasm;

/// Fatal CLI conditions with their process exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    /// Missing or unreadable source, empty key-variable list.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The compiler returned non-zero or produced no runtime bytecode.
    #[error("compilation failed: {0}")]
    CompilationFailed(String),
}

impl CliError {
    /// Exit code contract: 0 on a completed analysis, 1 on compilation
    /// failure, 2 on malformed inputs.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidInput(_) => 2,
            CliError::CompilationFailed(_) => 1,
        }
    }
}

/// CLI subcommands for Warden.
#[derive(Subcommand)]
pub enum Cmd {
    /// Compile a contract and run the full access-control analysis.
    Analyze(analyze::AnalyzeArgs),
    /// Decode bytecode to an annotated instruction listing.
    Disasm(disasm::DisasmArgs),
    /// Write the runtime CFG as Graphviz dot to stdout or a file.
    Cfg(cfg::CfgArgs),
}

/// Trait for executing CLI subcommands.
pub trait Command {
    /// Executes the subcommand.
    ///
    /// # Returns
    /// A `Result` indicating success or an error if execution fails.
    fn execute(self) -> Result<(), Box<dyn Error>>;
}

impl Command for Cmd {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Analyze(args) => args.execute(),
            Cmd::Disasm(args) => args.execute(),
            Cmd::Cfg(args) => args.execute(),
        }
    }
}
