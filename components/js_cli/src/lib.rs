//! Command line interface for the Petrel JavaScript engine.
//!
//! The [`Runtime`] wires the engine to the core built-in library and
//! the CLI conveniences (the `print` host function, byte-code
//! listings, snapshot files); [`Cli`] is the clap-derived argument
//! surface of the `petrel-js` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub mod repl;
mod runtime;

use clap::Parser;

pub use error::{CliError, CliResult};
pub use runtime::{Runtime, SnapshotSummary};

/// Command line arguments of `petrel-js`.
#[derive(Debug, Parser)]
#[command(
    name = "petrel-js",
    about = "Petrel JavaScript engine",
    version,
    arg_required_else_help = false
)]
pub struct Cli {
    /// Script file to execute.
    pub file: Option<String>,

    /// Evaluate inline source text.
    #[arg(short, long, value_name = "CODE")]
    pub eval: Option<String>,

    /// Start the interactive REPL.
    #[arg(long)]
    pub repl: bool,

    /// Treat input as strict-mode code.
    #[arg(long)]
    pub strict: bool,

    /// Print the compiled byte-code before executing.
    #[arg(long)]
    pub print_bytecode: bool,

    /// Compile the input and write a snapshot instead of executing.
    #[arg(long, value_name = "OUT")]
    pub save_snapshot: Option<String>,

    /// Execute a snapshot file.
    #[arg(long, value_name = "FILE")]
    pub exec_snapshot: Option<String>,

    /// Print a snapshot file's header summary.
    #[arg(long, value_name = "FILE")]
    pub snapshot_info: Option<String>,

    /// Emit machine-readable JSON where applicable.
    #[arg(long)]
    pub json: bool,
}
