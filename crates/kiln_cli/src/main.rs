//! Kiln CLI, the command-line front end of the incremental build engine.
//!
//! Provides `kiln build` for incremental rebuilds of a project's `src/`
//! tree, `kiln status` for listing what changed since the last build,
//! `kiln clean` for dropping the on-disk cache and `kiln gc` for removing
//! superseded artifacts from it.

#![warn(missing_docs)]

mod build;
mod clean;
mod gc;
mod project;
mod status;
mod transform;

use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Kiln, an incremental build engine.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build engine")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rebuild everything affected by source changes.
    Build(BuildArgs),
    /// List sources changed since the last build.
    Status,
    /// Remove the on-disk cache.
    Clean,
    /// Remove cached artifacts no module refers to any more.
    Gc,
}

/// Arguments for the `kiln build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Changed paths, relative to the project root. If omitted, changes are
    /// detected by hashing every file under `src/`.
    pub paths: Vec<String>,

    /// Entry points; modules they do not reach are pruned.
    #[arg(short, long = "entry", num_args = 1..)]
    pub entries: Vec<String>,

    /// Directory to write every module's output to.
    #[arg(short, long)]
    pub out: Option<String>,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_tracing(&global);

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Status => status::run(&global),
        Command::Clean => clean::run(&global),
        Command::Gc => gc::run(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(global: &GlobalArgs) {
    let default = if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
