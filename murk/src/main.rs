//! `murk`: a source-level build obfuscator for Cargo workspaces (spec
//! §1-2, §6). `main` checks for the worker re-entry sentinels before
//! attempting to parse its own CLI, since Cargo re-invokes this same
//! binary as `RUSTC_WRAPPER` and as `-C linker=` with an entirely
//! different argv shape than a user ever types.

mod cli;
mod error;
mod logging;
mod planner;
mod reverse;
mod worker;

use clap::Parser;

use cli::{Cli, Command};

fn main() {
    if std::env::var_os("MURK_WORKER").is_some() || std::env::var_os("MURK_LINK_WRAPPER").is_some() {
        std::process::exit(run_worker());
    }

    let cli = Cli::parse();
    let debug = match &cli.command {
        Command::Build(a) | Command::Test(a) | Command::Run(a) => a.debug,
        Command::Reverse(_) => false,
    };
    logging::init(cli.verbose, debug);

    let result = match &cli.command {
        Command::Build(args) => planner::run(planner::Mode::Build, args),
        Command::Test(args) => planner::run(planner::Mode::Test, args),
        Command::Run(args) => planner::run(planner::Mode::Run, args),
        Command::Reverse(args) => reverse::run(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = exit_code(&err);
            eprintln!("murk: {:#}", anyhow::Error::new(err));
            std::process::exit(code);
        }
    }
}

fn run_worker() -> i32 {
    match worker::dispatch() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("murk: {:#}", anyhow::Error::new(err));
            1
        }
    }
}

/// Exit code taxonomy (spec §6): 2 for bad user input, 1 for everything
/// else, 0 on success (handled by the `Ok` arm above).
fn exit_code(err: &error::Error) -> i32 {
    match err {
        error::Error::Usage(_) => 2,
        error::Error::Core(murk_core::Error::UsageError(_)) => 2,
        _ => 1,
    }
}
