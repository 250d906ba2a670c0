//! Build automation tasks for MissionLink
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use missionlink_core::FailureMode;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "MissionLink build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run the transfer benchmarks
    Bench,

    /// Run an upload against every failure mode through the CLI
    Scenarios,

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench => {
            run_command(
                "cargo",
                &["bench", "-p", "missionlink-integration-tests", "--bench", "transfer"],
            )?;
        }
        Commands::Scenarios => {
            for mode in FailureMode::ALL {
                let command = if mode.is_read() { "download" } else { "upload" };
                let name = mode.name();
                println!("== {command} --failure {name}");
                // Non-retryable modes are expected to exit with an error.
                if let Err(e) = run_command(
                    "cargo",
                    &[
                        "run", "-q", "-p", "missionlink-cli", "--", command, "--failure", name,
                    ],
                ) {
                    println!("   {e}");
                }
            }
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
