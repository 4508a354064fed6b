pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "costscope",
    about = "AWS cost estimation agent CLI",
    long_about = "Estimate AWS costs from an architecture description, inspect configuration, and check runtime readiness.",
    after_help = "Examples:\n  costscope estimate\n  costscope estimate --architecture \"Two m5.large EC2 instances behind an ALB\"\n  costscope estimate --scenario serverless-api\n  costscope doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Estimate monthly AWS costs for an architecture description")]
    Estimate {
        #[arg(long, conflicts_with = "scenario", help = "Architecture description to estimate")]
        architecture: Option<String>,
        #[arg(long, help = "Name of a built-in demonstration scenario (see `costscope scenarios`)")]
        scenario: Option<String>,
    },
    #[command(about = "List built-in demonstration scenarios")]
    Scenarios,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, AWS credentials, interpreter and pricing server readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Start the pricing server and verify its tool catalog")]
        probe_pricing: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Estimate { architecture, scenario } => {
            commands::estimate::run(commands::estimate::EstimateRequest { architecture, scenario })
        }
        Command::Scenarios => {
            commands::CommandResult { exit_code: 0, output: commands::scenarios::run() }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json, probe_pricing } => commands::doctor::run(json, probe_pricing),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
