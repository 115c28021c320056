//! Command-line interface for octopus
//!
//! - `check`: resolve a document and validate its graph
//! - `plan`: print start order, schedules and rendered commands
//! - `run`: start services, run tests and print the report
//! - `completions`: generate shell completions
//!
//! Exit codes: 0 when every test passed, 1 when a test did not pass, 2 when
//! the document could not be loaded or validated.

pub mod check;
pub mod completions;
pub mod input;
pub mod run;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use octopus::infrastructure::{Config, ContainerRuntime, init_logging};

/// Every test passed
pub const EXIT_PASS: u8 = 0;
/// At least one test did not pass
pub const EXIT_FAIL: u8 = 1;
/// The document could not be loaded or validated
pub const EXIT_INVALID: u8 = 2;

/// CLI arguments for octopus
#[derive(Parser, Debug)]
#[command(name = "octopus")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a document and validate its dependency graph
    Check {
        /// Document to validate
        file: PathBuf,
        /// Lazy input override, NAME=VALUE (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },

    /// Print the execution plan without running anything
    Plan {
        /// Document to plan
        file: PathBuf,
        /// Lazy input override, NAME=VALUE (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
        /// Container runtime used to render service commands
        #[arg(long, value_enum)]
        runtime: Option<RuntimeArg>,
    },

    /// Start services, run tests and report the verdict
    Run {
        /// Document to run
        file: PathBuf,
        /// Lazy input override, NAME=VALUE (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
        /// Report format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Concurrent startups and test runs
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Container runtime
        #[arg(long, value_enum)]
        runtime: Option<RuntimeArg>,
        /// Leave services running after the run
        #[arg(long)]
        no_teardown: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Output format of a run report
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable summary
    Text,
    /// Full report as JSON
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RuntimeArg {
    Docker,
    Podman,
}

impl From<RuntimeArg> for ContainerRuntime {
    fn from(arg: RuntimeArg) -> Self {
        match arg {
            RuntimeArg::Docker => ContainerRuntime::Docker,
            RuntimeArg::Podman => ContainerRuntime::Podman,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Loads configuration: defaults, then the file, then `OCTOPUS_*` variables
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config
        .apply_env()
        .context("Invalid configuration in environment")
}

fn log_level(config: &Config, verbose: u8) -> &str {
    match verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

/// Parse and execute CLI arguments
pub async fn run() -> Result<ExitCode> {
    let args = Args::parse();
    execute(args).await
}

async fn execute(args: Args) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    init_logging(log_level(&config, args.verbose));

    match args.command {
        Command::Check { file, set } => check::check_document(&file, &set),
        Command::Plan { file, set, runtime } => {
            let runtime = runtime.map_or(config.container_runtime, ContainerRuntime::from);
            check::print_plan(&file, &set, runtime)
        }
        Command::Run {
            file,
            set,
            format,
            output,
            max_parallel,
            runtime,
            no_teardown,
        } => {
            if let Some(max_parallel) = max_parallel {
                config.max_parallel = max_parallel;
            }
            if let Some(runtime) = runtime {
                config.container_runtime = runtime.into();
            }
            if no_teardown {
                config.teardown = false;
            }
            run::run_document(&file, &set, &config, format, output.as_deref()).await
        }
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
            };
            let completions = completions::generate_completions(shell)?;

            if let Some(output_path) = output {
                completions::save_completions(&completions, &output_path)?;
            } else {
                println!("{completions}");
            }
            Ok(ExitCode::from(EXIT_PASS))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let args = Args::try_parse_from([
            "octopus", "-vv", "run", "suite.yaml", "--set", "PORT=9090", "-s", "HOST=db",
            "--format", "json", "--no-teardown", "--runtime", "podman",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        let Command::Run {
            set,
            format,
            no_teardown,
            runtime,
            ..
        } = args.command
        else {
            panic!("expected run");
        };
        assert_eq!(set, ["PORT=9090", "HOST=db"]);
        assert_eq!(format, ReportFormat::Json);
        assert!(no_teardown);
        assert_eq!(runtime, Some(RuntimeArg::Podman));
    }

    #[test]
    fn test_log_level_from_verbosity() {
        let config = Config::default();
        assert_eq!(log_level(&config, 0), "info");
        assert_eq!(log_level(&config, 1), "debug");
        assert_eq!(log_level(&config, 5), "trace");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("octopus.yaml");
        std::fs::write(&path, "readiness_timeout_secs: 7\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.readiness_timeout_secs, 7);
    }
}
