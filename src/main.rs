//! octopus - run declarative service/test pipelines
//!
//! ## Commands
//!
//! - `octopus check` - Resolve a document and validate its dependency graph
//! - `octopus plan` - Print start order, schedules and rendered commands
//! - `octopus run` - Start services, run tests and report the verdict
//! - `octopus completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate a document
//! octopus check suite.yaml
//!
//! # Show what would run, with a lazy input overridden
//! octopus plan suite.yaml --set HOST_HTTP_PORT=9090
//!
//! # Run with podman and write a JSON report
//! octopus run suite.yaml --runtime podman --format json -o report.json
//!
//! # Generate shell completions
//! octopus completions bash > /etc/bash_completion.d/octopus
//! ```

use std::process::ExitCode;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("OCTOPUS_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::from(cli::EXIT_INVALID)
        }
    }
}
