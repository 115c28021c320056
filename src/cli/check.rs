//! `octopus check` and `octopus plan`
//!
//! Both commands resolve the document and validate its graph without
//! touching any service. `plan` additionally prints the start order, when
//! each test is scheduled and the commands that would run.

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;
use tracing::info;

use super::{EXIT_INVALID, EXIT_PASS, input};
use octopus::infrastructure::ContainerRuntime;
use octopus::plan::Plan;

/// Loads a plan, printing a structural error and returning its exit code
fn plan_or_exit(file: &Path, sets: &[String]) -> Result<Result<Plan, ExitCode>> {
    match input::load_plan(file, sets)? {
        Ok(plan) => Ok(Ok(plan)),
        Err(err) => {
            eprintln!("{}: {err}", file.display());
            Ok(Err(ExitCode::from(EXIT_INVALID)))
        }
    }
}

/// Validates a document
pub fn check_document(file: &Path, sets: &[String]) -> Result<ExitCode> {
    let plan = match plan_or_exit(file, sets)? {
        Ok(plan) => plan,
        Err(code) => return Ok(code),
    };

    let document = plan.document();
    info!(file = %file.display(), "Document is valid");
    println!(
        "{}: valid ({} inputs, {} services, {} tests)",
        file.display(),
        document.inputs.len(),
        document.services.len(),
        document.tests.len()
    );
    Ok(ExitCode::from(EXIT_PASS))
}

/// Prints the execution plan of a document
pub fn print_plan(file: &Path, sets: &[String], runtime: ContainerRuntime) -> Result<ExitCode> {
    let plan = match plan_or_exit(file, sets)? {
        Ok(plan) => plan,
        Err(code) => return Ok(code),
    };
    print!("{}", plan.render(runtime.command()));
    Ok(ExitCode::from(EXIT_PASS))
}
