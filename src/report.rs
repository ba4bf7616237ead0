//! Console output for classified results.

use crate::classify::{ClassifiedResult, ClassifiedResults, ResultKind};

/// One-line description of a result's outcome.
pub fn describe(result: &ClassifiedResult) -> String {
    match &result.kind {
        ResultKind::Pass => "PASS".to_string(),
        ResultKind::Fail { message } => format!("FAIL: {}", message),
        ResultKind::Crash { signature } => format!("CRASH: {}", signature),
        ResultKind::Unknown { message } => format!("UNKNOWN: {}", message),
    }
}

/// Prints a summary of test results to the console.
pub fn print_summary(results: &ClassifiedResults) {
    println!();
    println!("Test Results:");
    for result in results.iter() {
        let line = format!("  {}: {}", result.name, describe(result));
        if result.is_success() {
            println!("{}", console::style(line).green());
        } else {
            println!("{}", console::style(line).red());
        }
    }
    println!("  Passed:  {}", console::style(results.passed()).green());
    println!("  Failed:  {}", console::style(results.failed()).red());

    println!();
    if results.did_all_pass() {
        println!("{}", console::style("All tests passed!").green().bold());
    } else if results.is_empty() {
        println!(
            "{}",
            console::style("No test results were collected.")
                .red()
                .bold()
        );
    } else {
        println!("{}", console::style("Some tests failed.").red().bold());
    }
}

/// Prints an infrastructure failure, which is not the test's fault.
pub fn print_infra_error(error: &dyn std::fmt::Display) {
    println!();
    println!(
        "{} {}",
        console::style("Infrastructure error:").yellow().bold(),
        error
    );
}
