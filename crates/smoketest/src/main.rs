//! Smoketest runner: drives the focus arbiter through its arbitration
//! scenarios with scripted services and reports the outcomes.

mod cases;
mod cli;
mod error;
mod results;

use std::time::Instant;

use clap::Parser;

use crate::{cli::Cli, results::CaseOutcome};

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log.spec());

    let opts = cases::CaseOpts {
        timeout_ms: cli.timeout,
        release_timeout_ms: cli.release_timeout,
    };
    let selection = cli.command.selection();

    let mut outcomes = Vec::new();
    for &(name, run) in cases::CASES {
        if selection.is_some_and(|wanted| wanted != name) {
            continue;
        }
        let start = Instant::now();
        let outcome = match run(&opts) {
            Ok(message) => CaseOutcome {
                name,
                success: true,
                elapsed_ms: start.elapsed().as_millis() as u64,
                message,
            },
            Err(e) => {
                error::print_hints(&e);
                CaseOutcome {
                    name,
                    success: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    message: e.to_string(),
                }
            }
        };
        if !cli.quiet && !cli.json {
            println!("{}", outcome.render());
        }
        outcomes.push(outcome);
    }

    if cli.json {
        match serde_json::to_string_pretty(&outcomes) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to encode outcomes: {e}"),
        }
    } else {
        results::print_summary(&outcomes);
    }
    if outcomes.iter().any(|o| !o.success) {
        std::process::exit(1);
    }
}
