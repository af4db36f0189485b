//! Run the built-in lock scenarios against the database named by `PG*`.
//!
//! ```text
//! lock-probe                              # every scenario
//! lock-probe concurrent_index_waits_for_snapshot unique_insert_contention
//! ```
//!
//! One JSON report per scenario goes to stdout; logs go to stderr and
//! follow `RUST_LOG`.

use std::process::ExitCode;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::Parser;
use pg_lock_probe::{BuiltinScenario, Harness};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Provoke and observe PostgreSQL lock contention between sessions
#[derive(Parser, Debug)]
#[command(name = "lock-probe", version, about, long_about = None)]
struct Cli {
    /// Scenarios to run, in order. Every scenario runs when none is named.
    #[arg(value_name = "SCENARIO", value_parser = scenario_parser())]
    scenarios: Vec<BuiltinScenario>,
}

impl Cli {
    fn scenarios(&self) -> Vec<BuiltinScenario> {
        if self.scenarios.is_empty() {
            BuiltinScenario::ALL.to_vec()
        } else {
            self.scenarios.clone()
        }
    }
}

fn scenario_parser() -> impl TypedValueParser<Value = BuiltinScenario> {
    PossibleValuesParser::new(BuiltinScenario::ALL.map(|scenario| scenario.name()))
        .try_map(|name| name.parse::<BuiltinScenario>())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let scenarios = cli.scenarios();

    let harness = match Harness::from_env().await {
        Ok(harness) => harness,
        Err(e) => {
            error!(error = %e, "could not reach the database under test");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = harness.cleanup().await {
        error!(error = %e, "could not clear the database before the first scenario");
        return ExitCode::from(2);
    }

    let mut failed = 0usize;
    for scenario in &scenarios {
        let report = scenario.run(&harness).await;
        if !report.passed {
            failed += 1;
        }
        println!("{}", report.to_json_line());
    }

    info!(total = scenarios.len(), failed, "lock probe finished");
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
