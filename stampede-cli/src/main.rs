use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use stampede::{
    JsonFileReporter, Reporter, RunConfig, Runner, Scenario, StdoutReporter, load_profile,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod workload;

use cli::Cli;
use workload::{TicketClient, TicketWorkload};

/// Exit status when the run completed but a threshold failed, like k6.
const THRESHOLDS_FAILED: u8 = 99;

/// A profile file: the run itself plus the ticket workload settings.
#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(flatten)]
    run: RunConfig,
    #[serde(default)]
    workload: TicketWorkload,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(THRESHOLDS_FAILED),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every threshold passed.
async fn run(cli: Cli) -> Result<bool> {
    let mut profile: Profile = load_profile(&cli.profile)
        .with_context(|| format!("failed to load profile {}", cli.profile.display()))?;
    cli.apply(&mut profile.run);
    let config = profile.run;

    let runner = Runner::new(config.options().context("invalid profile")?)?;
    let env = config.env(cli.vars());
    info!("Target: {}", env.base_url);

    let client = TicketClient::new(profile.workload)?;
    let scenario = Scenario::builder()
        .name(config.name.clone())
        .action(move |ctx| {
            let client = client.clone();
            async move { client.create(ctx).await }
        })
        .think_time(config.think_time()?)
        .metrics(config.metrics.clone())
        .env(env)
        .build();

    let summary = runner.run(&scenario).await?;

    if !cli.quiet {
        StdoutReporter {
            layout: config.summary.layout.clone(),
        }
        .report(&summary)
        .await?;
    }
    if let Some(path) = cli.summary_export.or(config.summary.export) {
        JsonFileReporter { path }.report(&summary).await?;
    }

    Ok(summary.passed)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stampede::{ExecutionPlan, ThinkTime};

    use super::*;

    fn shipped(name: &str) -> Profile {
        let path = format!("{}/../profiles/{name}", env!("CARGO_MANIFEST_DIR"));
        load_profile(path).unwrap()
    }

    #[test]
    fn load_test_profile() {
        let profile = shipped("load-test.yaml");
        let options = profile.run.options().unwrap();

        assert_eq!(
            options.plan,
            ExecutionPlan::Constant {
                vus: 10,
                duration: Duration::from_secs(120)
            }
        );
        assert_eq!(
            profile.run.think_time().unwrap(),
            ThinkTime::Uniform {
                min: Duration::from_secs(1),
                max: Duration::from_secs(3)
            }
        );
        assert_eq!(options.thresholds.len(), 3);
        assert!(profile.workload.verify_body);
    }

    #[test]
    fn spike_test_profile() {
        let profile = shipped("spike-test.yaml");
        let options = profile.run.options().unwrap();

        assert!(matches!(options.plan, ExecutionPlan::Staged { ref stages } if stages.len() == 3));
        assert_eq!(profile.run.think_time().unwrap(), ThinkTime::None);
        assert_eq!(profile.workload.accept_statuses, vec![201, 503]);
        assert_eq!(profile.workload.max_latency, Some(Duration::from_secs(10)));
    }
}
