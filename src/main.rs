use anyhow::Context;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weekly_issues::{config::AppConfig, github::GitHubClient, report::ReportPaths};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();

    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weekly_issues=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(paths) => {
            println!("Results saved in {}", paths.summary.display());
            println!("Plot saved in {}", paths.chart.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ReportPaths> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    tracing::info!(repo = %config.github_repository, "Generating weekly issue report");

    let client = GitHubClient::new(&config).context("fetch step failed")?;

    weekly_issues::generate_report(&client, &config, chrono::Utc::now()).await
}
