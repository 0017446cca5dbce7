pub mod config;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod report;
pub mod types;
pub mod weekly;

use anyhow::Context;
use chrono::{DateTime, Utc};
use config::AppConfig;
use fetcher::{FetchSettings, IssueSource};
use report::{ReportContext, ReportPaths};
use weekly::WeeklySummary;

/// Runs the whole report: fetch every issue, bucket by week, write both artifacts.
///
/// Errors carry the name of the failing step. Nothing is written unless fetching and
/// aggregation both succeed.
pub async fn generate_report<S: IssueSource>(
    source: &S,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<ReportPaths> {
    let repo = &config.github_repository;

    let issues = fetcher::fetch_all_issues(source, repo, &FetchSettings::from(config))
        .await
        .context("fetch step failed")?;

    let forks_count = match source.forks_count(repo).await {
        Ok(count) => {
            tracing::info!(repo = %repo, forks = count, "Fetched forks count");
            Some(count)
        }
        Err(e) => {
            tracing::warn!(repo = %repo, "Failed to fetch forks count: {}", e);
            None
        }
    };

    let buckets = weekly::aggregate_weekly(&issues, now, config.week_start)
        .context("aggregate step failed")?;
    let summary = WeeklySummary::from_buckets(&buckets);

    tracing::info!(
        repo = %repo,
        weeks = buckets.len(),
        opened = summary.total_opened,
        closed = summary.total_closed,
        open = summary.currently_open,
        "Weekly analysis completed"
    );

    let context = ReportContext {
        repo,
        run_date: now.date_naive(),
        summary,
        forks_count,
    };

    report::write_artifacts(&config.artifact_dir, &buckets, &context)
        .context("render step failed")
}
