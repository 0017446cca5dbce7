//! Application configuration and environment variable parsing.
//!
//! Every setting comes from the process environment (optionally seeded from a `.env`
//! file). `GITHUB_REPOSITORY` is the only required variable; the token is checked when
//! the GitHub client is built so that a missing credential surfaces as an auth failure.

use crate::fetcher::MAX_PER_PAGE;
use crate::types::RepoId;
use chrono::Weekday;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Repository to report on, in `owner/repo` form.
    #[serde(deserialize_with = "deserialize_repo_id")]
    pub github_repository: RepoId,

    /// GitHub Personal Access Token.
    pub github_token: Option<String>,

    /// Override for the GitHub API base URL (GitHub Enterprise).
    pub github_api_url: Option<String>,

    /// Directory receiving the chart and the dated summary file.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// First day of each weekly bucket, e.g. "monday" or "sun".
    #[serde(
        default = "default_week_start",
        deserialize_with = "deserialize_weekday"
    )]
    pub week_start: Weekday,

    /// Page size requested from the issues endpoint, 1 to 100.
    #[serde(
        default = "default_issues_per_page",
        deserialize_with = "deserialize_per_page"
    )]
    pub issues_per_page: u8,

    /// Hard limit on the number of paginated requests to make to the GitHub API.
    #[serde(default = "default_max_github_api_pages")]
    pub max_github_api_pages: u32,

    /// Retries per page after a rate-limit or network failure.
    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,

    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,

    /// Longest wait for a rate-limit reset before giving up.
    #[serde(default = "default_max_rate_limit_wait_seconds")]
    pub max_rate_limit_wait_seconds: u64,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifact")
}

fn default_week_start() -> Weekday {
    Weekday::Mon
}

fn default_issues_per_page() -> u8 {
    100
}

fn default_max_github_api_pages() -> u32 {
    1000
}

fn default_max_fetch_retries() -> u32 {
    3
}

fn default_retry_backoff_seconds() -> u64 {
    5
}

fn default_max_rate_limit_wait_seconds() -> u64 {
    900
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Configuration with every optional setting at its default.
    pub fn for_repository(github_repository: RepoId) -> Self {
        Self {
            github_repository,
            github_token: None,
            github_api_url: None,
            artifact_dir: default_artifact_dir(),
            week_start: default_week_start(),
            issues_per_page: default_issues_per_page(),
            max_github_api_pages: default_max_github_api_pages(),
            max_fetch_retries: default_max_fetch_retries(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            max_rate_limit_wait_seconds: default_max_rate_limit_wait_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }

    pub fn retry_backoff(&self) -> StdDuration {
        StdDuration::from_secs(self.retry_backoff_seconds)
    }

    pub fn max_rate_limit_wait(&self) -> StdDuration {
        StdDuration::from_secs(self.max_rate_limit_wait_seconds)
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_seconds)
    }
}

fn deserialize_repo_id<'de, D>(deserializer: D) -> Result<RepoId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_weekday<'de, D>(deserializer: D) -> Result<Weekday, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| serde::de::Error::custom(format!("invalid weekday '{s}'")))
}

/// GitHub silently caps larger page sizes, which would end pagination after one page.
fn deserialize_per_page<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: u8 = Deserialize::deserialize(deserializer)?;
    if (1..=MAX_PER_PAGE).contains(&value) {
        Ok(value)
    } else {
        Err(serde::de::Error::custom(format!(
            "ISSUES_PER_PAGE must be between 1 and {MAX_PER_PAGE}, got {value}"
        )))
    }
}
