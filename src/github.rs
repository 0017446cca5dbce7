use crate::config::AppConfig;
use crate::error::ReportError;
use crate::fetcher::{IssuePage, IssueSource, RateLimitStatus};
use crate::types::{IssueRecord, IssueState, RepoId};
use chrono::DateTime;
use octocrab::models::issues::Issue;
use octocrab::Octocrab;

pub struct GitHubClient {
    octocrab: Octocrab,
}

impl GitHubClient {
    /// Builds an authenticated client. A missing or blank token is an auth failure.
    pub fn new(config: &AppConfig) -> Result<Self, ReportError> {
        let token = config
            .github_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ReportError::Auth("GITHUB_TOKEN is not set".to_string()))?;

        let timeout = config.request_timeout();
        let mut builder = Octocrab::builder()
            .personal_token(token.to_string())
            .set_connect_timeout(Some(timeout))
            .set_read_timeout(Some(timeout));

        if let Some(url) = &config.github_api_url {
            builder = builder.base_uri(url.as_str()).map_err(|e| {
                ReportError::Config(format!("invalid GITHUB_API_URL '{}': {}", url, e))
            })?;
        }

        let octocrab = builder
            .build()
            .map_err(|e| ReportError::Config(format!("failed to build GitHub client: {}", e)))?;

        Ok(Self { octocrab })
    }
}

impl IssueSource for GitHubClient {
    async fn rate_limit(&self) -> Result<Option<RateLimitStatus>, ReportError> {
        let limits = self
            .octocrab
            .ratelimit()
            .get()
            .await
            .map_err(|e| classify_error(e, None))?;

        let core = limits.resources.core;
        let Some(reset_at) = i64::try_from(core.reset)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        else {
            return Ok(None);
        };

        Ok(Some(RateLimitStatus {
            remaining: core.remaining as u64,
            reset_at,
        }))
    }

    async fn fetch_page(
        &self,
        repo: &RepoId,
        page: u32,
        per_page: u8,
    ) -> Result<IssuePage, ReportError> {
        let response = self
            .octocrab
            .issues(&repo.owner, &repo.repo)
            .list()
            .state(octocrab::params::State::All)
            .per_page(per_page)
            .page(page)
            .send()
            .await
            .map_err(|e| classify_error(e, Some(repo)))?;

        let raw_count = response.items.len();
        let has_next = response.next.is_some();

        // The issues endpoint also lists pull requests.
        let records = response
            .items
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(to_record)
            .collect();

        Ok(IssuePage {
            records,
            raw_count,
            has_next,
        })
    }

    async fn forks_count(&self, repo: &RepoId) -> Result<u64, ReportError> {
        let repository = self
            .octocrab
            .repos(&repo.owner, &repo.repo)
            .get()
            .await
            .map_err(|e| classify_error(e, Some(repo)))?;

        Ok(repository.forks_count.map_or(0, u64::from))
    }
}

fn to_record(issue: Issue) -> IssueRecord {
    let state = match issue.state {
        octocrab::models::IssueState::Closed => IssueState::Closed,
        _ => IssueState::Open,
    };

    IssueRecord {
        number: issue.number,
        created_at: issue.created_at,
        closed_at: issue.closed_at,
        state,
    }
}

fn classify_error(err: octocrab::Error, repo: Option<&RepoId>) -> ReportError {
    match &err {
        octocrab::Error::GitHub { source, .. } => {
            classify_status(source.status_code.as_u16(), &source.message, repo)
        }
        _ => ReportError::Network(err.to_string()),
    }
}

/// Maps a GitHub error response onto the report's error kinds.
///
/// GitHub answers primary rate-limit exhaustion with 403 and a "rate limit" message, so
/// 403 is only an auth failure when the message says otherwise.
fn classify_status(status: u16, message: &str, repo: Option<&RepoId>) -> ReportError {
    let rate_limited = message.to_lowercase().contains("rate limit");
    match status {
        429 => ReportError::RateLimit(message.to_string()),
        403 if rate_limited => ReportError::RateLimit(message.to_string()),
        401 | 403 => ReportError::Auth(message.to_string()),
        404 => ReportError::NotFound(
            repo.map_or_else(|| message.to_string(), ToString::to_string),
        ),
        _ => ReportError::Network(format!("GitHub returned HTTP {}: {}", status, message)),
    }
}
