use crate::config::AppConfig;
use crate::error::ReportError;
use crate::types::{IssueRecord, RepoId};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration as StdDuration;

/// Largest page size GitHub honors; bigger requests are served 100 items.
pub const MAX_PER_PAGE: u8 = 100;

/// Below this many remaining requests the fetcher waits for the quota to reset.
pub const RATE_LIMIT_THRESHOLD: u64 = 10;

/// One page of the issue listing.
#[derive(Debug, Clone, Default)]
pub struct IssuePage {
    /// Issues on the page, with pull requests already filtered out.
    pub records: Vec<IssueRecord>,
    /// Number of items the API returned, pull requests included.
    pub raw_count: usize,
    /// Whether the response advertised a `next` link.
    pub has_next: bool,
}

impl IssuePage {
    /// A short, empty, or link-less page ends pagination.
    pub fn is_last(&self, per_page: u8) -> bool {
        self.raw_count == 0 || self.raw_count < usize::from(per_page) || !self.has_next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Where issues come from. Implemented against GitHub by [`crate::github::GitHubClient`].
#[allow(async_fn_in_trait)]
pub trait IssueSource {
    /// Current core API quota, if the source exposes one.
    async fn rate_limit(&self) -> Result<Option<RateLimitStatus>, ReportError>;

    /// Fetches the 1-based `page` of issues in every state.
    async fn fetch_page(
        &self,
        repo: &RepoId,
        page: u32,
        per_page: u8,
    ) -> Result<IssuePage, ReportError>;

    async fn forks_count(&self, repo: &RepoId) -> Result<u64, ReportError>;
}

/// Pagination and retry knobs for [`fetch_all_issues`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub per_page: u8,
    pub max_pages: u32,
    pub max_retries: u32,
    pub retry_backoff: StdDuration,
    pub max_rate_limit_wait: StdDuration,
}

impl From<&AppConfig> for FetchSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            per_page: config.issues_per_page.clamp(1, MAX_PER_PAGE),
            max_pages: config.max_github_api_pages,
            max_retries: config.max_fetch_retries,
            retry_backoff: config.retry_backoff(),
            max_rate_limit_wait: config.max_rate_limit_wait(),
        }
    }
}

/// Retrieves every issue of the repository, one page at a time.
///
/// Pages are requested strictly in order until one signals the end of the listing.
/// Issues seen twice (the listing can shift while it is being paged) are kept once.
/// Reaching `max_pages` before the end is an error rather than a truncated result.
pub async fn fetch_all_issues<S: IssueSource>(
    source: &S,
    repo: &RepoId,
    settings: &FetchSettings,
) -> Result<Vec<IssueRecord>, ReportError> {
    tracing::info!(repo = %repo, "Fetching all issues");

    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for page_num in 1..=settings.max_pages {
        wait_for_rate_limit(source, settings).await?;

        tracing::debug!(repo = %repo, page = page_num, "Requesting issues page");
        let page = fetch_page_with_retry(source, repo, page_num, settings).await?;
        tracing::info!(
            repo = %repo,
            page = page_num,
            count = page.raw_count,
            issues = page.records.len(),
            "Retrieved issues page"
        );

        let is_last = page.is_last(settings.per_page);

        for record in page.records {
            if seen.insert(record.number) {
                issues.push(record);
            } else {
                tracing::warn!(repo = %repo, number = record.number, "Dropping duplicate issue");
            }
        }

        if is_last {
            tracing::info!(repo = %repo, total = issues.len(), "Finished fetching issues");
            return Ok(issues);
        }
    }

    Err(ReportError::PageLimit(settings.max_pages))
}

async fn fetch_page_with_retry<S: IssueSource>(
    source: &S,
    repo: &RepoId,
    page_num: u32,
    settings: &FetchSettings,
) -> Result<IssuePage, ReportError> {
    let mut attempt = 0;
    loop {
        match source.fetch_page(repo, page_num, settings.per_page).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_transient() && attempt < settings.max_retries => {
                attempt += 1;
                tracing::warn!(
                    repo = %repo,
                    page = page_num,
                    attempt,
                    "Failed to fetch issues page, retrying: {}",
                    e
                );
                tokio::time::sleep(settings.retry_backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sleeps until the quota resets when it is nearly exhausted.
///
/// A failed quota check is logged and ignored; the page request that follows reports
/// the real problem.
async fn wait_for_rate_limit<S: IssueSource>(
    source: &S,
    settings: &FetchSettings,
) -> Result<(), ReportError> {
    let status = match source.rate_limit().await {
        Ok(Some(status)) => status,
        Ok(None) => return Ok(()),
        Err(e) => {
            tracing::warn!("Failed to check rate limit: {}", e);
            return Ok(());
        }
    };

    if status.remaining >= RATE_LIMIT_THRESHOLD {
        return Ok(());
    }

    let wait = (status.reset_at - Utc::now()).to_std().unwrap_or_default();
    if wait > settings.max_rate_limit_wait {
        return Err(ReportError::RateLimit(format!(
            "{} requests remaining and the quota resets at {}, later than the allowed wait of {}s",
            status.remaining,
            status.reset_at,
            settings.max_rate_limit_wait.as_secs()
        )));
    }

    if !wait.is_zero() {
        tracing::warn!(
            remaining = status.remaining,
            "Rate limit almost exceeded. Waiting for {:.2} seconds",
            wait.as_secs_f64()
        );
        tokio::time::sleep(wait + StdDuration::from_secs(1)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueState;
    use chrono::{Duration, TimeZone};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeSource {
        pages: Vec<IssuePage>,
        failures: Mutex<VecDeque<ReportError>>,
        rate_limit: Option<RateLimitStatus>,
        requested: Mutex<Vec<u32>>,
    }

    impl FakeSource {
        fn new(pages: Vec<IssuePage>) -> Self {
            Self {
                pages,
                failures: Mutex::new(VecDeque::new()),
                rate_limit: None,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn failing_first(mut self, failures: Vec<ReportError>) -> Self {
            self.failures = Mutex::new(failures.into());
            self
        }

        fn requested(&self) -> Vec<u32> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl IssueSource for FakeSource {
        async fn rate_limit(&self) -> Result<Option<RateLimitStatus>, ReportError> {
            Ok(self.rate_limit)
        }

        async fn fetch_page(
            &self,
            _repo: &RepoId,
            page: u32,
            _per_page: u8,
        ) -> Result<IssuePage, ReportError> {
            self.requested.lock().unwrap().push(page);
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }

        async fn forks_count(&self, _repo: &RepoId) -> Result<u64, ReportError> {
            Ok(0)
        }
    }

    fn repo() -> RepoId {
        "owner/repo".parse().unwrap()
    }

    fn settings(per_page: u8) -> FetchSettings {
        FetchSettings {
            per_page,
            max_pages: 10,
            max_retries: 2,
            retry_backoff: StdDuration::ZERO,
            max_rate_limit_wait: StdDuration::from_secs(60),
        }
    }

    fn record(number: u64) -> IssueRecord {
        IssueRecord {
            number,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            closed_at: None,
            state: IssueState::Open,
        }
    }

    fn page(numbers: &[u64], has_next: bool) -> IssuePage {
        IssuePage {
            records: numbers.iter().copied().map(record).collect(),
            raw_count: numbers.len(),
            has_next,
        }
    }

    #[test]
    fn test_page_is_last() {
        assert!(page(&[], true).is_last(2));
        assert!(page(&[1], true).is_last(2));
        assert!(page(&[1, 2], false).is_last(2));
        assert!(!page(&[1, 2], true).is_last(2));
    }

    #[tokio::test]
    async fn test_fetch_paginates_until_short_page() {
        let source = FakeSource::new(vec![
            page(&[1, 2], true),
            page(&[3, 4], true),
            page(&[5], false),
        ]);

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();

        assert_eq!(issues.len(), 5);
        assert_eq!(source.requested(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_stops_on_empty_page() {
        let source = FakeSource::new(vec![page(&[1, 2], true)]);

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();

        assert_eq!(issues.len(), 2);
        assert_eq!(source.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_short_page_counts_pull_requests() {
        // A full page whose items were mostly pull requests is not the last page.
        let mut first = page(&[1], true);
        first.raw_count = 2;
        let source = FakeSource::new(vec![first, page(&[2], false)]);

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();

        assert_eq!(issues.len(), 2);
        assert_eq!(source.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_drops_duplicates() {
        let source = FakeSource::new(vec![page(&[1, 2], true), page(&[2, 3], false)]);

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();

        let numbers: Vec<u64> = issues.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_fails_at_page_limit() {
        let source = FakeSource::new(vec![page(&[1], true); 20]);
        let mut settings = settings(1);
        settings.max_pages = 3;

        let err = fetch_all_issues(&source, &repo(), &settings).await.unwrap_err();

        assert!(matches!(err, ReportError::PageLimit(3)));
        assert_eq!(source.requested(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_retries_transient_errors() {
        let source = FakeSource::new(vec![page(&[1], false)]).failing_first(vec![
            ReportError::Network("connection reset".to_string()),
            ReportError::RateLimit("secondary rate limit".to_string()),
        ]);

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(source.requested(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_max_retries() {
        let source = FakeSource::new(vec![page(&[1], false)]).failing_first(vec![
            ReportError::Network("1".to_string()),
            ReportError::Network("2".to_string()),
            ReportError::Network("3".to_string()),
        ]);

        let err = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap_err();

        assert!(matches!(err, ReportError::Network(msg) if msg == "3"));
        assert_eq!(source.requested().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_auth_errors() {
        let source = FakeSource::new(vec![page(&[1], false)])
            .failing_first(vec![ReportError::Auth("Bad credentials".to_string())]);

        let err = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap_err();

        assert!(matches!(err, ReportError::Auth(_)));
        assert_eq!(source.requested(), vec![1]);
    }

    #[tokio::test]
    async fn test_fetch_aborts_when_rate_limit_reset_is_too_far() {
        let mut source = FakeSource::new(vec![page(&[1], false)]);
        source.rate_limit = Some(RateLimitStatus {
            remaining: 0,
            reset_at: Utc::now() + Duration::hours(1),
        });

        let err = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap_err();

        assert!(matches!(err, ReportError::RateLimit(_)));
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_proceeds_when_rate_limit_already_reset() {
        let mut source = FakeSource::new(vec![page(&[1], false)]);
        source.rate_limit = Some(RateLimitStatus {
            remaining: 0,
            reset_at: Utc::now() - Duration::minutes(1),
        });

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_waits_for_rate_limit_reset_then_proceeds() {
        let mut source = FakeSource::new(vec![page(&[1], false)]);
        source.rate_limit = Some(RateLimitStatus {
            remaining: 0,
            reset_at: Utc::now() + Duration::seconds(30),
        });
        let started = tokio::time::Instant::now();

        let issues = fetch_all_issues(&source, &repo(), &settings(2)).await.unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(source.requested(), vec![1]);
        assert!(started.elapsed() >= StdDuration::from_secs(29));
    }

    #[test]
    fn test_settings_clamp_page_size_to_github_cap() {
        let mut config = AppConfig::for_repository(repo());
        config.issues_per_page = 150;
        assert_eq!(FetchSettings::from(&config).per_page, MAX_PER_PAGE);

        config.issues_per_page = 0;
        assert_eq!(FetchSettings::from(&config).per_page, 1);
    }

    #[tokio::test]
    async fn test_fetch_oversized_page_setting_still_fetches_everything() {
        // GitHub serves at most 100 items per page whatever was asked for.
        let numbers: Vec<u64> = (1..=250).collect();
        let source = FakeSource::new(vec![
            page(&numbers[..100], true),
            page(&numbers[100..200], true),
            page(&numbers[200..], false),
        ]);
        let mut config = AppConfig::for_repository(repo());
        config.issues_per_page = 150;
        config.retry_backoff_seconds = 0;

        let issues = fetch_all_issues(&source, &repo(), &FetchSettings::from(&config))
            .await
            .unwrap();

        assert_eq!(issues.len(), 250);
        assert_eq!(source.requested(), vec![1, 2, 3]);
    }
}
