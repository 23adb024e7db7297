// src/fetch/github.rs
//! GitHub repository search: one request per search term, a per-term star
//! floor, rate-limit aware pauses between terms and bounded exponential
//! backoff. Under a deadline the pauses never outlast it.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::{GithubConfig, SearchTerm};
use crate::fetch::SourceFetcher;
use crate::model::{GithubProgram, Resource, ResourceKind};

const RATE_LIMIT_BUFFER_SECS: u64 = 10;
/// Kept free at the end of a deadline so partial results get handed back.
const BUDGET_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<RepoItem>,
}

#[derive(Debug, Deserialize)]
struct RepoItem {
    name: Option<String>,
    html_url: Option<String>,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    updated_at: Option<String>,
}

/// Quota information from `x-ratelimit-*` response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: Option<u64>,
    /// Unix seconds at which the quota resets.
    pub reset: Option<u64>,
}

impl RateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let num = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        Self {
            remaining: num("x-ratelimit-remaining"),
            reset: num("x-ratelimit-reset"),
        }
    }

    /// How long to wait before the next request, if the quota is nearly gone.
    pub fn wait(&self, min_remaining: u64, now_unix: u64, cap: Duration) -> Option<Duration> {
        let remaining = self.remaining?;
        if remaining >= min_remaining {
            return None;
        }
        let secs = match self.reset {
            Some(reset) => reset.saturating_sub(now_unix) + RATE_LIMIT_BUFFER_SECS,
            None => RATE_LIMIT_BUFFER_SECS,
        };
        Some(Duration::from_secs(secs).min(cap))
    }
}

/// Whether sleeping `pause` from now still ends before `deadline`.
fn fits_before(deadline: Option<Instant>, pause: Duration) -> bool {
    deadline.map_or(true, |d| Instant::now() + pause < d)
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Delay before retry number `attempt` (0-based): base, 2*base, 4*base...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

pub struct GithubFetcher {
    client: reqwest::Client,
    cfg: GithubConfig,
}

impl GithubFetcher {
    pub fn new(client: reqwest::Client, cfg: GithubConfig) -> Self {
        if cfg.token.is_none() {
            tracing::warn!(
                target: "fetch",
                "no GitHub token configured, searches use the anonymous quota"
            );
        }
        Self { client, cfg }
    }

    fn search_url(&self, term: &SearchTerm) -> Result<url::Url> {
        let base = format!(
            "{}/search/repositories",
            self.cfg.api_base.trim_end_matches('/')
        );
        let q = format!("{} in:name,description,readme", term.query);
        let per_page = (self.cfg.per_term_limit * 4).clamp(10, 100).to_string();
        url::Url::parse_with_params(
            &base,
            &[
                ("q", q.as_str()),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
            ],
        )
        .with_context(|| format!("building search url from {base}"))
    }

    fn rate_limit_cap(&self) -> Duration {
        Duration::from_secs(self.cfg.max_rate_limit_wait_secs)
    }

    /// One search with retries. Success hands back the quota headers so the
    /// caller can pause before its next request; nothing sleeps after the
    /// last response. Retry delays that would pass `deadline` end the search.
    async fn search(&self, term: &SearchTerm, deadline: Option<Instant>) -> Result<(SearchResponse, RateLimit)> {
        let url = self.search_url(term)?;
        let base_delay = Duration::from_millis(self.cfg.base_delay_ms);
        let attempts = self.cfg.max_attempts.max(1);
        let mut last_err = anyhow!("no attempt made");

        for attempt in 0..attempts {
            let mut req = self
                .client
                .get(url.clone())
                .header(ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.cfg.token {
                req = req.header(AUTHORIZATION, format!("Bearer {token}"));
            }

            let mut delay = backoff_delay(base_delay, attempt);
            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let rl = RateLimit::from_headers(resp.headers());
                    if status.is_success() {
                        let body: SearchResponse = resp
                            .json()
                            .await
                            .with_context(|| format!("decoding search response for {:?}", term.query))?;
                        return Ok((body, rl));
                    }
                    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                        if let Some(wait) = rl.wait(self.cfg.min_remaining, now_unix(), self.rate_limit_cap()) {
                            delay = wait;
                        }
                        last_err = anyhow!("GitHub search rate limited ({status})");
                    } else if status.is_server_error() {
                        last_err = anyhow!("GitHub search returned {status}");
                    } else {
                        return Err(anyhow!("GitHub search returned {status}, not retrying"));
                    }
                }
                Err(e) => {
                    last_err = anyhow::Error::new(e).context("GitHub search request");
                }
            }

            if attempt + 1 < attempts {
                if !fits_before(deadline, delay) {
                    return Err(last_err.context(format!(
                        "GitHub search for {:?} out of time for another attempt",
                        term.query
                    )));
                }
                counter!("fetch_github_retries_total").increment(1);
                tracing::warn!(
                    target: "fetch",
                    term = %term.query,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_err,
                    "GitHub search failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
        Err(last_err.context(format!("GitHub search for {:?} gave up after {attempts} attempts", term.query)))
    }

    /// Search every term in order. With a deadline, a pause that would run
    /// past it (or a search still in flight close to it) ends the loop and
    /// the repositories gathered so far are returned.
    async fn collect(&self, deadline: Option<Instant>) -> Result<Vec<Resource>> {
        let soft_deadline = deadline.map(|d| d.checked_sub(BUDGET_MARGIN).unwrap_or(d));
        let mut programs: Vec<GithubProgram> = Vec::new();
        let mut attempted = 0usize;
        let mut failures = 0usize;
        let mut last_err = None;
        let mut quota_wait: Option<Duration> = None;

        for (i, term) in self.cfg.terms.iter().enumerate() {
            if i > 0 {
                let pause = quota_wait
                    .take()
                    .unwrap_or_default()
                    .max(Duration::from_millis(self.cfg.term_delay_ms));
                if !fits_before(soft_deadline, pause) {
                    tracing::warn!(
                        target: "fetch",
                        wait_secs = pause.as_secs(),
                        skipped_terms = self.cfg.terms.len() - i,
                        "GitHub pause would overrun the fetch budget, returning partial results"
                    );
                    break;
                }
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }

            attempted += 1;
            let result = match soft_deadline {
                Some(d) => tokio::time::timeout_at(d, self.search(term, Some(d)))
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("GitHub search for {:?} ran out of fetch budget", term.query))),
                None => self.search(term, None).await,
            };
            match result {
                Ok((resp, rl)) => {
                    let accepted = self.accept_items(term, resp.items);
                    tracing::debug!(target: "fetch", term = %term.query, accepted = accepted.len(), "GitHub term done");
                    programs.extend(accepted);
                    quota_wait = rl.wait(self.cfg.min_remaining, now_unix(), self.rate_limit_cap());
                    if let (Some(wait), true) = (quota_wait, i + 1 < self.cfg.terms.len()) {
                        tracing::info!(
                            target: "fetch",
                            remaining = ?rl.remaining,
                            wait_secs = wait.as_secs(),
                            "GitHub quota nearly exhausted, next search waits for reset"
                        );
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(target: "fetch", term = %term.query, error = ?e, "GitHub term skipped");
                    last_err = Some(e);
                }
            }
            if soft_deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
        }

        if failures > 0 && failures == attempted {
            if let Some(e) = last_err {
                return Err(e.context("every GitHub search term failed"));
            }
        }

        let mut seen = HashSet::new();
        programs.retain(|p| seen.insert(p.url.clone()));
        programs.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| a.url.cmp(&b.url)));
        Ok(programs.into_iter().map(Resource::Github).collect())
    }

    fn accept_items(&self, term: &SearchTerm, items: Vec<RepoItem>) -> Vec<GithubProgram> {
        items
            .into_iter()
            .filter(|it| it.stargazers_count >= term.min_stars)
            .filter_map(|it| {
                let name = it.name.filter(|s| !s.trim().is_empty())?;
                let url = it.html_url.filter(|s| !s.trim().is_empty())?;
                Some(GithubProgram {
                    name,
                    url,
                    description: it.description.unwrap_or_default(),
                    stars: it.stargazers_count,
                    language: it.language.filter(|s| !s.is_empty()),
                    topics: it.topics,
                    last_updated: it.updated_at.unwrap_or_default(),
                    source: "github".to_string(),
                    search_term: Some(term.query.clone()),
                    added_at: None,
                })
            })
            .take(self.cfg.per_term_limit)
            .collect()
    }
}

#[async_trait]
impl SourceFetcher for GithubFetcher {
    fn name(&self) -> &str {
        "github"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::GithubPrograms
    }

    async fn fetch_records(&self) -> Result<Vec<Resource>> {
        self.collect(None).await
    }

    async fn fetch_records_until(&self, deadline: Instant) -> Result<Vec<Resource>> {
        self.collect(Some(deadline)).await
    }
}
