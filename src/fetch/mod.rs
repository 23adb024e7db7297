// src/fetch/mod.rs
pub mod boards;
pub mod feeds;
pub mod github;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use tokio::time::Instant;

use crate::config::HttpConfig;
use crate::model::{Resource, ResourceKind};

/// One upstream source of raw records.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ResourceKind;
    async fn fetch_records(&self) -> Result<Vec<Resource>>;

    /// Like `fetch_records`, but the caller stops waiting at `deadline`.
    /// Fetchers that pause between requests override this to hand back what
    /// they have instead of being cut off empty-handed.
    async fn fetch_records_until(&self, _deadline: Instant) -> Result<Vec<Resource>> {
        self.fetch_records().await
    }
}

/// Settled result of one fetch: errors have already been logged and turned
/// into an empty record list.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<Resource>,
    pub ok: bool,
}

/// Run a fetcher and never let its error escape.
pub async fn fetch_settled(fetcher: &dyn SourceFetcher) -> FetchOutcome {
    settle(fetcher, fetcher.fetch_records().await)
}

/// `fetch_settled` for a caller that gives up at `deadline`.
pub async fn fetch_settled_until(fetcher: &dyn SourceFetcher, deadline: Instant) -> FetchOutcome {
    settle(fetcher, fetcher.fetch_records_until(deadline).await)
}

fn settle(fetcher: &dyn SourceFetcher, result: Result<Vec<Resource>>) -> FetchOutcome {
    ensure_metrics_described();
    match result {
        Ok(records) => {
            counter!("fetch_records_total", "source" => fetcher.name().to_string())
                .increment(records.len() as u64);
            tracing::debug!(
                target: "fetch",
                source = fetcher.name(),
                kind = %fetcher.kind(),
                records = records.len(),
                "fetch ok"
            );
            FetchOutcome { records, ok: true }
        }
        Err(e) => {
            counter!("fetch_failures_total", "source" => fetcher.name().to_string()).increment(1);
            tracing::warn!(
                target: "fetch",
                source = fetcher.name(),
                kind = %fetcher.kind(),
                error = ?e,
                "fetch failed, contributing no records"
            );
            FetchOutcome {
                records: Vec::new(),
                ok: false,
            }
        }
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_records_total", "Records returned by source fetchers.");
        describe_counter!(
            "fetch_failures_total",
            "Fetches that failed and contributed no records."
        );
        describe_histogram!("fetch_task_ms", "Wall time of one fetch task in milliseconds.");
        describe_counter!(
            "fetch_github_retries_total",
            "GitHub search requests retried after a transient failure."
        );
    });
}

/// Shared HTTP client: user agent, connect timeout and whole-request timeout.
pub fn build_http_client(cfg: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()
        .context("building http client")
}

/// GET a url and return the body; any non-2xx status is an error.
pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("GET {url} returned {status}"));
    }
    resp.text()
        .await
        .with_context(|| format!("reading body of {url}"))
}

/// Strip markup from a fragment: decode entities, drop tags, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    // Entities first so that escaped markup (&lt;p&gt;) is stripped too.
    let decoded = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)<[^>]*>").unwrap());
    let out = re_tags.replace_all(&decoded, " ");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Cap at `max` characters, appending an ellipsis when something was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

/// Replace HTML named entities that XML parsers reject.
pub(crate) fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
