// src/fetch/boards.rs
//! Job boards: selector-driven HTML card pages (LinkedIn, Lever) and the
//! Greenhouse board JSON API. Every accepted posting passes the classifier.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use crate::classify::JobClassifier;
use crate::fetch::{clean_text, get_text, truncate_chars, SourceFetcher};
use crate::model::{parse_timestamp, JobListing, Resource, ResourceKind};

const DESCRIPTION_MAX_CHARS: usize = 1000;

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// CSS selectors describing one job card layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSelectors {
    pub card: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    /// Element carrying the posting date (`datetime` attribute or text).
    pub date: Option<String>,
}

impl CardSelectors {
    pub fn linkedin() -> Self {
        Self {
            card: "div.base-card".into(),
            title: "h3.base-search-card__title".into(),
            company: "h4.base-search-card__subtitle".into(),
            location: "span.job-search-card__location".into(),
            link: "a.base-card__full-link".into(),
            date: Some("time".into()),
        }
    }

    pub fn lever() -> Self {
        Self {
            card: "div.posting".into(),
            title: "h5".into(),
            company: "div.posting-company".into(),
            location: "span.location".into(),
            link: "a.posting-btn-submit".into(),
            date: None,
        }
    }
}

struct Compiled {
    card: Selector,
    title: Selector,
    company: Selector,
    location: Selector,
    link: Selector,
    date: Option<Selector>,
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("invalid selector {s:?}: {e:?}"))
}

impl Compiled {
    fn new(s: &CardSelectors) -> Result<Self> {
        Ok(Self {
            card: parse_selector(&s.card)?,
            title: parse_selector(&s.title)?,
            company: parse_selector(&s.company)?,
            location: parse_selector(&s.location)?,
            link: parse_selector(&s.link)?,
            date: s.date.as_deref().map(parse_selector).transpose()?,
        })
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    let raw: String = el.text().collect::<Vec<_>>().join(" ");
    clean_text(&raw)
}

fn resolve_url(base: &url::Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Normalize a scraped date to `%Y-%m-%d`, or `None` when unparseable.
fn posting_date(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|dt| dt.format("%Y-%m-%d").to_string())
}

pub struct HtmlBoardFetcher {
    client: reqwest::Client,
    name: String,
    source: String,
    url: String,
    selectors: CardSelectors,
    classifier: Arc<JobClassifier>,
    max_postings: usize,
}

impl HtmlBoardFetcher {
    /// `source` is the board label written on each posting (`linkedin`, `lever`).
    pub fn new(
        client: reqwest::Client,
        source: &str,
        url: &str,
        selectors: CardSelectors,
        classifier: Arc<JobClassifier>,
        max_postings: usize,
    ) -> Result<Self> {
        Compiled::new(&selectors).with_context(|| format!("selectors for {source}"))?;
        Ok(Self {
            client,
            name: format!("{source} {url}"),
            source: source.to_string(),
            url: url.to_string(),
            selectors,
            classifier,
            max_postings,
        })
    }

    /// Extract postings from a board page. Cards without title or link are skipped.
    pub fn parse_cards(&self, html: &str, today: &str) -> Result<Vec<JobListing>> {
        let sel = Compiled::new(&self.selectors)?;
        let base = url::Url::parse(&self.url).with_context(|| format!("board url {}", self.url))?;
        let document = Html::parse_document(html);

        let mut out = Vec::new();
        for card in document.select(&sel.card) {
            let Some(title) = card.select(&sel.title).next().map(element_text) else {
                continue;
            };
            let Some(href) = card
                .select(&sel.link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::trim)
                .filter(|h| !h.is_empty())
            else {
                continue;
            };
            if title.is_empty() {
                continue;
            }
            let company = card
                .select(&sel.company)
                .next()
                .map(element_text)
                .unwrap_or_default();
            let location = card
                .select(&sel.location)
                .next()
                .map(element_text)
                .unwrap_or_default();
            let date = sel
                .date
                .as_ref()
                .and_then(|d| card.select(d).next())
                .and_then(|el| {
                    el.value()
                        .attr("datetime")
                        .map(str::to_string)
                        .or_else(|| Some(element_text(el)))
                })
                .and_then(|raw| posting_date(&raw))
                .unwrap_or_else(|| today.to_string());

            if !self.classifier.is_devrel_job(&title, "", &company) {
                tracing::trace!(target: "fetch", board = %self.source, title = %title, company = %company, "posting rejected by classifier");
                continue;
            }

            let mut locations = BTreeSet::new();
            if !location.is_empty() {
                locations.insert(location);
            }
            out.push(JobListing {
                title,
                company,
                url: resolve_url(&base, href),
                description: String::new(),
                locations,
                location: None,
                source: self.source.clone(),
                date,
                added_at: None,
            });
            if out.len() >= self.max_postings {
                break;
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceFetcher for HtmlBoardFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::JobListings
    }

    async fn fetch_records(&self) -> Result<Vec<Resource>> {
        let body = get_text(&self.client, &self.url).await?;
        let jobs = self.parse_cards(&body, &today())?;
        Ok(jobs.into_iter().map(Resource::Job).collect())
    }
}

#[derive(Debug, Deserialize)]
struct GreenhouseResponse {
    #[serde(default)]
    jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    title: Option<String>,
    content: Option<String>,
    location: Option<GreenhouseLocation>,
    absolute_url: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseLocation {
    name: Option<String>,
}

/// Board token from `.../boards/{token}/jobs`.
pub fn greenhouse_company(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments.find(|s| *s == "boards")?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct GreenhouseFetcher {
    client: reqwest::Client,
    name: String,
    url: String,
    company: String,
    classifier: Arc<JobClassifier>,
    max_postings: usize,
}

impl GreenhouseFetcher {
    pub fn new(
        client: reqwest::Client,
        url: &str,
        classifier: Arc<JobClassifier>,
        max_postings: usize,
    ) -> Self {
        let company = greenhouse_company(url).unwrap_or_default();
        Self {
            client,
            name: format!("greenhouse {url}"),
            url: url.to_string(),
            company,
            classifier,
            max_postings,
        }
    }

    pub fn parse_jobs(&self, body: &str, today: &str) -> Result<Vec<JobListing>> {
        let resp: GreenhouseResponse =
            serde_json::from_str(body).context("parsing greenhouse jobs json")?;

        let out = resp
            .jobs
            .into_iter()
            .filter_map(|job| {
                let title = clean_text(job.title.as_deref().unwrap_or_default());
                let url = job.absolute_url.map(|u| u.trim().to_string()).unwrap_or_default();
                if title.is_empty() || url.is_empty() {
                    return None;
                }
                // Classify on the whole posting; only the stored copy is capped.
                let content = clean_text(job.content.as_deref().unwrap_or_default());
                if !self.classifier.is_devrel_job(&title, &content, &self.company) {
                    return None;
                }
                let description = truncate_chars(&content, DESCRIPTION_MAX_CHARS);
                let locations = job
                    .location
                    .and_then(|l| l.name)
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .into_iter()
                    .collect();
                let date = job
                    .updated_at
                    .as_deref()
                    .and_then(posting_date)
                    .unwrap_or_else(|| today.to_string());
                Some(JobListing {
                    title,
                    company: self.company.clone(),
                    url,
                    description,
                    locations,
                    location: None,
                    source: "greenhouse".to_string(),
                    date,
                    added_at: None,
                })
            })
            .take(self.max_postings)
            .collect();
        Ok(out)
    }
}

#[async_trait]
impl SourceFetcher for GreenhouseFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::JobListings
    }

    async fn fetch_records(&self) -> Result<Vec<Resource>> {
        let body = get_text(&self.client, &self.url).await?;
        let jobs = self.parse_jobs(&body, &today())?;
        Ok(jobs.into_iter().map(Resource::Job).collect())
    }
}
