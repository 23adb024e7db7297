// src/fetch/feeds.rs
//! RSS 2.0 / Atom blog feeds. Each logical source lists mirror URLs that are
//! tried one at a time; the first one yielding entries wins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::config::{FeedSource, FeedsConfig};
use crate::fetch::{clean_text, get_text, scrub_html_entities_for_xml, truncate_chars, SourceFetcher};
use crate::model::{BlogPost, Resource, ResourceKind};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// `rel="alternate"` (or no rel) is the human-readable page.
    fn page_link(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .and_then(|l| l.href.clone())
    }
}

/// One feed entry, before relevance filtering. Optional fields degrade to "".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: String,
    pub summary: String,
}

/// Parse an RSS 2.0 or Atom document. Entries without title or link are dropped.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let xml_clean = scrub_html_entities_for_xml(xml);

    let raw: Vec<FeedEntry> = match from_str::<Rss>(&xml_clean) {
        Ok(rss) => rss
            .channel
            .items
            .into_iter()
            .map(|it| FeedEntry {
                title: it.title.unwrap_or_default(),
                link: it.link.unwrap_or_default(),
                published: it.pub_date.unwrap_or_default(),
                summary: it.description.unwrap_or_default(),
            })
            .collect(),
        Err(rss_err) => {
            let atom: AtomFeed = from_str(&xml_clean)
                .with_context(|| format!("parsing feed xml (not RSS: {rss_err})"))?;
            atom.entries
                .into_iter()
                .map(|e| {
                    let link = e.page_link().unwrap_or_default();
                    FeedEntry {
                        title: e.title.map(|t| t.value).unwrap_or_default(),
                        link,
                        published: e.published.or(e.updated).unwrap_or_default(),
                        summary: e
                            .summary
                            .or(e.content)
                            .map(|t| t.value)
                            .unwrap_or_default(),
                    }
                })
                .collect()
        }
    };

    Ok(raw
        .into_iter()
        .map(|mut e| {
            e.title = clean_text(&e.title);
            e.link = e.link.trim().to_string();
            e.published = e.published.trim().to_string();
            e
        })
        .filter(|e| !e.title.is_empty() && !e.link.is_empty())
        .collect())
}

/// Number of distinct terms present in `text` (case-insensitive).
pub fn relevance_score(text: &str, terms: &[String]) -> u32 {
    let lower = text.to_lowercase();
    terms
        .iter()
        .filter(|t| !t.is_empty() && lower.contains(t.to_lowercase().as_str()))
        .count() as u32
}

pub struct FeedFetcher {
    client: reqwest::Client,
    source: FeedSource,
    relevance_terms: Vec<String>,
    excerpt_max_chars: usize,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, source: FeedSource, feeds: &FeedsConfig) -> Self {
        Self {
            client,
            source,
            relevance_terms: feeds.relevance_terms.clone(),
            excerpt_max_chars: feeds.excerpt_max_chars,
        }
    }

    fn to_posts(&self, entries: Vec<FeedEntry>) -> Vec<BlogPost> {
        entries
            .into_iter()
            .take(self.source.max_items)
            .filter_map(|e| {
                let excerpt = truncate_chars(&clean_text(&e.summary), self.excerpt_max_chars);
                let score = relevance_score(&format!("{} {}", e.title, excerpt), &self.relevance_terms);
                if !self.source.devrel_specific && score == 0 {
                    return None;
                }
                Some(BlogPost {
                    title: e.title,
                    url: e.link,
                    source: self.source.name.clone(),
                    published_date: e.published,
                    excerpt,
                    relevance_score: score,
                    added_at: None,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    fn name(&self) -> &str {
        &self.source.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::BlogPosts
    }

    async fn fetch_records(&self) -> Result<Vec<Resource>> {
        let mut last_err = None;
        // Sequential on purpose: mirrors of one feed must not race each other.
        for url in &self.source.candidates {
            let entries = match get_text(&self.client, url).await.and_then(|body| parse_feed(&body)) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(target: "fetch", source = %self.source.name, url = %url, error = ?e, "feed candidate failed");
                    last_err = Some(e);
                    continue;
                }
            };
            if entries.is_empty() {
                tracing::debug!(target: "fetch", source = %self.source.name, url = %url, "feed candidate has no entries");
                continue;
            }
            tracing::info!(target: "fetch", source = %self.source.name, url = %url, entries = entries.len(), "feed candidate selected");
            return Ok(self.to_posts(entries).into_iter().map(Resource::Blog).collect());
        }

        match last_err {
            Some(e) => Err(e.context(format!("no working feed for {}", self.source.name))),
            None => Ok(Vec::new()),
        }
    }
}
