// tests/common/mod.rs
//
// Shared helpers: fake upstream servers, record builders, stub fetchers.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use devrel_aggregator::fetch::SourceFetcher;
use devrel_aggregator::model::{BlogPost, GithubProgram, JobListing, Resource, ResourceKind};

/// Serve `app` on an ephemeral local port; returns `http://127.0.0.1:PORT`.
pub async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("test client")
}

pub fn repo(url: &str, stars: u64) -> GithubProgram {
    GithubProgram {
        name: url.rsplit('/').next().unwrap_or_default().to_string(),
        url: url.to_string(),
        description: format!("about {url}"),
        stars,
        language: Some("Markdown".into()),
        topics: vec!["devrel".into()],
        last_updated: "2024-05-01T00:00:00Z".into(),
        source: "github".into(),
        search_term: None,
        added_at: None,
    }
}

pub fn post(url: &str, score: u32) -> BlogPost {
    BlogPost {
        title: format!("Post {url}"),
        url: url.to_string(),
        source: "feed".into(),
        published_date: "2024-05-01".into(),
        excerpt: "excerpt".into(),
        relevance_score: score,
        added_at: None,
    }
}

pub fn job(company: &str, title: &str, location: &str, date: &str) -> JobListing {
    let mut locations = BTreeSet::new();
    if !location.is_empty() {
        locations.insert(location.to_string());
    }
    JobListing {
        title: title.to_string(),
        company: company.to_string(),
        url: format!("https://jobs.test/{}", title.replace(' ', "-").to_lowercase()),
        description: String::new(),
        locations,
        location: None,
        source: "test".into(),
        date: date.to_string(),
        added_at: None,
    }
}

pub enum Behavior {
    Records(Vec<Resource>),
    Fail,
    Panic,
    Sleep(Duration, Vec<Resource>),
}

/// Fetcher with scripted behavior.
pub struct StubFetcher {
    pub name: String,
    pub kind: ResourceKind,
    pub behavior: Behavior,
}

impl StubFetcher {
    pub fn new(name: &str, kind: ResourceKind, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            kind,
            behavior,
        }
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn fetch_records(&self) -> anyhow::Result<Vec<Resource>> {
        match &self.behavior {
            Behavior::Records(r) => Ok(r.clone()),
            Behavior::Fail => Err(anyhow::anyhow!("scripted failure")),
            Behavior::Panic => panic!("scripted panic in {}", self.name),
            Behavior::Sleep(d, r) => {
                tokio::time::sleep(*d).await;
                Ok(r.clone())
            }
        }
    }
}
