// src/pipeline.rs
//! One aggregation cycle = `fetch_all` followed by a merge-and-persist.
//! `Aggregator` owns both halves and lets only one cycle run at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::classify::JobClassifier;
use crate::config::AggregatorConfig;
use crate::fetch::boards::{CardSelectors, GreenhouseFetcher, HtmlBoardFetcher};
use crate::fetch::feeds::FeedFetcher;
use crate::fetch::github::GithubFetcher;
use crate::fetch::{build_http_client, SourceFetcher};
use crate::merge::{MergeConfig, MergeEngine, MergeStats};
use crate::model::ResourceBundle;
use crate::orchestrator::{Orchestrator, OrchestratorConfig, TaskReport, TaskStatus};
use crate::store::{JsonFileStore, ResourceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every source answered and the merge was persisted.
    Success,
    /// Merge persisted, but at least one source contributed nothing.
    Partial,
    /// Store could not be read or written; previous state kept.
    MergeFailed,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub bundle: ResourceBundle,
    pub stats: Option<MergeStats>,
    pub sources: Vec<TaskReport>,
}

pub struct Aggregator {
    orchestrator: Orchestrator,
    engine: MergeEngine,
    timeout_per_source: Duration,
    cycle: Mutex<()>,
}

impl Aggregator {
    pub fn new(orchestrator: Orchestrator, engine: MergeEngine, timeout_per_source: Duration) -> Self {
        Self {
            orchestrator,
            engine,
            timeout_per_source,
            cycle: Mutex::new(()),
        }
    }

    /// Wire real fetchers and the JSON file store from configuration.
    pub fn from_config(cfg: &AggregatorConfig) -> Result<Self> {
        let fetchers = build_fetchers(cfg)?;
        let store: Arc<dyn ResourceStore> = Arc::new(JsonFileStore::new(cfg.data_dir.clone()));
        Ok(Self::new(
            Orchestrator::new(
                fetchers,
                OrchestratorConfig {
                    group_ceiling: cfg.group_ceiling(),
                },
            ),
            MergeEngine::new(
                store,
                MergeConfig {
                    retention: cfg.retention(),
                },
            ),
            cfg.timeout_per_source(),
        ))
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    /// Currently persisted bundle.
    pub async fn current(&self) -> Result<ResourceBundle> {
        self.engine
            .store()
            .load()
            .await
            .context("loading persisted bundle")
    }

    /// Fetch everything, merge, persist. Concurrent callers queue up.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle.lock().await;
        let raw = self.orchestrator.fetch_all(self.timeout_per_source).await;
        let (bundle, stats) = self.engine.update_with_stats(raw.bundle).await;

        let status = match stats {
            None => CycleStatus::MergeFailed,
            Some(_) if raw.reports.iter().all(|r| r.status == TaskStatus::Ok) => CycleStatus::Success,
            Some(_) => CycleStatus::Partial,
        };
        tracing::info!(
            target: "orchestrator",
            status = ?status,
            github = bundle.github_programs.len(),
            blogs = bundle.blog_posts.len(),
            jobs = bundle.job_listings.len(),
            "aggregation cycle finished"
        );
        CycleReport {
            status,
            bundle,
            stats,
            sources: raw.reports,
        }
    }
}

/// GitHub search, every feed source, and every configured job board.
pub fn build_fetchers(cfg: &AggregatorConfig) -> Result<Vec<Arc<dyn SourceFetcher>>> {
    let client = build_http_client(&cfg.http)?;
    let classifier = Arc::new(JobClassifier::new(cfg.classifier.clone()));
    let max_postings = cfg.boards.max_postings_per_board;

    let mut fetchers: Vec<Arc<dyn SourceFetcher>> = Vec::new();
    if !cfg.github.terms.is_empty() {
        fetchers.push(Arc::new(GithubFetcher::new(client.clone(), cfg.github.clone())));
    }
    for source in &cfg.feeds.sources {
        fetchers.push(Arc::new(FeedFetcher::new(client.clone(), source.clone(), &cfg.feeds)));
    }
    for url in &cfg.boards.linkedin {
        fetchers.push(Arc::new(HtmlBoardFetcher::new(
            client.clone(),
            "linkedin",
            url,
            CardSelectors::linkedin(),
            classifier.clone(),
            max_postings,
        )?));
    }
    for url in &cfg.boards.lever {
        fetchers.push(Arc::new(HtmlBoardFetcher::new(
            client.clone(),
            "lever",
            url,
            CardSelectors::lever(),
            classifier.clone(),
            max_postings,
        )?));
    }
    for url in &cfg.boards.greenhouse {
        fetchers.push(Arc::new(GreenhouseFetcher::new(
            client.clone(),
            url,
            classifier.clone(),
            max_postings,
        )));
    }
    Ok(fetchers)
}
