// src/orchestrator.rs
//! Fan-out over all configured fetchers. Fetchers are grouped by resource
//! kind; each group runs in its own `JoinSet` under a wall-clock ceiling and
//! the three groups run concurrently. A failing, slow or panicking fetcher
//! only ever costs its own records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::fetch::{ensure_metrics_described, fetch_settled_until, FetchOutcome, SourceFetcher};
use crate::model::{Resource, ResourceBundle, ResourceKind};

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Upper bound on the wall time of one resource-kind group.
    pub group_ceiling: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            group_ceiling: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    /// The fetcher reported an error (already logged).
    Failed,
    /// Per-source timeout hit.
    TimedOut,
    Panicked,
    /// Still running when the group ceiling expired; aborted.
    Abandoned,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub kind: ResourceKind,
    pub status: TaskStatus,
    pub records: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Everything one aggregation cycle gathered, plus how each task fared.
#[derive(Debug, Clone, Default)]
pub struct RawBundle {
    pub bundle: ResourceBundle,
    pub reports: Vec<TaskReport>,
}

impl RawBundle {
    pub fn report(&self, name: &str) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.name == name)
    }

    pub fn healthy_sources(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == TaskStatus::Ok)
            .count()
    }
}

pub struct Orchestrator {
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    cfg: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(fetchers: Vec<Arc<dyn SourceFetcher>>, cfg: OrchestratorConfig) -> Self {
        Self { fetchers, cfg }
    }

    pub fn fetchers(&self) -> &[Arc<dyn SourceFetcher>] {
        &self.fetchers
    }

    fn group(&self, kind: ResourceKind) -> Vec<Arc<dyn SourceFetcher>> {
        self.fetchers
            .iter()
            .filter(|f| f.kind() == kind)
            .cloned()
            .collect()
    }

    /// Run every fetcher once. Never fails: gaps show up as missing records
    /// and non-`Ok` task reports.
    pub async fn fetch_all(&self, timeout_per_source: Duration) -> RawBundle {
        ensure_metrics_described();
        let t0 = Instant::now();
        let ceiling = self.cfg.group_ceiling;

        let (github, blogs, jobs) = tokio::join!(
            run_group(ResourceKind::GithubPrograms, self.group(ResourceKind::GithubPrograms), timeout_per_source, ceiling),
            run_group(ResourceKind::BlogPosts, self.group(ResourceKind::BlogPosts), timeout_per_source, ceiling),
            run_group(ResourceKind::JobListings, self.group(ResourceKind::JobListings), timeout_per_source, ceiling),
        );

        let mut raw = RawBundle::default();
        for (records, reports) in [github, blogs, jobs] {
            raw.bundle.extend(records);
            raw.reports.extend(reports);
        }

        tracing::info!(
            target: "orchestrator",
            github = raw.bundle.github_programs.len(),
            blogs = raw.bundle.blog_posts.len(),
            jobs = raw.bundle.job_listings.len(),
            healthy = raw.healthy_sources(),
            tasks = raw.reports.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "fetch cycle complete"
        );
        raw
    }
}

type TaskOutput = (Result<FetchOutcome, tokio::time::error::Elapsed>, Duration);

async fn run_group(
    kind: ResourceKind,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    timeout_per_source: Duration,
    ceiling: Duration,
) -> (Vec<Resource>, Vec<TaskReport>) {
    let started = Instant::now();
    let deadline = started + ceiling;
    let mut set: JoinSet<TaskOutput> = JoinSet::new();
    let mut pending: HashMap<tokio::task::Id, String> = HashMap::new();

    for fetcher in fetchers {
        let name = fetcher.name().to_string();
        let handle = set.spawn(async move {
            let t0 = Instant::now();
            let task_deadline = t0 + timeout_per_source;
            let res = tokio::time::timeout_at(task_deadline, fetch_settled_until(fetcher.as_ref(), task_deadline)).await;
            (res, t0.elapsed())
        });
        pending.insert(handle.id(), name);
    }

    let mut records = Vec::new();
    let mut reports = Vec::with_capacity(pending.len());

    loop {
        match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
            Ok(None) => break,
            Ok(Some(Ok((id, (res, elapsed))))) => {
                let name = pending.remove(&id).unwrap_or_default();
                let (status, got) = match res {
                    Ok(FetchOutcome { records: recs, ok }) => {
                        let n = recs.len();
                        records.extend(recs);
                        (if ok { TaskStatus::Ok } else { TaskStatus::Failed }, n)
                    }
                    Err(_) => {
                        tracing::warn!(
                            target: "orchestrator",
                            source = %name,
                            timeout_ms = timeout_per_source.as_millis() as u64,
                            "fetch timed out"
                        );
                        (TaskStatus::TimedOut, 0)
                    }
                };
                histogram!("fetch_task_ms", "kind" => kind.as_str()).record(elapsed.as_secs_f64() * 1_000.0);
                reports.push(TaskReport {
                    name,
                    kind,
                    status,
                    records: got,
                    elapsed,
                });
            }
            Ok(Some(Err(join_err))) => {
                let name = pending.remove(&join_err.id()).unwrap_or_default();
                tracing::error!(target: "orchestrator", source = %name, error = %join_err, "fetch task panicked");
                reports.push(TaskReport {
                    name,
                    kind,
                    status: TaskStatus::Panicked,
                    records: 0,
                    elapsed: started.elapsed(),
                });
            }
            Err(_) => {
                set.abort_all();
                let mut abandoned: Vec<String> = pending.drain().map(|(_, name)| name).collect();
                abandoned.sort();
                tracing::warn!(
                    target: "orchestrator",
                    kind = %kind,
                    ceiling_ms = ceiling.as_millis() as u64,
                    abandoned = ?abandoned,
                    "group ceiling reached, returning partial results"
                );
                for name in abandoned {
                    reports.push(TaskReport {
                        name,
                        kind,
                        status: TaskStatus::Abandoned,
                        records: 0,
                        elapsed: started.elapsed(),
                    });
                }
                break;
            }
        }
    }

    (records, reports)
}
