// src/merge.rs
//! Merge engine: folds a freshly fetched bundle into the persisted one.
//!
//! Per collection: existing records go into the identity map first, new
//! records are folded in (insert or absorb), jobs are filtered by retention,
//! and the result is sorted deterministically. `added_at` is stamped once and
//! never rewritten.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::model::{
    format_timestamp, parse_timestamp, BlogPost, GithubProgram, IdentityKey, JobListing, Record,
    ResourceBundle, ResourceKind,
};
use crate::store::ResourceStore;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("merge_runs_total", "Merge-and-persist cycles that completed.");
        describe_counter!(
            "merge_failures_total",
            "Merge cycles abandoned because the store could not be read or written."
        );
        describe_gauge!("merge_collection_size", "Records per collection after the last merge.");
    });
}

#[derive(Debug, Clone, Copy)]
pub struct MergeConfig {
    /// Job listings older than this are dropped.
    pub retention: chrono::Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::days(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    /// Identities not previously stored.
    pub added: usize,
    /// Collisions that changed auxiliary fields.
    pub updated: usize,
    /// Records without a usable identity key.
    pub dropped_invalid: usize,
    /// Job listings past the retention window.
    pub expired: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub github_programs: KindStats,
    pub blog_posts: KindStats,
    pub job_listings: KindStats,
    /// The fetch returned no blog posts and the stored ones were kept as is.
    pub blog_guard: bool,
}

impl MergeStats {
    pub fn get(&self, kind: ResourceKind) -> &KindStats {
        match kind {
            ResourceKind::GithubPrograms => &self.github_programs,
            ResourceKind::BlogPosts => &self.blog_posts,
            ResourceKind::JobListings => &self.job_listings,
        }
    }
}

/// Fold `new` into `existing` by identity. Output order is the map's insertion
/// order; callers sort afterwards.
fn fold<T: Record>(existing: Vec<T>, new: Vec<T>, now: &str, stats: &mut KindStats) -> Vec<T> {
    let mut order: Vec<IdentityKey> = Vec::with_capacity(existing.len() + new.len());
    let mut by_key: HashMap<IdentityKey, T> = HashMap::with_capacity(existing.len() + new.len());

    for mut rec in existing {
        let key = rec.identity();
        if key.is_empty() {
            stats.dropped_invalid += 1;
            continue;
        }
        if rec.added_at().map_or(true, |s| s.trim().is_empty()) {
            rec.set_added_at(now.to_string());
        }
        match by_key.get_mut(&key) {
            Some(stored) => {
                stored.absorb(&rec);
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, rec);
            }
        }
    }

    for mut rec in new {
        let key = rec.identity();
        if key.is_empty() {
            stats.dropped_invalid += 1;
            continue;
        }
        match by_key.get_mut(&key) {
            Some(stored) => {
                if stored.absorb(&rec) {
                    stats.updated += 1;
                }
            }
            None => {
                if rec.added_at().map_or(true, |s| s.trim().is_empty()) {
                    rec.set_added_at(now.to_string());
                }
                stats.added += 1;
                order.push(key.clone());
                by_key.insert(key, rec);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|k| by_key.remove(&k))
        .collect()
}

/// Newer first; unparseable dates sort last.
fn cmp_dates_desc(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_github(items: &mut [GithubProgram]) {
    items.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| a.url.cmp(&b.url)));
}

pub fn sort_blog_posts(items: &mut [BlogPost]) {
    items.sort_by(|a, b| {
        b.relevance_score
            .cmp(&a.relevance_score)
            .then_with(|| {
                cmp_dates_desc(
                    parse_timestamp(&a.published_date),
                    parse_timestamp(&b.published_date),
                )
            })
            .then_with(|| a.url.cmp(&b.url))
    });
}

pub fn sort_jobs(items: &mut [JobListing]) {
    items.sort_by(|a, b| {
        cmp_dates_desc(
            a.added_at.as_deref().and_then(parse_timestamp),
            b.added_at.as_deref().and_then(parse_timestamp),
        )
        .then_with(|| a.identity().cmp(&b.identity()))
    });
}

/// Effective date of a job: `date`, falling back to `added_at` when `date` is
/// empty or unparseable. Retention keeps the job only when neither parses.
fn job_effective_date(job: &JobListing) -> Option<DateTime<Utc>> {
    parse_timestamp(&job.date).or_else(|| job.added_at.as_deref().and_then(parse_timestamp))
}

pub struct MergeEngine {
    store: Arc<dyn ResourceStore>,
    cfg: MergeConfig,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ResourceStore>, cfg: MergeConfig) -> Self {
        Self { store, cfg }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Pure merge at a fixed instant.
    pub fn merge_at(
        &self,
        mut new: ResourceBundle,
        mut existing: ResourceBundle,
        now: DateTime<Utc>,
    ) -> (ResourceBundle, MergeStats) {
        let stamp = format_timestamp(now);
        let mut stats = MergeStats::default();
        new.normalize_legacy();
        existing.normalize_legacy();

        let mut github = fold(
            existing.github_programs,
            new.github_programs,
            &stamp,
            &mut stats.github_programs,
        );
        sort_github(&mut github);

        let blog_posts = if new.blog_posts.is_empty() && !existing.blog_posts.is_empty() {
            stats.blog_guard = true;
            tracing::info!(
                target: "merge",
                kept = existing.blog_posts.len(),
                "no blog posts fetched, keeping stored collection unchanged"
            );
            existing.blog_posts
        } else {
            let mut posts = fold(
                existing.blog_posts,
                new.blog_posts,
                &stamp,
                &mut stats.blog_posts,
            );
            sort_blog_posts(&mut posts);
            posts
        };

        let mut jobs = fold(
            existing.job_listings,
            new.job_listings,
            &stamp,
            &mut stats.job_listings,
        );
        let cutoff = now - self.cfg.retention;
        let before = jobs.len();
        // Unparseable dates are kept.
        jobs.retain(|j| job_effective_date(j).map_or(true, |d| d >= cutoff));
        stats.job_listings.expired = before - jobs.len();
        sort_jobs(&mut jobs);

        stats.github_programs.total = github.len();
        stats.blog_posts.total = blog_posts.len();
        stats.job_listings.total = jobs.len();

        (
            ResourceBundle {
                github_programs: github,
                blog_posts,
                job_listings: jobs,
            },
            stats,
        )
    }

    /// Load, merge, persist. Errors leave the store untouched.
    pub async fn try_update(&self, new: ResourceBundle) -> Result<(ResourceBundle, MergeStats)> {
        let existing = self.store.load().await.context("loading stored bundle")?;
        let (merged, stats) = self.merge_at(new, existing, Utc::now());
        self.store
            .save(&merged)
            .await
            .context("saving merged bundle")?;
        Ok((merged, stats))
    }

    /// Merge-and-persist that never fails: on error the pre-merge bundle is
    /// returned (empty if it could not even be loaded) and nothing is written.
    pub async fn update(&self, new: ResourceBundle) -> ResourceBundle {
        self.update_with_stats(new).await.0
    }

    /// Like [`update`](Self::update), also reporting stats (`None` on failure).
    pub async fn update_with_stats(&self, new: ResourceBundle) -> (ResourceBundle, Option<MergeStats>) {
        ensure_metrics_described();
        let existing = match self.store.load().await {
            Ok(b) => b,
            Err(e) => {
                counter!("merge_failures_total").increment(1);
                tracing::error!(target: "merge", error = ?e, "could not load stored bundle, merge skipped");
                return (ResourceBundle::default(), None);
            }
        };

        let (merged, stats) = self.merge_at(new, existing.clone(), Utc::now());
        if let Err(e) = self.store.save(&merged).await {
            counter!("merge_failures_total").increment(1);
            tracing::error!(target: "merge", error = ?e, "could not persist merged bundle, keeping previous state");
            return (existing, None);
        }

        counter!("merge_runs_total").increment(1);
        for kind in ResourceKind::ALL {
            gauge!("merge_collection_size", "kind" => kind.as_str()).set(merged.len_of(kind) as f64);
        }
        tracing::info!(
            target: "merge",
            github_added = stats.github_programs.added,
            blogs_added = stats.blog_posts.added,
            jobs_added = stats.job_listings.added,
            jobs_updated = stats.job_listings.updated,
            jobs_expired = stats.job_listings.expired,
            blog_guard = stats.blog_guard,
            "merge persisted"
        );
        (merged, Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn engine() -> MergeEngine {
        MergeEngine::new(Arc::new(MemoryStore::new()), MergeConfig::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn repo(url: &str, stars: u64) -> GithubProgram {
        GithubProgram {
            name: url.rsplit('/').next().unwrap_or_default().to_string(),
            url: url.into(),
            description: String::new(),
            stars,
            language: None,
            topics: vec![],
            last_updated: String::new(),
            source: "github".into(),
            search_term: None,
            added_at: None,
        }
    }

    fn post(url: &str, score: u32, date: &str) -> BlogPost {
        BlogPost {
            title: url.into(),
            url: url.into(),
            source: "feed".into(),
            published_date: date.into(),
            excerpt: String::new(),
            relevance_score: score,
            added_at: None,
        }
    }

    #[test]
    fn github_sorted_by_stars_and_deduped() {
        let new = ResourceBundle {
            github_programs: vec![repo("https://g/a", 5), repo("https://g/b", 50), repo("https://g/a", 7)],
            ..Default::default()
        };
        let (out, stats) = engine().merge_at(new, ResourceBundle::default(), now());
        let urls: Vec<_> = out.github_programs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://g/b", "https://g/a"]);
        // Stored star count is not refreshed by a colliding record.
        assert_eq!(out.github_programs[1].stars, 5);
        assert_eq!(stats.github_programs.added, 2);
    }

    #[test]
    fn blog_order_relevance_then_recency_unparseable_last() {
        let new = ResourceBundle {
            blog_posts: vec![
                post("https://b/old", 1, "2024-01-01"),
                post("https://b/junk", 1, "whenever"),
                post("https://b/top", 3, ""),
                post("https://b/new", 1, "Mon, 20 May 2024 08:00:00 +0000"),
            ],
            ..Default::default()
        };
        let (out, _) = engine().merge_at(new, ResourceBundle::default(), now());
        let urls: Vec<_> = out.blog_posts.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b/top", "https://b/new", "https://b/old", "https://b/junk"]);
    }

    #[test]
    fn colliding_blog_keeps_higher_score_and_fills_excerpt() {
        let mut stored = post("https://b/x", 1, "2024-01-01");
        stored.added_at = Some("2024-01-02T00:00:00Z".into());
        let existing = ResourceBundle {
            blog_posts: vec![stored],
            ..Default::default()
        };
        let mut fresh = post("https://b/x", 4, "2024-01-01");
        fresh.excerpt = "now with text".into();
        let new = ResourceBundle {
            blog_posts: vec![fresh],
            ..Default::default()
        };
        let (out, stats) = engine().merge_at(new, existing, now());
        assert_eq!(out.blog_posts.len(), 1);
        assert_eq!(out.blog_posts[0].relevance_score, 4);
        assert_eq!(out.blog_posts[0].excerpt, "now with text");
        assert_eq!(out.blog_posts[0].added_at.as_deref(), Some("2024-01-02T00:00:00Z"));
        assert_eq!(stats.blog_posts.updated, 1);
    }

    #[test]
    fn records_without_identity_are_dropped() {
        let job = JobListing {
            title: " ".into(),
            company: "--".into(),
            url: "https://j/1".into(),
            description: String::new(),
            locations: BTreeSet::new(),
            location: None,
            source: "t".into(),
            date: String::new(),
            added_at: None,
        };
        let new = ResourceBundle {
            github_programs: vec![repo("", 100)],
            job_listings: vec![job],
            ..Default::default()
        };
        let (out, stats) = engine().merge_at(new, ResourceBundle::default(), now());
        assert!(out.github_programs.is_empty());
        assert!(out.job_listings.is_empty());
        assert_eq!(stats.github_programs.dropped_invalid, 1);
        assert_eq!(stats.job_listings.dropped_invalid, 1);
    }

    #[test]
    fn jobs_sorted_newest_first() {
        let mk = |title: &str, added: &str| JobListing {
            title: title.into(),
            company: "Acme".into(),
            url: String::new(),
            description: String::new(),
            locations: BTreeSet::new(),
            location: None,
            source: "t".into(),
            date: String::new(),
            added_at: Some(added.into()),
        };
        let existing = ResourceBundle {
            job_listings: vec![
                mk("DevRel A", "2024-05-01T00:00:00Z"),
                mk("DevRel B", "2024-05-20T00:00:00Z"),
            ],
            ..Default::default()
        };
        let new = ResourceBundle {
            job_listings: vec![JobListing {
                added_at: None,
                ..mk("DevRel C", "")
            }],
            ..Default::default()
        };
        let (out, _) = engine().merge_at(new, existing, now());
        let titles: Vec<_> = out.job_listings.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["DevRel C", "DevRel B", "DevRel A"]);
        assert_eq!(out.job_listings[0].added_at.as_deref(), Some("2024-06-01T12:00:00Z"));
    }
}
