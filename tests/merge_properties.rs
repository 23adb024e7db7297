// tests/merge_properties.rs
//
// Merge engine properties:
// - idempotent merge (fixed point, added_at unchanged)
// - identity uniqueness per collection
// - job location accumulation
// - added_at stability for already stored identities
// - blog preservation guard
// - retention window (59 / 61 days / unparseable, added_at fallback)
// - failure semantics (store untouched, previous bundle returned)

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use common::{job, post, repo};
use devrel_aggregator::merge::{MergeConfig, MergeEngine};
use devrel_aggregator::model::{Record, ResourceBundle};
use devrel_aggregator::store::{MemoryStore, ResourceStore};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn engine_with(store: Arc<MemoryStore>) -> MergeEngine {
    MergeEngine::new(store, MergeConfig::default())
}

fn engine() -> MergeEngine {
    engine_with(Arc::new(MemoryStore::new()))
}

fn days_ago(days: i64) -> String {
    (now() - Duration::days(days)).format("%Y-%m-%d").to_string()
}

fn sample_bundle() -> ResourceBundle {
    ResourceBundle {
        github_programs: vec![
            repo("https://github.com/a/awesome-devrel", 120),
            repo("https://github.com/b/devrel-handbook", 40),
            repo("https://github.com/a/awesome-devrel", 120),
        ],
        blog_posts: vec![post("https://blog.test/1", 2), post("https://blog.test/2", 1)],
        job_listings: vec![
            job("Acme", "Developer Advocate", "Berlin", &days_ago(3)),
            job("ACME", "developer advocate", "Remote", &days_ago(2)),
            job("Smallco", "DevRel Lead", "", &days_ago(10)),
        ],
    }
}

#[test]
fn merge_is_idempotent() {
    let e = engine();
    let (first, _) = e.merge_at(sample_bundle(), ResourceBundle::default(), now());
    let (second, stats) = e.merge_at(sample_bundle(), first.clone(), now());
    assert_eq!(first, second, "second merge of the same bundle must be a fixed point");
    assert_eq!(stats.github_programs.added, 0);
    assert_eq!(stats.job_listings.added, 0);
    assert_eq!(stats.job_listings.updated, 0);

    // Even at a later instant nothing about stored records moves.
    let (third, _) = e.merge_at(sample_bundle(), second.clone(), now() + Duration::hours(5));
    assert_eq!(second, third);
}

#[test]
fn identity_keys_are_unique() {
    let (out, _) = engine().merge_at(sample_bundle(), sample_bundle(), now());

    let gh: HashSet<_> = out.github_programs.iter().map(|r| r.identity()).collect();
    assert_eq!(gh.len(), out.github_programs.len());
    let blogs: HashSet<_> = out.blog_posts.iter().map(|r| r.identity()).collect();
    assert_eq!(blogs.len(), out.blog_posts.len());
    let jobs: HashSet<_> = out.job_listings.iter().map(|r| r.identity()).collect();
    assert_eq!(jobs.len(), out.job_listings.len());

    assert_eq!(out.github_programs.len(), 2);
    assert_eq!(out.job_listings.len(), 2);
}

#[test]
fn job_locations_accumulate_sorted() {
    let existing = ResourceBundle {
        job_listings: vec![job("Acme", "Developer Advocate", "Remote", &days_ago(1))],
        ..Default::default()
    };
    let new = ResourceBundle {
        job_listings: vec![job("Acme", "Developer Advocate", "Berlin", &days_ago(1))],
        ..Default::default()
    };
    let (out, stats) = engine().merge_at(new, existing, now());
    assert_eq!(out.job_listings.len(), 1);
    let locs: Vec<_> = out.job_listings[0].locations.iter().cloned().collect();
    assert_eq!(locs, vec!["Berlin".to_string(), "Remote".to_string()]);
    assert_eq!(stats.job_listings.updated, 1);

    let json = serde_json::to_value(&out.job_listings[0]).unwrap();
    assert_eq!(json["locations"], serde_json::json!(["Berlin", "Remote"]));
}

#[test]
fn added_at_is_never_overwritten() {
    let mut stored = job("Acme", "Developer Advocate", "Remote", &days_ago(1));
    stored.added_at = Some("2024-05-30T08:00:00Z".into());
    let mut stored_repo = repo("https://github.com/a/awesome-devrel", 10);
    stored_repo.added_at = Some("2024-01-01T00:00:00Z".into());
    let existing = ResourceBundle {
        github_programs: vec![stored_repo],
        job_listings: vec![stored],
        ..Default::default()
    };

    let mut incoming = job("acme", "Developer-Advocate", "Paris", &days_ago(0));
    incoming.added_at = Some("2024-06-01T11:00:00Z".into());
    let mut incoming_repo = repo("https://github.com/a/awesome-devrel", 99);
    incoming_repo.added_at = Some("2024-06-01T11:00:00Z".into());
    let new = ResourceBundle {
        github_programs: vec![incoming_repo],
        job_listings: vec![incoming],
        ..Default::default()
    };

    let (out, _) = engine().merge_at(new, existing, now());
    assert_eq!(out.job_listings[0].added_at.as_deref(), Some("2024-05-30T08:00:00Z"));
    assert!(out.job_listings[0].locations.contains("Paris"));
    assert_eq!(out.github_programs[0].added_at.as_deref(), Some("2024-01-01T00:00:00Z"));
}

#[test]
fn new_records_are_stamped_once() {
    let (out, _) = engine().merge_at(sample_bundle(), ResourceBundle::default(), now());
    assert!(out
        .github_programs
        .iter()
        .all(|r| r.added_at.as_deref() == Some("2024-06-01T12:00:00Z")));
    assert!(out.blog_posts.iter().all(|r| r.added_at.is_some()));
    assert!(out.job_listings.iter().all(|r| r.added_at.is_some()));
}

#[tokio::test]
async fn blog_guard_keeps_existing_posts_on_empty_fetch() {
    // Stored order deliberately not the canonical sort order.
    let stored = ResourceBundle {
        blog_posts: vec![post("https://blog.test/low", 1), post("https://blog.test/high", 5)],
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::with_bundle(stored.clone()));
    let e = engine_with(store.clone());

    let new = ResourceBundle {
        github_programs: vec![repo("https://github.com/x/y", 12)],
        ..Default::default()
    };
    let out = e.update(new).await;
    assert_eq!(out.blog_posts, stored.blog_posts, "blog posts must be untouched");
    assert_eq!(store.snapshot().blog_posts, stored.blog_posts);
    assert_eq!(out.github_programs.len(), 1);

    let (_, stats) = e.merge_at(ResourceBundle::default(), stored, now());
    assert!(stats.blog_guard);
}

#[test]
fn retention_window_drops_old_jobs_only() {
    let new = ResourceBundle {
        job_listings: vec![
            job("Acme", "DevRel 61", "", &days_ago(61)),
            job("Acme", "DevRel 59", "", &days_ago(59)),
            job("Acme", "DevRel Unknown", "", "sometime last spring"),
        ],
        ..Default::default()
    };
    let (out, stats) = engine().merge_at(new, ResourceBundle::default(), now());
    let titles: HashSet<_> = out.job_listings.iter().map(|j| j.title.as_str()).collect();
    assert!(!titles.contains("DevRel 61"));
    assert!(titles.contains("DevRel 59"));
    assert!(titles.contains("DevRel Unknown"));
    assert_eq!(stats.job_listings.expired, 1);
}

#[test]
fn retention_uses_added_at_when_date_missing() {
    let mut old = job("Acme", "DevRel Old", "", "");
    old.added_at = Some((now() - Duration::days(90)).to_rfc3339());
    let existing = ResourceBundle {
        job_listings: vec![old],
        ..Default::default()
    };
    let (out, _) = engine().merge_at(ResourceBundle::default(), existing, now());
    assert!(out.job_listings.is_empty());
}

#[test]
fn unparseable_date_falls_back_to_added_at() {
    let mut stale = job("Acme", "DevRel Stale", "", "sometime soon");
    stale.added_at = Some((now() - Duration::days(90)).to_rfc3339());
    let mut undated = job("Acme", "DevRel Undated", "", "sometime soon");
    undated.added_at = Some("not a timestamp".into());
    let existing = ResourceBundle {
        job_listings: vec![stale, undated],
        ..Default::default()
    };
    let (out, _) = engine().merge_at(ResourceBundle::default(), existing, now());
    let titles: Vec<_> = out.job_listings.iter().map(|j| j.title.as_str()).collect();
    assert_eq!(titles, vec!["DevRel Undated"]);
}

#[test]
fn retention_window_is_configurable() {
    let e = MergeEngine::new(
        Arc::new(MemoryStore::new()),
        MergeConfig {
            retention: Duration::days(7),
        },
    );
    let new = ResourceBundle {
        job_listings: vec![job("Acme", "DevRel", "", &days_ago(10))],
        ..Default::default()
    };
    let (out, _) = e.merge_at(new, ResourceBundle::default(), now());
    assert!(out.job_listings.is_empty());
}

#[tokio::test]
async fn save_failure_returns_previous_bundle_and_keeps_store() {
    let stored = ResourceBundle {
        github_programs: vec![repo("https://github.com/old/one", 30)],
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::with_bundle(stored.clone()));
    store.set_fail_saves(true);
    let e = engine_with(store.clone());

    let out = e.update(sample_bundle()).await;
    assert_eq!(out, stored);
    assert_eq!(store.snapshot(), stored);
    assert_eq!(store.save_count(), 0);
    assert!(e.try_update(sample_bundle()).await.is_err());
}

#[tokio::test]
async fn load_failure_returns_empty_and_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.set_fail_loads(true);
    let e = engine_with(store.clone());

    let out = e.update(sample_bundle()).await;
    assert!(out.is_empty());
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn update_persists_merged_bundle() {
    let store = Arc::new(MemoryStore::new());
    let e = engine_with(store.clone());
    let out = e.update(sample_bundle()).await;
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.load().await.unwrap(), out);
    assert_eq!(out.github_programs[0].stars, 120);
}
