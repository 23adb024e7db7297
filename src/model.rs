//! Resource records, the three-collection bundle, and the identity rules used
//! to recognize "the same" record across fetch cycles.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    GithubPrograms,
    BlogPosts,
    JobListings,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::GithubPrograms,
        ResourceKind::BlogPosts,
        ResourceKind::JobListings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GithubPrograms => "github_programs",
            ResourceKind::BlogPosts => "blog_posts",
            ResourceKind::JobListings => "job_listings",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubProgram {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stars: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default = "default_github_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}

fn default_github_source() -> String {
    "github".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogPost {
    pub title: String,
    // Older documents used `link` for the canonical url.
    #[serde(alias = "link")]
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, alias = "date")]
    pub published_date: String,
    #[serde(default, alias = "description")]
    pub excerpt: String,
    #[serde(default)]
    pub relevance_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListing {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Serialized as a sorted list.
    #[serde(default)]
    pub locations: BTreeSet<String>,
    /// Legacy single-location field; folded into `locations` on load.
    #[serde(default, skip_serializing)]
    pub location: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}

impl JobListing {
    /// Move a legacy `location` value into the `locations` set.
    pub fn fold_legacy_location(&mut self) {
        if let Some(loc) = self.location.take() {
            let loc = loc.trim();
            if !loc.is_empty() {
                self.locations.insert(loc.to_string());
            }
        }
    }

    /// The date used by the retention filter: `date`, falling back to `added_at`.
    pub fn effective_date_str(&self) -> &str {
        if !self.date.trim().is_empty() {
            &self.date
        } else {
            self.added_at.as_deref().unwrap_or("")
        }
    }
}

/// One fetched record, tagged by the collection it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Github(GithubProgram),
    Blog(BlogPost),
    Job(JobListing),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Github(_) => ResourceKind::GithubPrograms,
            Resource::Blog(_) => ResourceKind::BlogPosts,
            Resource::Job(_) => ResourceKind::JobListings,
        }
    }
}

/// Identity key of a record within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Url(String),
    Job { company: String, title: String },
}

impl IdentityKey {
    pub fn is_empty(&self) -> bool {
        match self {
            IdentityKey::Url(u) => u.is_empty(),
            IdentityKey::Job { company, title } => company.is_empty() && title.is_empty(),
        }
    }
}

/// Lowercase and keep only alphanumeric characters.
pub fn normalize_key_part(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Behavior shared by every record type that the merge engine folds together.
pub trait Record: Clone {
    fn identity(&self) -> IdentityKey;
    fn added_at(&self) -> Option<&str>;
    fn set_added_at(&mut self, ts: String);
    /// Merge auxiliary data from a colliding record into `self`.
    /// Returns true if anything changed. Never touches `added_at` or any
    /// non-empty field already on `self`.
    fn absorb(&mut self, other: &Self) -> bool;
}

fn fill_if_empty(dst: &mut String, src: &str) -> bool {
    if dst.trim().is_empty() && !src.trim().is_empty() {
        *dst = src.to_string();
        true
    } else {
        false
    }
}

impl Record for GithubProgram {
    fn identity(&self) -> IdentityKey {
        IdentityKey::Url(self.url.trim().to_string())
    }

    fn added_at(&self) -> Option<&str> {
        self.added_at.as_deref()
    }

    fn set_added_at(&mut self, ts: String) {
        self.added_at = Some(ts);
    }

    fn absorb(&mut self, other: &Self) -> bool {
        let mut changed = fill_if_empty(&mut self.description, &other.description);
        changed |= fill_if_empty(&mut self.last_updated, &other.last_updated);
        if self.language.is_none() && other.language.is_some() {
            self.language = other.language.clone();
            changed = true;
        }
        if self.topics.is_empty() && !other.topics.is_empty() {
            self.topics = other.topics.clone();
            changed = true;
        }
        changed
    }
}

impl Record for BlogPost {
    fn identity(&self) -> IdentityKey {
        IdentityKey::Url(self.url.trim().to_string())
    }

    fn added_at(&self) -> Option<&str> {
        self.added_at.as_deref()
    }

    fn set_added_at(&mut self, ts: String) {
        self.added_at = Some(ts);
    }

    fn absorb(&mut self, other: &Self) -> bool {
        let mut changed = false;
        if other.relevance_score > self.relevance_score {
            self.relevance_score = other.relevance_score;
            changed = true;
        }
        changed |= fill_if_empty(&mut self.excerpt, &other.excerpt);
        changed |= fill_if_empty(&mut self.published_date, &other.published_date);
        changed
    }
}

impl Record for JobListing {
    fn identity(&self) -> IdentityKey {
        IdentityKey::Job {
            company: normalize_key_part(&self.company),
            title: normalize_key_part(&self.title),
        }
    }

    fn added_at(&self) -> Option<&str> {
        self.added_at.as_deref()
    }

    fn set_added_at(&mut self, ts: String) {
        self.added_at = Some(ts);
    }

    fn absorb(&mut self, other: &Self) -> bool {
        let before = self.locations.len();
        self.locations.extend(other.locations.iter().cloned());
        if let Some(loc) = other.location.as_deref().map(str::trim) {
            if !loc.is_empty() {
                self.locations.insert(loc.to_string());
            }
        }
        let mut changed = self.locations.len() != before;
        changed |= fill_if_empty(&mut self.url, &other.url);
        changed |= fill_if_empty(&mut self.description, &other.description);
        changed
    }
}

/// All known aggregated resources, one ordered collection per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceBundle {
    #[serde(default)]
    pub github_programs: Vec<GithubProgram>,
    #[serde(default)]
    pub blog_posts: Vec<BlogPost>,
    #[serde(default)]
    pub job_listings: Vec<JobListing>,
}

impl ResourceBundle {
    pub fn push(&mut self, resource: Resource) {
        match resource {
            Resource::Github(r) => self.github_programs.push(r),
            Resource::Blog(r) => self.blog_posts.push(r),
            Resource::Job(r) => self.job_listings.push(r),
        }
    }

    pub fn extend<I: IntoIterator<Item = Resource>>(&mut self, resources: I) {
        for r in resources {
            self.push(r);
        }
    }

    pub fn len_of(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::GithubPrograms => self.github_programs.len(),
            ResourceKind::BlogPosts => self.blog_posts.len(),
            ResourceKind::JobListings => self.job_listings.len(),
        }
    }

    pub fn total(&self) -> usize {
        ResourceKind::ALL.iter().map(|k| self.len_of(*k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Fold legacy fields of persisted documents into their current shape.
    pub fn normalize_legacy(&mut self) {
        for job in &mut self.job_listings {
            job.fold_legacy_location();
        }
    }
}

/// Parse a timestamp in any of the shapes seen in persisted documents and
/// upstream feeds. Naive values are treated as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Format a timestamp the way `added_at` is persisted.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(company: &str, title: &str) -> JobListing {
        JobListing {
            title: title.into(),
            company: company.into(),
            url: String::new(),
            description: String::new(),
            locations: BTreeSet::new(),
            location: None,
            source: "test".into(),
            date: String::new(),
            added_at: None,
        }
    }

    #[test]
    fn job_identity_ignores_case_and_punctuation() {
        let a = job("Acme, Inc.", "Developer Advocate");
        let b = job("acme inc", "developer-advocate");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn legacy_location_is_folded_and_not_serialized() {
        let raw = r#"{"title":"DevRel","company":"Acme","location":"Berlin"}"#;
        let mut j: JobListing = serde_json::from_str(raw).unwrap();
        j.fold_legacy_location();
        assert!(j.locations.contains("Berlin"));
        let out = serde_json::to_string(&j).unwrap();
        assert!(!out.contains("\"location\""));
        assert!(out.contains("\"locations\":[\"Berlin\"]"));
    }

    #[test]
    fn blog_post_accepts_link_alias() {
        let raw = r#"{"title":"Hello","link":"https://x.test/a","date":"2024-01-02"}"#;
        let p: BlogPost = serde_json::from_str(raw).unwrap();
        assert_eq!(p.url, "https://x.test/a");
        assert_eq!(p.published_date, "2024-01-02");
    }

    #[test]
    fn parse_timestamp_accepts_common_shapes() {
        assert!(parse_timestamp("2024-03-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("2024-03-01 10:00:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("Fri, 01 Mar 2024 10:00:00 +0000").is_some());
        assert!(parse_timestamp("last tuesday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn absorb_never_overwrites_added_at() {
        let mut stored = job("Acme", "DevRel");
        stored.added_at = Some("2024-01-01T00:00:00Z".into());
        stored.locations.insert("Remote".into());
        let mut fresh = job("Acme", "DevRel");
        fresh.added_at = Some("2025-01-01T00:00:00Z".into());
        fresh.locations.insert("NYC".into());

        assert!(stored.absorb(&fresh));
        assert_eq!(stored.added_at.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(
            stored.locations.iter().cloned().collect::<Vec<_>>(),
            vec!["NYC".to_string(), "Remote".to_string()]
        );
    }
}
