// src/store.rs
//! Persisted resource bundle. One JSON array document per collection; the
//! merge engine is the only writer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::model::{ResourceBundle, ResourceKind};

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Absent collections load as empty; unreadable ones are errors.
    async fn load(&self) -> Result<ResourceBundle>;
    /// Whole-collection overwrite.
    async fn save(&self, bundle: &ResourceBundle) -> Result<()>;
}

pub fn file_name(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::GithubPrograms => "github_results.json",
        ResourceKind::BlogPosts => "blog_results.json",
        ResourceKind::JobListings => "job_results.json",
    }
}

/// `github_results.json`, `blog_results.json` and `job_results.json` in one directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(file_name(kind))
    }

    async fn read_collection<T: DeserializeOwned>(&self, kind: ResourceKind) -> Result<Vec<T>> {
        let path = self.path(kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))
    }
}

#[async_trait]
impl ResourceStore for JsonFileStore {
    async fn load(&self) -> Result<ResourceBundle> {
        let github = self.read_collection(ResourceKind::GithubPrograms).await;
        let blogs = self.read_collection(ResourceKind::BlogPosts).await;
        let jobs = self.read_collection(ResourceKind::JobListings).await;

        // Report every unreadable file, not just the first one.
        for (kind, err) in [
            (ResourceKind::GithubPrograms, github.as_ref().err()),
            (ResourceKind::BlogPosts, blogs.as_ref().err()),
            (ResourceKind::JobListings, jobs.as_ref().err()),
        ] {
            if let Some(e) = err {
                tracing::error!(
                    target: "store",
                    file = %self.path(kind).display(),
                    error = %e,
                    "unreadable collection file, updates are paused until it is repaired or removed"
                );
            }
        }

        let mut bundle = ResourceBundle {
            github_programs: github?,
            blog_posts: blogs?,
            job_listings: jobs?,
        };
        bundle.normalize_legacy();
        tracing::debug!(
            target: "store",
            dir = %self.dir.display(),
            github = bundle.github_programs.len(),
            blogs = bundle.blog_posts.len(),
            jobs = bundle.job_listings.len(),
            "bundle loaded"
        );
        Ok(bundle)
    }

    async fn save(&self, bundle: &ResourceBundle) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating data dir {}", self.dir.display()))?;

        // Serialize everything before touching disk so an encoding error writes nothing.
        let docs = [
            (
                ResourceKind::GithubPrograms,
                serde_json::to_vec_pretty(&bundle.github_programs)?,
            ),
            (
                ResourceKind::BlogPosts,
                serde_json::to_vec_pretty(&bundle.blog_posts)?,
            ),
            (
                ResourceKind::JobListings,
                serde_json::to_vec_pretty(&bundle.job_listings)?,
            ),
        ];
        for (kind, bytes) in docs {
            self.write_atomic(&self.path(kind), &bytes).await?;
        }
        tracing::debug!(target: "store", dir = %self.dir.display(), total = bundle.total(), "bundle saved");
        Ok(())
    }
}

/// In-process store for tests and dry runs. Can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bundle: Mutex<ResourceBundle>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(bundle: ResourceBundle) -> Self {
        Self {
            bundle: Mutex::new(bundle),
            ..Self::default()
        }
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ResourceBundle {
        self.bundle
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn load(&self) -> Result<ResourceBundle> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store: load failure injected"));
        }
        let guard = self
            .bundle
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(guard.clone())
    }

    async fn save(&self, bundle: &ResourceBundle) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store: save failure injected"));
        }
        let mut guard = self
            .bundle
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        *guard = bundle.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
