//! Job Classifier: decides whether a posting is a genuine DevRel role.
//!
//! Order of checks:
//! 1) excluded companies (exact or prefix match) always reject,
//! 2) strict-filtering companies are judged on the title only,
//! 3) everyone else passes on a title keyword or a description keyword.
//!
//! Matching is case-insensitive substring search; no stemming.

use once_cell::sync::Lazy;
use serde::Deserialize;

const EXCLUDED_COMPANIES: &[&str] = &["stripe", "twilio"];

const TITLE_KEYWORDS: &[&str] = &[
    "developer relations",
    "devrel",
    "developer advocate",
    "developer advocacy",
    "technical evangelist",
    "developer evangelist",
    "developer experience",
    "dx engineer",
    "developer education",
    "community manager",
    "api evangelist",
    "community advocate",
    "community evangelist",
    "developer community",
    "developer programs",
    "developer success",
    "developer outreach",
    "developer engagement",
    "developer ecosystem",
    "developer platform",
    "api advocate",
    "platform advocate",
    "product educator",
    "technical community",
    "dev community",
    "dev rel",
    "dev advocate",
    "dx advocate",
    "dx manager",
    "dx lead",
    "devrel lead",
    "devrel manager",
    "developer relations lead",
    "developer relations manager",
    "developer advocate lead",
    "developer advocate manager",
];

const STRICT_COMPANIES: &[&str] = &[
    "stripe",
    "twilio",
    "microsoft",
    "google",
    "amazon",
    "meta",
    "apple",
    "netflix",
    "uber",
    "lyft",
    "airbnb",
    "twitter",
    "linkedin",
    "adobe",
    "salesforce",
    "oracle",
    "ibm",
    "github",
    "gitlab",
    "atlassian",
    "hashicorp",
    "digitalocean",
    "mongodb",
    "elastic",
    "datadog",
    "snowflake",
    "confluent",
    "databricks",
    "new relic",
    "dynatrace",
    "splunk",
    "okta",
    "auth0",
    "twitch",
    "roblox",
    "unity",
    "epic games",
    "ea",
    "activision",
    "ubisoft",
];

const DESCRIPTION_KEYWORDS: &[&str] = &[
    "developer community",
    "developer ecosystem",
    "api documentation",
    "technical content",
    "developer education",
    "developer experience",
    "developer engagement",
    "developer success",
    "developer outreach",
    "developer advocacy",
    "developer evangelism",
    "devrel",
    "developer platform",
    "developer tools",
    "sdk",
    "api platform",
    "developer portal",
    "developer hub",
    "developer network",
    "developer program",
    "developer relations",
    "developer support",
    "technical community",
    "api strategy",
    "developer strategy",
];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Keyword sets used by the classifier. Every list is matched lowercase.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub excluded_companies: Vec<String>,
    pub strict_companies: Vec<String>,
    pub title_keywords: Vec<String>,
    pub description_keywords: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            excluded_companies: owned(EXCLUDED_COMPANIES),
            strict_companies: owned(STRICT_COMPANIES),
            title_keywords: owned(TITLE_KEYWORDS),
            description_keywords: owned(DESCRIPTION_KEYWORDS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobClassifier {
    excluded: Vec<String>,
    strict: Vec<String>,
    title_kw: Vec<String>,
    desc_kw: Vec<String>,
}

fn lowered(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl JobClassifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self {
            excluded: lowered(cfg.excluded_companies),
            strict: lowered(cfg.strict_companies),
            title_kw: lowered(cfg.title_keywords),
            desc_kw: lowered(cfg.description_keywords),
        }
    }

    pub fn is_devrel_job(&self, title: &str, description: &str, company: &str) -> bool {
        let title = title.to_lowercase();
        let description = description.to_lowercase();
        let company = company.trim().to_lowercase();

        // Exclusion wins over strict filtering even when a company is in both.
        if self
            .excluded
            .iter()
            .any(|ex| company == *ex || company.starts_with(ex.as_str()))
        {
            return false;
        }

        let title_hit = self.title_kw.iter().any(|kw| title.contains(kw.as_str()));
        if self.strict.iter().any(|c| *c == company) {
            return title_hit;
        }

        title_hit
            || (!description.is_empty()
                && self.desc_kw.iter().any(|kw| description.contains(kw.as_str())))
    }
}

impl Default for JobClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

static DEFAULT_CLASSIFIER: Lazy<JobClassifier> = Lazy::new(JobClassifier::default);

/// Classify with the built-in keyword sets.
pub fn is_devrel_job(title: &str, description: &str, company: &str) -> bool {
    DEFAULT_CLASSIFIER.is_devrel_job(title, description, company)
}
