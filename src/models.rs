//! Core data models used throughout the sync pipeline.
//!
//! These types represent the items, images, records, and outcomes that flow
//! from the source APIs through mapping into the CMS.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// A resource type listed by the structured-data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Planets,
    People,
}

impl Resource {
    /// Sync order. People link to planets, so planets go first.
    pub const ALL: [Resource; 2] = [Resource::Planets, Resource::People];

    /// Path segment under the source API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Resource::Planets => "planets",
            Resource::People => "people",
        }
    }

    /// Target CMS model the resource is upserted into.
    pub fn model(self) -> &'static str {
        match self {
            Resource::Planets => "res.planet",
            Resource::People => "res.partner",
        }
    }

    /// Whether items of this resource get an image from the asset API.
    pub fn has_image(self) -> bool {
        matches!(self, Resource::People)
    }

    pub fn parse(s: &str) -> Option<Resource> {
        match s {
            "planets" => Some(Resource::Planets),
            "people" => Some(Resource::People),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// One entity as returned by the structured-data API.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    /// Stable per-resource id (last path segment of the item `url`).
    pub source_id: String,
    /// Field name → value, exactly as returned.
    pub fields: Map<String, Value>,
}

impl RawItem {
    /// Build from an API object, deriving `source_id` from its `url`.
    ///
    /// Returns `None` when the object has no usable `url`.
    pub fn from_json(fields: Map<String, Value>) -> Option<Self> {
        let source_id = fields
            .get("url")
            .and_then(Value::as_str)
            .and_then(id_from_url)?;
        Some(Self { source_id, fields })
    }
}

/// Extract the trailing id from a resource URL such as
/// `https://swapi.dev/api/planets/12/`.
pub fn id_from_url(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Opaque pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageToken {
    /// The first page of a resource.
    Start,
    /// The `next` link returned by the previous page.
    Next(String),
}

impl std::fmt::Display for PageToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageToken::Start => f.write_str("<start>"),
            PageToken::Next(t) => f.write_str(t),
        }
    }
}

/// One page of items plus the cursor to the following page.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<RawItem>,
    /// `None` marks the last page.
    pub next: Option<PageToken>,
    /// Total item count across all pages, when the API reports it.
    pub total: Option<usize>,
}

/// Binary image content with a content-type hint.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Result of asking the asset API for an item's image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageFetch {
    Found(ImageAsset),
    /// The API has no image for this identifier.
    Absent,
    /// No usable image; the item proceeds without one.
    Degraded(String),
}

/// A record ready to be written to the CMS.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub model: String,
    /// Deterministic key used to find the record on later runs.
    pub external_key: String,
    pub values: Map<String, Value>,
}

/// Deterministic external key for an item.
pub fn external_key(resource: Resource, source_id: &str) -> String {
    format!("swapi:{}:{}", resource.path(), source_id)
}

/// Per-item result of the upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created { id: i64 },
    Updated { id: i64 },
    Failed { kind: ErrorKind, message: String },
}

impl UpsertOutcome {
    pub fn target_id(&self) -> Option<i64> {
        match self {
            UpsertOutcome::Created { id } | UpsertOutcome::Updated { id } => Some(*id),
            UpsertOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UpsertOutcome::Failed { .. })
    }
}

/// Outcome of one item, tagged with where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub resource: Resource,
    pub source_id: String,
    pub external_key: String,
    pub outcome: UpsertOutcome,
    /// Set when the item was written without its image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// A page that could not be fetched. Pagination of that resource stopped there.
#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub resource: Resource,
    pub token: String,
    pub message: String,
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Authenticating,
    Paging,
    Reporting,
    Done,
    Fatal,
}

/// Aggregate counts over a [`RunReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub degraded: usize,
}

/// Everything a run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: PipelineState,
    /// One entry per item that entered per-item processing, in fetch order.
    pub outcomes: Vec<ItemOutcome>,
    pub page_failures: Vec<PageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            outcomes: Vec::new(),
            page_failures: Vec::new(),
            fatal_kind: None,
            fatal: None,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts {
            total: self.outcomes.len(),
            ..Default::default()
        };
        for item in &self.outcomes {
            match item.outcome {
                UpsertOutcome::Created { .. } => counts.created += 1,
                UpsertOutcome::Updated { .. } => counts.updated += 1,
                UpsertOutcome::Failed { .. } => counts.failed += 1,
            }
            if item.degraded.is_some() {
                counts.degraded += 1;
            }
        }
        counts
    }

    /// True when the run finished and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.state == PipelineState::Done
            && self.page_failures.is_empty()
            && self.outcomes.iter().all(|o| !o.outcome.is_failed())
    }

    pub fn outcomes_for(&self, resource: Resource) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(move |o| o.resource == resource)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
