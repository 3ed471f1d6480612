//! Sync pipeline orchestration.
//!
//! Coordinates the full run: authenticate → page through each resource →
//! per item fetch image, map, upsert → report.
//!
//! ```text
//! Idle → Authenticating → Paging → Reporting → Done
//!              │             │
//!              └──── Fatal ◀─┘   (auth failure, protocol violation)
//! ```
//!
//! # Concurrency
//!
//! Pages of a resource are fetched one after another (each token comes from
//! the previous reply). Items are pushed into a bounded channel as soon as
//! their page arrives, and a consumer runs up to `concurrency` items at once
//! with [`StreamExt::buffered`], which yields results in input order. Paging
//! of the next page therefore overlaps image fetches and upserts of the
//! current one, and the report keeps fetch order without re-sorting.
//!
//! # Cancellation
//!
//! A `watch` flag or the run deadline stops new page fetches and new item
//! admission. A page request still in flight (including its retries) is
//! dropped and not reported as a page failure. Items already admitted finish
//! their upsert, so a rerun never sees a half-written record. The report
//! lists admitted items only.
//!
//! # Cycles
//!
//! Pages are tracked by [`PageSource::page_key`], so a `next` link back to
//! any visited page, the first one included, is fatal before it is fetched.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc;
use futures::{future, SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::assets::AssetSource;
use crate::config::Config;
use crate::error::{ErrorKind, SyncError};
use crate::gateway::TargetGateway;
use crate::mapping::{map_item, LinkTable};
use crate::models::{
    external_key, ImageAsset, ImageFetch, ItemOutcome, Page, PageFailure, PageToken,
    PipelineState, RawItem, Resource, RunReport, UpsertOutcome,
};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::rpc::{Credentials, Session};
use crate::source::PageSource;

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Resources to sync, in order.
    pub resources: Vec<Resource>,
    /// Items processed at once within a resource.
    pub concurrency: usize,
    /// Fail an item whose image could not be fetched instead of writing it
    /// without one.
    pub strict_images: bool,
    /// Upper bound on a single image fetch.
    pub asset_timeout: Duration,
    /// Deadline after which no new work is started.
    pub run_timeout: Option<Duration>,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resources: config.pipeline.resources(),
            concurrency: config.pipeline.concurrency,
            strict_images: config.swimg.strict,
            asset_timeout: Duration::from_secs(config.swimg.timeout_secs),
            run_timeout: (config.pipeline.run_timeout_secs > 0)
                .then(|| Duration::from_secs(config.pipeline.run_timeout_secs)),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            resources: Resource::ALL.to_vec(),
            concurrency: 8,
            strict_images: false,
            asset_timeout: Duration::from_secs(10),
            run_timeout: None,
        }
    }
}

/// What the page producer saw for one resource.
#[derive(Debug, Default)]
struct Paging {
    pages: u64,
    /// Items handed to the consumer.
    sent: usize,
    page_failures: Vec<PageFailure>,
    fatal: Option<SyncError>,
    cancelled: bool,
}

pub struct Pipeline {
    source: Arc<dyn PageSource>,
    assets: Arc<dyn AssetSource>,
    gateway: TargetGateway,
    credentials: Credentials,
    options: PipelineOptions,
    cancel: watch::Receiver<bool>,
    progress: Box<dyn SyncProgressReporter>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn PageSource>,
        assets: Arc<dyn AssetSource>,
        gateway: TargetGateway,
        credentials: Credentials,
        options: PipelineOptions,
    ) -> Self {
        let (_never, cancel) = watch::channel(false);
        Self {
            source,
            assets,
            gateway,
            credentials,
            options,
            cancel,
            progress: Box::new(NoProgress),
        }
    }

    /// Stop the run when the watched flag turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run to completion. Never panics on remote failures; everything ends
    /// up in the report.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new();
        let deadline = run_deadline(Instant::now(), self.options.run_timeout);

        self.transition(&mut report, PipelineState::Authenticating);
        let session = match self.gateway.authenticate(&self.credentials).await {
            Ok(session) => session,
            Err(e) => return self.abort(report, e),
        };

        self.transition(&mut report, PipelineState::Paging);
        let mut links = LinkTable::default();

        for &resource in &self.options.resources {
            if self.should_stop(deadline) {
                report.cancelled = true;
                break;
            }

            info!(%resource, model = resource.model(), "syncing resource");
            let (outcomes, paging) = self.sync_resource(resource, &session, &links, deadline).await;

            if resource == Resource::Planets {
                for item in &outcomes {
                    if let Some(id) = item.outcome.target_id() {
                        links.insert_planet(item.source_id.clone(), id);
                    }
                }
                debug!(linked = links.len(), "planet links ready");
            }

            info!(
                %resource,
                pages = paging.pages,
                items = outcomes.len(),
                "resource finished"
            );

            report.cancelled |= paging.cancelled || outcomes.len() < paging.sent;
            report.outcomes.extend(outcomes);
            report.page_failures.extend(paging.page_failures);

            if let Some(err) = paging.fatal {
                return self.abort(report, err);
            }
            if report.cancelled {
                warn!("run cancelled, no further work will be started");
                break;
            }
        }

        self.transition(&mut report, PipelineState::Reporting);
        let counts = report.counts();
        info!(
            total = counts.total,
            created = counts.created,
            updated = counts.updated,
            failed = counts.failed,
            degraded = counts.degraded,
            page_failures = report.page_failures.len(),
            cancelled = report.cancelled,
            "run finished"
        );
        self.transition(&mut report, PipelineState::Done);
        report.finished_at = Some(Utc::now());
        report
    }

    fn transition(&self, report: &mut RunReport, next: PipelineState) {
        debug!(from = ?report.state, to = ?next, "pipeline state");
        report.state = next;
    }

    fn abort(&self, mut report: RunReport, err: SyncError) -> RunReport {
        error!(kind = %err.kind(), error = %err, "run aborted");
        report.fatal_kind = Some(err.kind());
        report.fatal = Some(err.to_string());
        self.transition(&mut report, PipelineState::Fatal);
        report.finished_at = Some(Utc::now());
        report
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        *self.cancel.borrow() || deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the run is cancelled or its deadline passes.
    async fn stopped(&self, deadline: Option<Instant>) {
        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            if cancel.wait_for(|c| *c).await.is_err() {
                // Sender gone without cancelling.
                future::pending::<()>().await;
            }
        };
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = cancelled => {}
            _ = expired => {}
        }
    }

    /// Fetch a page, abandoning the request (and any retries) on cancellation.
    async fn fetch_page(
        &self,
        resource: Resource,
        token: &PageToken,
        deadline: Option<Instant>,
    ) -> crate::error::Result<Page> {
        tokio::select! {
            page = self.source.fetch_page(resource, token) => page,
            _ = self.stopped(deadline) => Err(SyncError::Cancelled),
        }
    }

    /// Page through one resource and process its items, outcomes in fetch order.
    async fn sync_resource(
        &self,
        resource: Resource,
        session: &Session,
        links: &LinkTable,
        deadline: Option<Instant>,
    ) -> (Vec<ItemOutcome>, Paging) {
        let width = self.options.concurrency.max(1);
        let (tx, rx) = mpsc::channel::<RawItem>(width);
        let total = AtomicU64::new(0);
        let done = AtomicU64::new(0);

        let producer = self.fetch_pages(resource, tx, &total, deadline);
        let consumer = rx
            .take_while(|_| future::ready(!self.should_stop(deadline)))
            .map(|item| self.process_item(resource, item, session, links))
            .buffered(width)
            .inspect(|_| {
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                let total = total.load(Ordering::Relaxed);
                self.progress.report(SyncProgressEvent::Processing {
                    resource,
                    n,
                    total: (total > 0).then_some(total),
                });
            })
            .collect::<Vec<_>>();

        let (paging, outcomes) = futures::join!(producer, consumer);
        (outcomes, paging)
    }

    /// Fetch pages sequentially and feed their items to the consumer.
    ///
    /// Stops at the end marker, on a failed page (recorded, not fatal), on a
    /// revisited page (fatal), or when the run is cancelled.
    async fn fetch_pages(
        &self,
        resource: Resource,
        mut tx: mpsc::Sender<RawItem>,
        total: &AtomicU64,
        deadline: Option<Instant>,
    ) -> Paging {
        let mut paging = Paging::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut token = PageToken::Start;

        'pages: loop {
            if self.should_stop(deadline) {
                paging.cancelled = true;
                break;
            }
            if !seen.insert(self.source.page_key(resource, &token)) {
                paging.fatal = Some(SyncError::ProtocolViolation(format!(
                    "{} pagination returned already visited page {}",
                    resource, token
                )));
                break;
            }

            self.progress.report(SyncProgressEvent::Paging {
                resource,
                page: paging.pages + 1,
            });

            let page = match self.fetch_page(resource, &token, deadline).await {
                Ok(page) => page,
                Err(SyncError::Cancelled) => {
                    debug!(%resource, %token, "page fetch abandoned");
                    paging.cancelled = true;
                    break;
                }
                Err(e) if e.is_fatal() => {
                    paging.fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(%resource, %token, error = %e, "page failed, stopping pagination for resource");
                    paging.page_failures.push(PageFailure {
                        resource,
                        token: token.to_string(),
                        message: e.to_string(),
                    });
                    break;
                }
            };
            paging.pages += 1;
            if let Some(count) = page.total {
                total.store(count as u64, Ordering::Relaxed);
            }

            for item in page.items {
                if self.should_stop(deadline) {
                    paging.cancelled = true;
                    break 'pages;
                }
                if tx.send(item).await.is_err() {
                    // Consumer stopped admitting items.
                    paging.cancelled = true;
                    break 'pages;
                }
                paging.sent += 1;
            }

            match page.next {
                Some(next) => token = next,
                None => break,
            }
        }

        paging
    }

    /// Fetch image → map → upsert for one item.
    async fn process_item(
        &self,
        resource: Resource,
        item: RawItem,
        session: &Session,
        links: &LinkTable,
    ) -> ItemOutcome {
        let key = external_key(resource, &item.source_id);
        let mut degraded = None;

        let image = if resource.has_image() {
            debug!(%resource, source_id = %item.source_id, "fetching asset");
            match self.fetch_image(&item.source_id).await {
                Ok(image) => image,
                Err(reason) if self.options.strict_images => {
                    warn!(%resource, source_id = %item.source_id, reason = %reason.message, "image required");
                    return ItemOutcome {
                        resource,
                        source_id: item.source_id,
                        external_key: key,
                        outcome: UpsertOutcome::Failed {
                            kind: reason.kind,
                            message: reason.message,
                        },
                        degraded: None,
                    };
                }
                Err(reason) => {
                    warn!(%resource, source_id = %item.source_id, reason = %reason.message, "continuing without image");
                    degraded = Some(reason.message);
                    None
                }
            }
        } else {
            None
        };

        debug!(%resource, source_id = %item.source_id, "mapping");
        let record = map_item(resource, &item, image.as_ref(), links);

        debug!(%resource, source_id = %item.source_id, key = %record.external_key, "upserting");
        let outcome = self.gateway.upsert(session, &record).await;
        if let UpsertOutcome::Failed { kind, message } = &outcome {
            warn!(%resource, source_id = %item.source_id, %kind, error = %message, "upsert failed");
        }

        ItemOutcome {
            resource,
            source_id: item.source_id,
            external_key: key,
            outcome,
            degraded,
        }
    }

    /// `Ok(None)` for a normal absence; `Err` when the image should have been
    /// there but could not be used.
    async fn fetch_image(&self, identifier: &str) -> Result<Option<ImageAsset>, ImageProblem> {
        let fetched =
            tokio::time::timeout(self.options.asset_timeout, self.assets.fetch_image(identifier))
                .await;
        match fetched {
            Ok(Ok(ImageFetch::Found(asset))) => Ok(Some(asset)),
            Ok(Ok(ImageFetch::Absent)) => Ok(None),
            Ok(Ok(ImageFetch::Degraded(reason))) => Err(ImageProblem {
                kind: ErrorKind::FetchFailed,
                message: reason,
            }),
            Ok(Err(e)) => Err(ImageProblem {
                kind: e.kind(),
                message: e.to_string(),
            }),
            Err(_) => Err(ImageProblem {
                kind: ErrorKind::FetchFailed,
                message: "image fetch timed out".to_string(),
            }),
        }
    }
}

/// `now + timeout`, or no deadline when the sum does not fit in an `Instant`.
fn run_deadline(now: Instant, timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| now.checked_add(t))
}

/// Why an item ended up without its image.
struct ImageProblem {
    kind: ErrorKind,
    message: String,
}
