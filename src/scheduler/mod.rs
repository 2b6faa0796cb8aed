//! # Scheduler
//!
//! The orchestrator that wires channels, pools, the request cache, the stop
//! sign and the item pipeline into a running crawl.
//!
//! ## Data flow
//!
//! ```text
//! seed -> request cache -> request channel -> download (pool-limited)
//!      -> response channel -> analyze (pool-limited)
//!      -> { requests -> acceptance check -> request cache,
//!           items    -> item channel -> item pipeline,
//!           errors   -> error channel }
//! ```
//!
//! [`Scheduler::start`] spawns four long-running loops on the current tokio
//! runtime: the feeder, the download dispatcher, the analysis dispatcher and
//! the item consumer. [`Scheduler::stop`] signs the stop sign and closes the
//! channels, the cache and both pools; every loop then winds down on its own
//! and [`Scheduler::join`] waits for them.
//!
//! ## Actor codes
//!
//! Work is attributed to an actor code: `downloader-<id>`, `analyzer-<id>`,
//! `item_pipeline` or `scheduler`. The prefix decides the [`ErrorKind`] of
//! errors raised under that code and the key under which the actor reports to
//! the stop sign.
//!
//! [`ErrorKind`]: crate::error::ErrorKind

mod analyze;
mod context;
mod download;
mod feeder;
mod items;
mod job;
mod summary;

#[cfg(test)]
mod tests;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use kanal::AsyncReceiver;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Span, debug, error, info, info_span, warn};

use crate::config::SchedulerConfig;
use crate::error::{CrawlError, CrawlerError, panic_message};
use crate::model::Request;
use crate::pool::IdGenerator;
use crate::stop_sign::StopSignSummary;

use context::CrawlContext;

pub use job::CrawlJob;
pub use summary::{PoolUsage, SchedSummary};

pub const DOWNLOADER_CODE: &str = "downloader";
pub const ANALYZER_CODE: &str = "analyzer";
pub const ITEM_PIPELINE_CODE: &str = "item_pipeline";
pub const SCHEDULER_CODE: &str = "scheduler";

/// Builds the actor code of one pooled entity, e.g. `downloader-3`.
pub fn actor_code(kind: &str, id: u32) -> String {
    format!("{}-{}", kind, id)
}

static SCHEDULER_IDS: IdGenerator = IdGenerator::new();

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedStatus {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for SchedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedStatus::NotStarted => "not started",
            SchedStatus::Starting => "starting",
            SchedStatus::Running => "running",
            SchedStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct SchedulerInner {
    status: Mutex<SchedStatus>,
    context: RwLock<Option<Arc<CrawlContext>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    span: Span,
}

/// Handle to a crawl scheduler. Clones share the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        let id = SCHEDULER_IDS.next_id();
        Self {
            inner: Arc::new(SchedulerInner {
                status: Mutex::new(SchedStatus::NotStarted),
                context: RwLock::new(None),
                loops: Mutex::new(Vec::new()),
                span: info_span!("scheduler", id),
            }),
        }
    }

    /// Starts crawling from the job's seed request.
    ///
    /// Must be called from within a tokio runtime. Every check runs before
    /// anything is spawned, so a failed start leaves the scheduler in the state
    /// it was in. A stopped scheduler can be started again; each start builds
    /// fresh channels, pools, pipeline, stop sign and seen set.
    ///
    /// The seed is always crawled at depth 0.
    pub fn start(&self, config: SchedulerConfig, job: CrawlJob) -> Result<(), CrawlerError> {
        let _entered = self.inner.span.enter();
        if Handle::try_current().is_err() {
            return Err(CrawlerError::Config(
                "the scheduler must be started from within a tokio runtime".to_string(),
            ));
        }

        let previous = {
            let mut status = self.inner.status.lock();
            match *status {
                SchedStatus::Starting | SchedStatus::Running => {
                    return Err(CrawlerError::AlreadyRunning);
                }
                previous => {
                    *status = SchedStatus::Starting;
                    previous
                }
            }
        };

        match self.launch(config, job) {
            Ok(()) => {
                *self.inner.status.lock() = SchedStatus::Running;
                info!("Scheduler started");
                Ok(())
            }
            Err(e) => {
                *self.inner.status.lock() = previous;
                error!("Scheduler failed to start: {}", e);
                Err(e)
            }
        }
    }

    fn launch(&self, config: SchedulerConfig, job: CrawlJob) -> Result<(), CrawlerError> {
        config.check()?;
        let seed: Request = job.seed().clone().with_depth(0);
        let primary_domain = seed.primary_domain().ok_or_else(|| {
            CrawlerError::InvalidRequest(format!("the seed request has no host: {}", seed.url()))
        })?;
        debug!("Starting with {} (primary domain '{}')", config, primary_domain);

        let built = std::panic::catch_unwind(AssertUnwindSafe(|| {
            CrawlContext::build(config, job, primary_domain)
        }));
        let ctx = match built {
            Ok(result) => Arc::new(result?),
            Err(payload) => {
                return Err(CrawlerError::Panic(format!(
                    "building the crawl components panicked: {}",
                    panic_message(payload)
                )));
            }
        };

        let requests = ctx.channels.request_channel()?;
        let responses = ctx.channels.response_channel()?;
        let items = ctx.channels.item_channel()?;

        // Nothing below can fail.
        for stale in self.inner.loops.lock().drain(..) {
            stale.abort();
        }
        *self.inner.context.write() = Some(Arc::clone(&ctx));

        let span = self.inner.span.clone();
        let loops = vec![
            download::spawn_download_loop(Arc::clone(&ctx), requests.clone(), span.clone()),
            analyze::spawn_analyze_loop(Arc::clone(&ctx), responses, span.clone()),
            items::spawn_item_loop(Arc::clone(&ctx), items, span.clone()),
            feeder::spawn_feeder(Arc::clone(&ctx), requests, span),
        ];
        *self.inner.loops.lock() = loops;

        ctx.seen_urls.insert(seed.normalized_url());
        ctx.cache.put(seed);
        Ok(())
    }

    /// Stops the crawl. Returns `false` if the scheduler was not running.
    pub fn stop(&self) -> bool {
        let mut status = self.inner.status.lock();
        if *status != SchedStatus::Running {
            return false;
        }
        let _entered = self.inner.span.enter();
        if let Some(ctx) = self.inner.context.read().as_ref() {
            ctx.stop_sign.sign();
            ctx.close();
        }
        *status = SchedStatus::Stopped;
        info!("Scheduler stopped");
        true
    }

    pub fn running(&self) -> bool {
        self.status() == SchedStatus::Running
    }

    pub fn status(&self) -> SchedStatus {
        *self.inner.status.lock()
    }

    /// Receiving end of the error channel, or `None` unless the channels are
    /// initialized.
    pub fn error_chan(&self) -> Option<AsyncReceiver<CrawlError>> {
        let context = self.inner.context.read();
        context
            .as_ref()
            .and_then(|ctx| ctx.channels.error_channel().ok())
            .map(|channel| channel.rx)
    }

    /// Whether no downloader or analyzer is checked out and no item is in the
    /// pipeline.
    ///
    /// Requests waiting in the cache or in a channel are not considered.
    pub fn idle(&self) -> bool {
        match self.inner.context.read().as_ref() {
            Some(ctx) => {
                ctx.downloaders.used() == 0
                    && ctx.analyzers.used() == 0
                    && ctx.pipeline.processing_number() == 0
            }
            None => true,
        }
    }

    /// Takes a snapshot of the scheduler and all of its components.
    pub fn summary(&self, prefix: impl Into<String>) -> SchedSummary {
        let ctx = self.inner.context.read().clone();
        let status = self.status();
        let mut urls: Vec<String> = ctx
            .as_ref()
            .map(|ctx| ctx.seen_urls.iter().map(|url| url.key().clone()).collect())
            .unwrap_or_default();
        urls.sort();

        let pool_usage = |used: u32, total: u32| PoolUsage { used, total };
        SchedSummary {
            prefix: prefix.into(),
            status,
            running: status == SchedStatus::Running,
            config: ctx.as_ref().map(|ctx| ctx.config.clone()),
            channels: ctx.as_ref().map(|ctx| ctx.channels.summary()),
            cache: ctx.as_ref().map(|ctx| ctx.cache.summary()),
            downloader_pool: ctx
                .as_ref()
                .map(|ctx| pool_usage(ctx.downloaders.used(), ctx.downloaders.total()))
                .unwrap_or_default(),
            analyzer_pool: ctx
                .as_ref()
                .map(|ctx| pool_usage(ctx.analyzers.used(), ctx.analyzers.total()))
                .unwrap_or_default(),
            pipeline: ctx.as_ref().map(|ctx| ctx.pipeline.summary()),
            url_count: urls.len(),
            urls,
            stop_sign: ctx
                .as_ref()
                .map(|ctx| ctx.stop_sign.summary())
                .unwrap_or_else(|| StopSignSummary {
                    signed: false,
                    deals: Vec::new(),
                }),
        }
    }

    /// Waits for the long-running loops to finish, aborting them once
    /// `timeout` has passed. Returns `true` if every loop finished in time.
    ///
    /// Call after [`Scheduler::stop`]; the loops only exit once the crawl is
    /// stopped.
    pub async fn join(&self, timeout: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = self.inner.loops.lock().drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let mut loops = JoinSet::new();
        for handle in handles {
            loops.spawn(handle);
        }

        let finished = tokio::time::timeout(timeout, async {
            let mut clean = true;
            while let Some(result) = loops.join_next().await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) | Err(e) => {
                        error!("Scheduler loop failed during shutdown: {}", e);
                        clean = false;
                    }
                }
            }
            clean
        })
        .await;

        match finished {
            Ok(clean) => clean,
            Err(_) => {
                warn!(
                    "Scheduler loops did not finish within {:?}, aborting them",
                    timeout
                );
                for abort in aborts {
                    abort.abort();
                }
                loops.abort_all();
                false
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("status", &self.status())
            .field("urls", &self.summary("").url_count)
            .finish()
    }
}
