//! Per-run state shared by the scheduler's loops and tasks.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, trace};

use crate::analyzer::{Analyzer, ParseResponse};
use crate::channel::ChannelManager;
use crate::config::SchedulerConfig;
use crate::downloader::Downloader;
use crate::error::{CrawlError, CrawlerError, ErrorKind};
use crate::item_pipeline::ItemPipeline;
use crate::model::{Item, Request, Response};
use crate::pool::EntityPool;
use crate::request_cache::RequestCache;
use crate::stop_sign::StopSign;

use super::job::CrawlJob;

pub(crate) type DownloaderPool = EntityPool<Box<dyn Downloader>>;
pub(crate) type AnalyzerPool = EntityPool<Box<dyn Analyzer>>;

/// Everything one run of the scheduler works with.
pub(crate) struct CrawlContext {
    pub(crate) config: SchedulerConfig,
    pub(crate) primary_domain: String,
    pub(crate) channels: ChannelManager,
    pub(crate) cache: RequestCache,
    pub(crate) downloaders: Arc<DownloaderPool>,
    pub(crate) analyzers: Arc<AnalyzerPool>,
    pub(crate) pipeline: ItemPipeline,
    pub(crate) parsers: Vec<ParseResponse>,
    pub(crate) stop_sign: Arc<StopSign>,
    pub(crate) seen_urls: Arc<DashSet<String>>,
}

impl CrawlContext {
    /// Builds the channels, pools, pipeline, stop sign and seen set for one
    /// run. Nothing is shared with earlier runs, so tasks left over from a
    /// previous run only ever touch their own, already signed, state.
    ///
    /// The pool factories call into caller code, so this may panic; the
    /// scheduler catches that.
    pub(crate) fn build(
        config: SchedulerConfig,
        job: CrawlJob,
        primary_domain: String,
    ) -> Result<Self, CrawlerError> {
        let CrawlJob {
            seed: _,
            downloaders: downloader_factory,
            analyzers: analyzer_factory,
            parsers,
            processors,
        } = job;

        let channels = ChannelManager::with_args(&config.channels);
        let downloaders = EntityPool::new(config.pools.downloaders, || downloader_factory())
            .map_err(|e| CrawlerError::Config(format!("downloader pool: {}", e)))?;
        let analyzers = EntityPool::new(config.pools.analyzers, || analyzer_factory())
            .map_err(|e| CrawlerError::Config(format!("analyzer pool: {}", e)))?;
        let pipeline = ItemPipeline::new(processors);
        pipeline.set_fail_fast(true);

        Ok(Self {
            config,
            primary_domain,
            channels,
            cache: RequestCache::new(),
            downloaders: Arc::new(downloaders),
            analyzers: Arc::new(analyzers),
            pipeline,
            parsers,
            stop_sign: Arc::new(StopSign::new()),
            seen_urls: Arc::new(DashSet::new()),
        })
    }

    /// Runs the acceptance check on a discovered request and caches it if it
    /// passes. Returns whether the request was cached.
    pub(crate) fn accept_request(&self, request: Request, code: &str) -> bool {
        let url = request.url();
        let Some(domain) = request.primary_domain() else {
            debug!("Ignoring request without a host: {}", url);
            return false;
        };
        if !url.scheme().eq_ignore_ascii_case(&self.config.accepted_scheme) {
            debug!(
                "Ignoring request with scheme '{}', expected '{}': {}",
                url.scheme(),
                self.config.accepted_scheme,
                url
            );
            return false;
        }

        let key = request.normalized_url();
        if self.seen_urls.contains(&key) {
            trace!("Ignoring repeated request: {}", key);
            return false;
        }
        if domain != self.primary_domain {
            debug!(
                "Ignoring request outside primary domain '{}': {}",
                self.primary_domain, url
            );
            return false;
        }
        if request.depth() > self.config.max_depth {
            trace!(
                "Ignoring request deeper than {}: {} (depth {})",
                self.config.max_depth,
                url,
                request.depth()
            );
            return false;
        }
        if self.stop_sign.signed() {
            self.stop_sign.deal(code);
            return false;
        }

        // Another analysis may have claimed the same URL since the check above.
        if !self.seen_urls.insert(key) {
            return false;
        }
        trace!("Caching request {} at depth {}", url, request.depth());
        self.cache.put(request)
    }

    pub(crate) async fn send_response(&self, response: Response, code: &str) -> bool {
        if self.stop_sign.signed() {
            self.stop_sign.deal(code);
            return false;
        }
        let Ok(channel) = self.channels.response_channel() else {
            return false;
        };
        if channel.tx.send(response).await.is_err() {
            debug!("Response channel closed, dropping response from {}", code);
            return false;
        }
        true
    }

    pub(crate) async fn send_item(&self, item: Item, code: &str) -> bool {
        if self.stop_sign.signed() {
            self.stop_sign.deal(code);
            return false;
        }
        let Ok(channel) = self.channels.item_channel() else {
            return false;
        };
        if channel.tx.send(item).await.is_err() {
            debug!("Item channel closed, dropping item from {}", code);
            return false;
        }
        true
    }

    /// Classifies `error` by `code` and delivers it to the error channel.
    ///
    /// Delivery is best effort: after the stop sign is signed the error is
    /// dropped, and the send itself happens on a detached task so a full error
    /// channel never blocks the caller.
    pub(crate) fn send_error(&self, error: CrawlerError, code: &str) -> bool {
        let crawl_error = CrawlError::new(ErrorKind::from_code(code), error.to_string());
        if self.stop_sign.signed() {
            self.stop_sign.deal(code);
            return false;
        }
        let Ok(channel) = self.channels.error_channel() else {
            return false;
        };
        debug!("Reporting error from {}: {}", code, crawl_error);
        tokio::spawn(async move {
            let _ = channel.tx.send(crawl_error).await;
        });
        true
    }

    /// Closes the channels, the cache and both pools.
    pub(crate) fn close(&self) {
        self.channels.close();
        self.cache.close();
        self.downloaders.close();
        self.analyzers.close();
    }
}
