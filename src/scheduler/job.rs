//! The collaborators of one crawl run, bundled for [`Scheduler::start`](super::Scheduler::start).

use std::sync::Arc;

use crate::analyzer::{AnalyzerFactory, PageAnalyzer, ParseResponse};
use crate::downloader::{DownloaderFactory, HttpClientFactory, PageDownloader};
use crate::item_pipeline::ItemProcessor;
use crate::model::{Data, Request, Response};

/// Everything a crawl needs besides its [`SchedulerConfig`](crate::config::SchedulerConfig).
pub struct CrawlJob {
    pub(crate) seed: Request,
    pub(crate) downloaders: DownloaderFactory,
    pub(crate) analyzers: AnalyzerFactory,
    pub(crate) parsers: Vec<ParseResponse>,
    pub(crate) processors: Vec<Arc<dyn ItemProcessor>>,
}

impl CrawlJob {
    /// A job crawling from `seed` with page downloaders built from `clients`
    /// and the default analyzer.
    pub fn new(seed: Request, clients: HttpClientFactory) -> Self {
        Self::with_downloaders(seed, PageDownloader::factory(clients))
    }

    /// A job using a custom downloader factory.
    pub fn with_downloaders(seed: Request, downloaders: DownloaderFactory) -> Self {
        Self {
            seed,
            downloaders,
            analyzers: PageAnalyzer::factory(),
            parsers: Vec::new(),
            processors: Vec::new(),
        }
    }

    /// Replaces the analyzer factory.
    pub fn analyzers(mut self, analyzers: AnalyzerFactory) -> Self {
        self.analyzers = analyzers;
        self
    }

    /// Adds a response parser.
    pub fn parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&Response, u32) -> (Vec<Data>, Vec<anyhow::Error>) + Send + Sync + 'static,
    {
        self.parsers.push(Arc::new(parser));
        self
    }

    /// Adds an item processor at the end of the pipeline.
    pub fn processor(mut self, processor: Arc<dyn ItemProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn seed(&self) -> &Request {
        &self.seed
    }
}
