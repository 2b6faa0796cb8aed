//! # Error Module
//!
//! Error types shared by every component of the scheduler.
//!
//! Two layers exist:
//!
//! - [`CrawlerError`] is what the library's own operations return (pool misuse,
//!   channel-manager status, configuration problems, failed downloads...).
//! - [`CrawlError`] is what travels on the scheduler's error channel: a
//!   classified `{kind, message}` pair whose kind is derived from the code of
//!   the actor that raised it.

use std::fmt;

use crate::channel::ChannelStatus;

/// Errors produced by the scheduler and its components.
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("entity {0} is not checked out of the pool")]
    DoubleReturn(u32),

    #[error("entity {0} was never issued by this pool")]
    UnknownEntity(u32),

    #[error("channel manager is not ready (status: {0})")]
    NotReady(ChannelStatus),

    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("the scheduler has already been started")]
    AlreadyRunning,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("analysis failed: {0}")]
    Analyze(String),

    #[error("item processor '{name}' failed: {message}")]
    ItemProcessing { name: String, message: String },

    #[error("panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Which part of the crawl an error on the error channel came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Downloader,
    Analyzer,
    ItemProcessor,
    Scheduler,
}

impl ErrorKind {
    /// Classifies an actor code such as `downloader-3` by its prefix.
    pub fn from_code(code: &str) -> Self {
        let prefix = code.split('-').next().unwrap_or_default();
        match prefix {
            crate::scheduler::DOWNLOADER_CODE => ErrorKind::Downloader,
            crate::scheduler::ANALYZER_CODE => ErrorKind::Analyzer,
            crate::scheduler::ITEM_PIPELINE_CODE => ErrorKind::ItemProcessor,
            _ => ErrorKind::Scheduler,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Downloader => "Downloader Error",
            ErrorKind::Analyzer => "Analyzer Error",
            ErrorKind::ItemProcessor => "Item Processor Error",
            ErrorKind::Scheduler => "Scheduler Error",
        };
        f.write_str(name)
    }
}

/// A classified error delivered on the scheduler's error channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Crawler Error: {kind}: {message}")]
pub struct CrawlError {
    kind: ErrorKind,
    message: String,
}

impl CrawlError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
