//! A "prelude" for users of the `spider-scheduler` crate.
//!
//! Re-exports the types needed to configure, start and watch a crawl.
//!
//! # Example
//!
//! ```
//! use spider_scheduler::prelude::*;
//! ```

pub use crate::{
    // Core structs
    CrawlJob,
    Scheduler,
    SchedulerConfig,
    ChannelArgs,
    PoolArgs,
    // Collaborator traits
    Analyzer,
    Downloader,
    Entity,
    ItemProcessor,
    ParseResponse,
    processor_fn,
    // Data model
    Data,
    Item,
    Request,
    Response,
    // Errors
    CrawlError,
    CrawlerError,
    ErrorKind,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::monitor::{MonitorConfig, RecordLevel, monitor, tracing_record};
