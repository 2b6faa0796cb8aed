//! # spider-scheduler
//!
//! Concurrent crawl scheduler: bounded channels, fixed-size worker pools, an
//! unbounded request cache, a cooperative stop sign and a fail-fast item
//! pipeline, wired together by the [`Scheduler`].
//!
//! Network transport, link extraction and item business logic stay outside:
//! they plug in through the [`Downloader`], [`Analyzer`] / [`ParseResponse`]
//! and [`ItemProcessor`] seams.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use spider_scheduler::prelude::*;
//!
//! # async fn run() -> Result<(), CrawlerError> {
//! let seed = Request::parse("http://example.com/", 0)?;
//! let job = CrawlJob::new(seed, Arc::new(reqwest::Client::new))
//!     .parser(|response: &Response, _depth: u32| {
//!         let mut item = Item::new();
//!         item.insert("len".to_string(), response.body().len().into());
//!         (vec![Data::Item(item)], Vec::new())
//!     })
//!     .processor(processor_fn("print", |item| {
//!         println!("{:?}", item);
//!         Ok(None)
//!     }));
//!
//! let scheduler = Scheduler::new();
//! scheduler.start(SchedulerConfig::default(), job)?;
//! monitor(scheduler.clone(), MonitorConfig::default(), tracing_record())
//!     .await
//!     .ok();
//! scheduler.join(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod channel;
pub mod config;
pub mod downloader;
pub mod error;
pub mod item_pipeline;
pub mod model;
pub mod monitor;
pub mod pool;
pub mod prelude;
pub mod request_cache;
pub mod scheduler;
pub mod stop_sign;

pub use analyzer::{Analyzer, PageAnalyzer, ParseResponse};
pub use config::{ChannelArgs, PoolArgs, SchedulerConfig};
pub use downloader::{Downloader, PageDownloader};
pub use error::{CrawlError, CrawlerError, ErrorKind};
pub use item_pipeline::{ItemPipeline, ItemProcessor, processor_fn};
pub use model::{Data, Item, Request, Response};
pub use pool::{Entity, EntityPool};
pub use scheduler::{CrawlJob, SchedSummary, Scheduler};

pub use async_trait::async_trait;
pub use tokio;
