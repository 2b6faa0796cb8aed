//! # Item Pipeline
//!
//! Threads every scraped item through an ordered chain of processors.
//!
//! ## Overview
//!
//! Each processor receives the current item and may hand back a replacement,
//! which becomes the input of the next processor. Returning `Ok(None)` keeps
//! the current item unchanged. Errors from every processor are collected and
//! returned to the caller.
//!
//! In fail-fast mode the first error abandons the remaining processors for
//! that item. The item still counts as processed, since it was handled, just
//! incompletely.
//!
//! ## Counters
//!
//! - **sent**: every call to [`ItemPipeline::send`], valid or not
//! - **accepted**: non-empty items that entered the chain
//! - **processed**: items that left the chain, with or without errors
//! - **processing**: items currently inside the chain

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::CrawlerError;
use crate::model::Item;

/// One step of the item pipeline.
#[async_trait]
pub trait ItemProcessor: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Processes `item`, optionally returning a replacement for it.
    async fn process_item(&self, item: &Item) -> anyhow::Result<Option<Item>>;
}

/// Adapts a plain closure into an [`ItemProcessor`].
pub struct FnProcessor<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F> ItemProcessor for FnProcessor<F>
where
    F: Fn(&Item) -> anyhow::Result<Option<Item>> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_item(&self, item: &Item) -> anyhow::Result<Option<Item>> {
        (self.func)(item)
    }
}

/// Wraps `func` as a named processor.
pub fn processor_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn ItemProcessor>
where
    F: Fn(&Item) -> anyhow::Result<Option<Item>> + Send + Sync + 'static,
{
    Arc::new(FnProcessor {
        name: name.into(),
        func,
    })
}

/// Ordered chain of item processors with progress counters.
pub struct ItemPipeline {
    processors: Vec<Arc<dyn ItemProcessor>>,
    fail_fast: AtomicBool,
    sent: AtomicU64,
    accepted: AtomicU64,
    processed: AtomicU64,
    processing: AtomicU64,
}

impl ItemPipeline {
    pub fn new(processors: Vec<Arc<dyn ItemProcessor>>) -> Self {
        Self {
            processors,
            fail_fast: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            processing: AtomicU64::new(0),
        }
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::SeqCst)
    }

    pub fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::SeqCst);
    }

    /// Sends `item` through every processor and returns the errors raised.
    pub async fn send(&self, item: Item) -> Vec<CrawlerError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if item.is_empty() {
            return vec![CrawlerError::InvalidItem("the item is empty".to_string())];
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);

        let _in_flight = InFlight::enter(self);
        let fail_fast = self.fail_fast();
        let mut errors = Vec::new();
        let mut current = item;

        for (idx, processor) in self.processors.iter().enumerate() {
            trace!(
                "Processing item through '{}' ({} of {})",
                processor.name(),
                idx + 1,
                self.processors.len()
            );
            match processor.process_item(&current).await {
                Ok(Some(next)) => current = next,
                Ok(None) => {}
                Err(e) => {
                    debug!("Item processor '{}' failed: {:#}", processor.name(), e);
                    errors.push(CrawlerError::ItemProcessing {
                        name: processor.name().to_string(),
                        message: format!("{:#}", e),
                    });
                    if fail_fast {
                        break;
                    }
                }
            }
        }
        errors
    }

    /// `[sent, accepted, processed]`.
    pub fn counts(&self) -> [u64; 3] {
        [
            self.sent.load(Ordering::SeqCst),
            self.accepted.load(Ordering::SeqCst),
            self.processed.load(Ordering::SeqCst),
        ]
    }

    /// Items currently inside the chain.
    pub fn processing_number(&self) -> u64 {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> PipelineSummary {
        let [sent, accepted, processed] = self.counts();
        PipelineSummary {
            fail_fast: self.fail_fast(),
            processors: self.processors.len(),
            sent,
            accepted,
            processed,
            processing: self.processing_number(),
        }
    }
}

// Keeps the processing/processed counters right even if a processor panics.
struct InFlight<'a> {
    pipeline: &'a ItemPipeline,
}

impl<'a> InFlight<'a> {
    fn enter(pipeline: &'a ItemPipeline) -> Self {
        pipeline.processing.fetch_add(1, Ordering::SeqCst);
        Self { pipeline }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.pipeline.processing.fetch_sub(1, Ordering::SeqCst);
        self.pipeline.processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Snapshot of an [`ItemPipeline`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PipelineSummary {
    pub fail_fast: bool,
    pub processors: usize,
    pub sent: u64,
    pub accepted: u64,
    pub processed: u64,
    pub processing: u64,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fail fast: {}, processors: {}, sent: {}, accepted: {}, processed: {}, processing: {}",
            self.fail_fast,
            self.processors,
            self.sent,
            self.accepted,
            self.processed,
            self.processing
        )
    }
}
