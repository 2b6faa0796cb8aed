//! # Analyzer Module
//!
//! Turns downloaded responses into new requests and scraped items.
//!
//! ## Overview
//!
//! Extraction logic lives in [`ParseResponse`] functions supplied by the caller;
//! an [`Analyzer`] is the pooled worker that runs them against one response.
//! The stock [`PageAnalyzer`] runs every parser in order, concatenates their
//! data and errors, and stamps each discovered request with the response depth
//! plus one, so depth always counts hops from the seed no matter what a parser
//! put there.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use spider_scheduler::analyzer::ParseResponse;
//! use spider_scheduler::model::{Data, Request, Response};
//!
//! let follow_next: ParseResponse = Arc::new(|response: &Response, depth: u32| {
//!     match response.url().join("next") {
//!         Ok(url) => (vec![Data::Request(Request::new(url, depth))], Vec::new()),
//!         Err(e) => (Vec::new(), vec![anyhow::Error::from(e)]),
//!     }
//! });
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::CrawlerError;
use crate::model::{Data, Response};
use crate::pool::{Entity, IdGenerator};

/// Extraction function: `(response, response depth) -> (data, errors)`.
pub type ParseResponse =
    Arc<dyn Fn(&Response, u32) -> (Vec<Data>, Vec<anyhow::Error>) + Send + Sync>;

/// A pooled worker that analyses responses.
#[async_trait]
pub trait Analyzer: Entity {
    async fn analyze(
        &self,
        parsers: &[ParseResponse],
        response: &Response,
    ) -> (Vec<Data>, Vec<CrawlerError>);
}

/// Builds one analyzer per pool slot.
pub type AnalyzerFactory = Arc<dyn Fn() -> Box<dyn Analyzer> + Send + Sync>;

static ANALYZER_IDS: IdGenerator = IdGenerator::new();

/// Default analyzer.
pub struct PageAnalyzer {
    id: u32,
}

impl PageAnalyzer {
    pub fn new() -> Self {
        Self {
            id: ANALYZER_IDS.next_id(),
        }
    }

    pub fn factory() -> AnalyzerFactory {
        Arc::new(|| Box::new(PageAnalyzer::new()) as Box<dyn Analyzer>)
    }
}

impl Default for PageAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity for PageAnalyzer {
    fn id(&self) -> u32 {
        self.id
    }
}

#[async_trait]
impl Analyzer for PageAnalyzer {
    async fn analyze(
        &self,
        parsers: &[ParseResponse],
        response: &Response,
    ) -> (Vec<Data>, Vec<CrawlerError>) {
        if parsers.is_empty() {
            return (
                Vec::new(),
                vec![CrawlerError::Analyze(
                    "the response parser list is empty".to_string(),
                )],
            );
        }

        trace!("Analyzer {} parsing response from {}", self.id, response.url());
        let depth = response.depth();
        let mut data = Vec::new();
        let mut errors = Vec::new();
        for parser in parsers {
            let (parsed, parse_errors) = parser(response, depth);
            data.extend(parsed.into_iter().map(|datum| match datum {
                Data::Request(request) => Data::Request(request.with_depth(depth + 1)),
                item => item,
            }));
            errors.extend(
                parse_errors
                    .into_iter()
                    .map(|e| CrawlerError::Analyze(format!("{:#} (url={})", e, response.url()))),
            );
        }
        (data, errors)
    }
}
