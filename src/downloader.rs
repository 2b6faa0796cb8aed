//! Page downloaders: the pooled workers that turn a [`Request`] into a [`Response`].
//!
//! The scheduler only depends on the [`Downloader`] trait. [`PageDownloader`]
//! is the stock implementation, a thin wrapper over a `reqwest` client built by
//! a caller-supplied factory. Timeouts, redirects and TLS are the client's
//! business.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::CrawlerError;
use crate::model::{Request, Response};
use crate::pool::{Entity, IdGenerator};

/// A pooled worker that fetches pages.
#[async_trait]
pub trait Downloader: Entity {
    async fn download(&self, request: &Request) -> Result<Response, CrawlerError>;
}

/// Builds one downloader per pool slot.
pub type DownloaderFactory = Arc<dyn Fn() -> Box<dyn Downloader> + Send + Sync>;

/// Builds the HTTP client each [`PageDownloader`] uses.
pub type HttpClientFactory = Arc<dyn Fn() -> reqwest::Client + Send + Sync>;

static DOWNLOADER_IDS: IdGenerator = IdGenerator::new();

/// Default downloader backed by a `reqwest` client.
pub struct PageDownloader {
    id: u32,
    client: reqwest::Client,
}

impl PageDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            id: DOWNLOADER_IDS.next_id(),
            client,
        }
    }

    /// A pool factory producing page downloaders from `clients`.
    pub fn factory(clients: HttpClientFactory) -> DownloaderFactory {
        Arc::new(move || Box::new(PageDownloader::new(clients())) as Box<dyn Downloader>)
    }
}

impl Entity for PageDownloader {
    fn id(&self) -> u32 {
        self.id
    }
}

#[async_trait]
impl Downloader for PageDownloader {
    async fn download(&self, request: &Request) -> Result<Response, CrawlerError> {
        trace!("Downloader {} fetching {}", self.id, request.url());
        let http_response = self.client.get(request.url().clone()).send().await?;
        let status = http_response.status().as_u16();
        let url = http_response.url().clone();
        let body = http_response.bytes().await?;
        trace!(
            "Downloader {} received {} bytes with status {} from {}",
            self.id,
            body.len(),
            status,
            url
        );
        Ok(Response::new(url, status, body, request.depth()))
    }
}
