//! # Data Model
//!
//! The values that flow through the scheduler's channels.
//!
//! - [`Request`]: one page fetch intent, carrying its traversal depth.
//! - [`Response`]: one fetch result; its depth is inherited from the request.
//! - [`Item`]: one extracted record, an ordered field-name to value mapping.
//! - [`Data`]: what an analysis produces, either a new request or an item.

use bytes::Bytes;
use serde_json::{Map, Value};
use url::Url;

use crate::error::CrawlerError;

/// One extracted data record. Field order is preserved.
pub type Item = Map<String, Value>;

/// A request to fetch a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: Url,
    depth: u32,
}

impl Request {
    pub fn new(url: Url, depth: u32) -> Self {
        Self { url, depth }
    }

    /// Parses `url` and builds a request at the given depth.
    pub fn parse(url: &str, depth: u32) -> Result<Self, CrawlerError> {
        Ok(Self::new(Url::parse(url)?, depth))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns the same target at another depth.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// The URL string used for duplicate detection: the fragment is dropped.
    pub fn normalized_url(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }

    /// The host without its port, lower-cased. `None` for host-less URLs.
    pub fn primary_domain(&self) -> Option<String> {
        self.url.host_str().map(|host| host.to_ascii_lowercase())
    }
}

/// The result of downloading a [`Request`].
#[derive(Debug, Clone)]
pub struct Response {
    url: Url,
    status: u16,
    body: Bytes,
    depth: u32,
}

impl Response {
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>, depth: u32) -> Self {
        Self {
            url,
            status,
            body: body.into(),
            depth,
        }
    }

    /// Builds a response for `request`, inheriting its URL and depth.
    pub fn for_request(request: &Request, status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(request.url().clone(), status, body, request.depth())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

/// One datum produced by analysing a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Request(Request),
    Item(Item),
}

impl From<Request> for Data {
    fn from(request: Request) -> Self {
        Data::Request(request)
    }
}

impl From<Item> for Data {
    fn from(item: Item) -> Self {
        Data::Item(item)
    }
}
