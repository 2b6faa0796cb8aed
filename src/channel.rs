//! # Channel Manager
//!
//! Owns the four bounded channels the scheduler moves work through:
//! requests, responses, items and errors.
//!
//! The manager moves strictly forward through
//! `Uninitialized -> Initialized -> Closed`. Handles can only be fetched while
//! it is `Initialized`; [`ChannelManager::close`] closes every channel exactly
//! once, after which all senders and receivers observe the closure.

use std::fmt;

use kanal::{AsyncReceiver, AsyncSender, bounded_async};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ChannelArgs;
use crate::error::{CrawlError, CrawlerError};
use crate::model::{Item, Request, Response};

/// Lifecycle state of a [`ChannelManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ChannelStatus {
    Uninitialized,
    Initialized,
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelStatus::Uninitialized => "uninitialized",
            ChannelStatus::Initialized => "initialized",
            ChannelStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Both ends of one bounded channel.
#[derive(Debug)]
pub struct Channel<T> {
    pub tx: AsyncSender<T>,
    pub rx: AsyncReceiver<T>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Channel<T> {
    fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded_async(capacity);
        Self { tx, rx }
    }

    /// Entries that can still be sent without waiting.
    pub fn free(&self) -> usize {
        self.tx.capacity().saturating_sub(self.tx.len())
    }

    fn usage(&self) -> ChannelUsage {
        ChannelUsage {
            len: self.tx.len(),
            capacity: self.tx.capacity(),
        }
    }

    fn close(&self) {
        // Closing either end closes the whole channel.
        let _ = self.tx.close();
    }
}

struct Channels {
    requests: Channel<Request>,
    responses: Channel<Response>,
    items: Channel<Item>,
    errors: Channel<CrawlError>,
}

struct ManagerState {
    status: ChannelStatus,
    channels: Option<Channels>,
}

/// Owner of the request, response, item and error channels.
pub struct ChannelManager {
    state: RwLock<ManagerState>,
}

impl ChannelManager {
    /// Creates a manager with no channels allocated yet.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ManagerState {
                status: ChannelStatus::Uninitialized,
                channels: None,
            }),
        }
    }

    /// Creates a manager and initializes it with `args`.
    ///
    /// # Panics
    ///
    /// Panics if any capacity in `args` is zero.
    pub fn with_args(args: &ChannelArgs) -> Self {
        let manager = Self::new();
        manager.init(args, true);
        manager
    }

    /// Allocates the four channels.
    ///
    /// Returns `false` without touching anything if the manager is already
    /// initialized and `reset` is not set, or if it has been closed.
    ///
    /// # Panics
    ///
    /// Panics if any capacity in `args` is zero; a zero-capacity channel is a
    /// wiring error, not a runtime condition.
    pub fn init(&self, args: &ChannelArgs, reset: bool) -> bool {
        if let Err(e) = args.check() {
            panic!("invalid channel arguments: {}", e);
        }

        let mut state = self.state.write();
        match state.status {
            ChannelStatus::Closed => return false,
            ChannelStatus::Initialized if !reset => return false,
            _ => {}
        }
        if let Some(old) = state.channels.take() {
            close_all(&old);
        }
        state.channels = Some(Channels {
            requests: Channel::bounded(args.request),
            responses: Channel::bounded(args.response),
            items: Channel::bounded(args.item),
            errors: Channel::bounded(args.error),
        });
        state.status = ChannelStatus::Initialized;
        debug!("Channel manager initialized with {}", args);
        true
    }

    /// Closes every channel. Returns `false` unless the manager was initialized.
    pub fn close(&self) -> bool {
        let mut state = self.state.write();
        if state.status != ChannelStatus::Initialized {
            return false;
        }
        if let Some(channels) = state.channels.as_ref() {
            close_all(channels);
        }
        state.status = ChannelStatus::Closed;
        debug!("Channel manager closed");
        true
    }

    pub fn status(&self) -> ChannelStatus {
        self.state.read().status
    }

    pub fn request_channel(&self) -> Result<Channel<Request>, CrawlerError> {
        self.with_channels(|c| c.requests.clone())
    }

    pub fn response_channel(&self) -> Result<Channel<Response>, CrawlerError> {
        self.with_channels(|c| c.responses.clone())
    }

    pub fn item_channel(&self) -> Result<Channel<Item>, CrawlerError> {
        self.with_channels(|c| c.items.clone())
    }

    pub fn error_channel(&self) -> Result<Channel<CrawlError>, CrawlerError> {
        self.with_channels(|c| c.errors.clone())
    }

    fn with_channels<T>(&self, f: impl FnOnce(&Channels) -> T) -> Result<T, CrawlerError> {
        let state = self.state.read();
        match (state.status, state.channels.as_ref()) {
            (ChannelStatus::Initialized, Some(channels)) => Ok(f(channels)),
            (status, _) => Err(CrawlerError::NotReady(status)),
        }
    }

    /// Current length and capacity of every channel.
    pub fn summary(&self) -> ChannelSummary {
        let state = self.state.read();
        let usage = state.channels.as_ref().map(|c| {
            [
                c.requests.usage(),
                c.responses.usage(),
                c.items.usage(),
                c.errors.usage(),
            ]
        });
        let [requests, responses, items, errors] = usage.unwrap_or_default();
        ChannelSummary {
            status: state.status,
            requests,
            responses,
            items,
            errors,
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

fn close_all(channels: &Channels) {
    channels.requests.close();
    channels.responses.close();
    channels.items.close();
    channels.errors.close();
}

/// Length and capacity of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelUsage {
    pub len: usize,
    pub capacity: usize,
}

impl fmt::Display for ChannelUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.len, self.capacity)
    }
}

/// Snapshot of a [`ChannelManager`], for observability only.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChannelSummary {
    pub status: ChannelStatus,
    pub requests: ChannelUsage,
    pub responses: ChannelUsage,
    pub items: ChannelUsage,
    pub errors: ChannelUsage,
}

impl fmt::Display for ChannelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status: {}, requests: {}, responses: {}, items: {}, errors: {}",
            self.status, self.requests, self.responses, self.items, self.errors
        )
    }
}
