//! # Configuration Module
//!
//! Sizing and policy settings for a crawl.
//!
//! ## Overview
//!
//! - [`ChannelArgs`]: capacities of the four bounded channels
//! - [`PoolArgs`]: how many downloaders and analyzers may work at once
//! - [`SchedulerConfig`]: the above plus depth limit, accepted URL scheme and
//!   the request feeder's tick
//!
//! Every capacity and pool size must be non-zero; [`SchedulerConfig::check`]
//! reports the first violation as a [`CrawlerError::Config`].
//!
//! ## Example
//!
//! ```rust
//! use spider_scheduler::config::{ChannelArgs, PoolArgs, SchedulerConfig};
//!
//! let config = SchedulerConfig::default()
//!     .channel_args(ChannelArgs::new(10, 10, 10, 10))
//!     .pool_args(PoolArgs::new(3, 3))
//!     .max_depth(2);
//! assert!(config.check().is_ok());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CrawlerError;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Capacities of the request, response, item and error channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelArgs {
    pub request: usize,
    pub response: usize,
    pub item: usize,
    pub error: usize,
}

impl ChannelArgs {
    pub fn new(request: usize, response: usize, item: usize, error: usize) -> Self {
        Self {
            request,
            response,
            item,
            error,
        }
    }

    pub fn check(&self) -> Result<(), CrawlerError> {
        let capacities = [
            ("request", self.request),
            ("response", self.response),
            ("item", self.item),
            ("error", self.error),
        ];
        match capacities.iter().find(|(_, capacity)| *capacity == 0) {
            Some((name, _)) => Err(CrawlerError::Config(format!(
                "the {} channel capacity must be greater than 0",
                name
            ))),
            None => Ok(()),
        }
    }
}

impl Default for ChannelArgs {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHANNEL_CAPACITY,
            DEFAULT_CHANNEL_CAPACITY,
            DEFAULT_CHANNEL_CAPACITY,
            DEFAULT_CHANNEL_CAPACITY,
        )
    }
}

impl fmt::Display for ChannelArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request: {}, response: {}, item: {}, error: {}",
            self.request, self.response, self.item, self.error
        )
    }
}

/// Sizes of the downloader and analyzer pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolArgs {
    pub downloaders: u32,
    pub analyzers: u32,
}

impl PoolArgs {
    pub fn new(downloaders: u32, analyzers: u32) -> Self {
        Self {
            downloaders,
            analyzers,
        }
    }

    pub fn check(&self) -> Result<(), CrawlerError> {
        if self.downloaders == 0 {
            return Err(CrawlerError::Config(
                "the downloader pool size must be greater than 0".to_string(),
            ));
        }
        if self.analyzers == 0 {
            return Err(CrawlerError::Config(
                "the analyzer pool size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolArgs {
    fn default() -> Self {
        let cpus = num_cpus::get() as u32;
        Self {
            downloaders: cpus.max(4),
            analyzers: cpus.clamp(2, 8),
        }
    }
}

impl fmt::Display for PoolArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaders: {}, analyzers: {}",
            self.downloaders, self.analyzers
        )
    }
}

/// Configuration of one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub channels: ChannelArgs,
    pub pools: PoolArgs,
    /// Deepest hop count, counted from the seed, that will still be fetched.
    pub max_depth: u32,
    /// The only URL scheme discovered requests may use.
    pub accepted_scheme: String,
    /// Tick of the loop that moves cached requests into the request channel.
    pub feed_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            channels: ChannelArgs::default(),
            pools: PoolArgs::default(),
            max_depth: 1,
            accepted_scheme: "http".to_string(),
            feed_interval_ms: 10,
        }
    }
}

impl SchedulerConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CrawlerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn check(&self) -> Result<(), CrawlerError> {
        self.channels.check()?;
        self.pools.check()?;
        if self.accepted_scheme.is_empty() {
            return Err(CrawlerError::Config(
                "the accepted scheme must not be empty".to_string(),
            ));
        }
        if self.feed_interval_ms == 0 {
            return Err(CrawlerError::Config(
                "the feed interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }

    pub fn channel_args(mut self, channels: ChannelArgs) -> Self {
        self.channels = channels;
        self
    }

    pub fn pool_args(mut self, pools: PoolArgs) -> Self {
        self.pools = pools;
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn accepted_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.accepted_scheme = scheme.into();
        self
    }

    pub fn feed_interval_ms(mut self, interval_ms: u64) -> Self {
        self.feed_interval_ms = interval_ms;
        self
    }
}

impl fmt::Display for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channels: [{}], pools: [{}], max depth: {}, scheme: {}, feed interval: {}ms",
            self.channels, self.pools, self.max_depth, self.accepted_scheme, self.feed_interval_ms
        )
    }
}
