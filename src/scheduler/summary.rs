//! Point-in-time snapshot of a [`Scheduler`](super::Scheduler).

use std::fmt;

use serde::Serialize;

use crate::channel::ChannelSummary;
use crate::config::SchedulerConfig;
use crate::error::CrawlerError;
use crate::item_pipeline::PipelineSummary;
use crate::request_cache::CacheSummary;
use crate::stop_sign::StopSignSummary;

use super::SchedStatus;

/// Checked-out and total entities of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub used: u32,
    pub total: u32,
}

impl fmt::Display for PoolUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.used, self.total)
    }
}

/// Snapshot returned by [`Scheduler::summary`](super::Scheduler::summary).
///
/// Components that only exist while a crawl has been started are `None`
/// before the first start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedSummary {
    pub prefix: String,
    pub status: SchedStatus,
    pub running: bool,
    pub config: Option<SchedulerConfig>,
    pub channels: Option<ChannelSummary>,
    pub cache: Option<CacheSummary>,
    pub downloader_pool: PoolUsage,
    pub analyzer_pool: PoolUsage,
    pub pipeline: Option<PipelineSummary>,
    pub url_count: usize,
    pub urls: Vec<String>,
    pub stop_sign: StopSignSummary,
}

impl SchedSummary {
    /// Compares two snapshots, ignoring the prefix and the URL list.
    pub fn same(&self, other: &SchedSummary) -> bool {
        self.status == other.status
            && self.running == other.running
            && self.config == other.config
            && self.channels == other.channels
            && self.cache == other.cache
            && self.downloader_pool == other.downloader_pool
            && self.analyzer_pool == other.analyzer_pool
            && self.pipeline == other.pipeline
            && self.url_count == other.url_count
            && self.stop_sign == other.stop_sign
    }

    /// Renders the snapshot including every seen URL.
    pub fn detail(&self) -> String {
        self.render(true)
    }

    pub fn to_json_string(&self) -> Result<String, CrawlerError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, CrawlerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn render(&self, detail: bool) -> String {
        let p = &self.prefix;
        let or_none = |value: Option<String>| value.unwrap_or_else(|| "none".to_string());
        let urls = if !detail {
            "<concealed>".to_string()
        } else if self.urls.is_empty() {
            String::new()
        } else {
            self.urls
                .iter()
                .map(|url| format!("\n{}{}{}", p, p, url))
                .collect::<String>()
        };

        let mut out = String::new();
        out.push_str(&format!("{}Status: {}\n", p, self.status));
        out.push_str(&format!("{}Running: {}\n", p, self.running));
        out.push_str(&format!(
            "{}Config: {}\n",
            p,
            or_none(self.config.as_ref().map(ToString::to_string))
        ));
        out.push_str(&format!(
            "{}Channels: {}\n",
            p,
            or_none(self.channels.as_ref().map(ToString::to_string))
        ));
        out.push_str(&format!(
            "{}Request cache: {}\n",
            p,
            or_none(self.cache.as_ref().map(ToString::to_string))
        ));
        out.push_str(&format!("{}Downloader pool: {}\n", p, self.downloader_pool));
        out.push_str(&format!("{}Analyzer pool: {}\n", p, self.analyzer_pool));
        out.push_str(&format!(
            "{}Item pipeline: {}\n",
            p,
            or_none(self.pipeline.as_ref().map(ToString::to_string))
        ));
        out.push_str(&format!("{}Urls({}): {}\n", p, self.url_count, urls));
        out.push_str(&format!("{}Stop sign: {}\n", p, self.stop_sign));
        out
    }
}

impl fmt::Display for SchedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}
