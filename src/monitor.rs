//! # Monitor
//!
//! Watches a running [`Scheduler`] from the outside and decides when the crawl
//! is over.
//!
//! [`monitor`] spawns three cooperating tasks once the scheduler is running:
//!
//! - an error reporter forwarding everything from [`Scheduler::error_chan`]
//!   to the record callback;
//! - a summary recorder that records a [`SchedSummary`](crate::scheduler::SchedSummary)
//!   whenever it differs from the previous one;
//! - an idle checker that counts consecutive idle observations and, past
//!   [`MonitorConfig::max_idle_count`], optionally stops the scheduler.
//!
//! The returned handle resolves with the number of status checks made once
//! the idle checker gives up.
//!
//! ## Example
//!
//! ```rust,no_run
//! use spider_scheduler::monitor::{MonitorConfig, monitor, tracing_record};
//! use spider_scheduler::scheduler::Scheduler;
//!
//! # async fn run(scheduler: Scheduler) {
//! let checks = monitor(scheduler.clone(), MonitorConfig::default(), tracing_record())
//!     .await
//!     .unwrap_or_default();
//! println!("crawl finished after {} checks", checks);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::scheduler::{SchedSummary, Scheduler};

const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MIN_IDLE_COUNT: u32 = 1000;

/// Severity of a monitor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for RecordLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordLevel::Info => "info",
            RecordLevel::Warn => "warn",
            RecordLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Sink for everything the monitor observes.
pub type Record = Arc<dyn Fn(RecordLevel, &str) + Send + Sync>;

/// A [`Record`] that writes through `tracing`.
pub fn tracing_record() -> Record {
    Arc::new(|level: RecordLevel, content: &str| match level {
        RecordLevel::Info => info!("{}", content),
        RecordLevel::Warn => warn!("{}", content),
        RecordLevel::Error => error!("{}", content),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Pause between two checks. Raised to at least 1ms.
    pub interval: Duration,
    /// Consecutive idle checks tolerated before the crawl counts as finished.
    /// Raised to at least 1000.
    pub max_idle_count: u32,
    /// Stop the scheduler once it is found finished.
    pub auto_stop: bool,
    /// Record summaries with every seen URL.
    pub detail_summary: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            max_idle_count: MIN_IDLE_COUNT,
            auto_stop: true,
            detail_summary: false,
        }
    }
}

impl MonitorConfig {
    fn normalized(mut self) -> Self {
        self.interval = self.interval.max(MIN_INTERVAL);
        self.max_idle_count = self.max_idle_count.max(MIN_IDLE_COUNT);
        self
    }
}

/// Starts monitoring `scheduler`. See the module docs.
pub fn monitor(scheduler: Scheduler, config: MonitorConfig, record: Record) -> JoinHandle<u64> {
    let config = config.normalized();
    let helpers = CancellationToken::new();
    let span = info_span!("monitor");

    let errors = tokio::spawn(
        report_errors(scheduler.clone(), config.interval, Arc::clone(&record), helpers.clone())
            .instrument(span.clone()),
    );
    let summaries = tokio::spawn(
        record_summaries(
            scheduler.clone(),
            config.clone(),
            Arc::clone(&record),
            helpers.clone(),
        )
        .instrument(span.clone()),
    );

    tokio::spawn(
        async move {
            let checks = check_status(&scheduler, &config, &record).await;
            helpers.cancel();
            let _ = errors.await;
            let _ = summaries.await;
            checks
        }
        .instrument(span),
    )
}

async fn wait_for_start(scheduler: &Scheduler, interval: Duration) {
    while !scheduler.running() {
        tokio::time::sleep(interval).await;
    }
}

async fn check_status(scheduler: &Scheduler, config: &MonitorConfig, record: &Record) -> u64 {
    wait_for_start(scheduler, config.interval).await;

    let mut checks = 0u64;
    let mut idle_count = 0u32;
    let mut first_idle = Instant::now();
    loop {
        if scheduler.idle() {
            idle_count += 1;
            if idle_count == 1 {
                first_idle = Instant::now();
            }
            if idle_count > config.max_idle_count {
                record(
                    RecordLevel::Info,
                    &format!(
                        "Idle count reached the max idle count after {:?}",
                        first_idle.elapsed()
                    ),
                );
                if scheduler.idle() {
                    if config.auto_stop {
                        let result = if scheduler.stop() { "success" } else { "failure" };
                        record(RecordLevel::Info, &format!("Stop scheduler: {}", result));
                    }
                    break;
                }
                idle_count = 0;
            }
        } else {
            idle_count = 0;
        }
        checks += 1;
        tokio::time::sleep(config.interval).await;
    }
    checks
}

async fn report_errors(
    scheduler: Scheduler,
    interval: Duration,
    record: Record,
    stop: CancellationToken,
) {
    tokio::select! {
        _ = stop.cancelled() => return,
        _ = wait_for_start(&scheduler, interval) => {}
    }
    let Some(errors) = scheduler.error_chan() else {
        return;
    };
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            received = errors.recv() => match received {
                Ok(e) => record(
                    RecordLevel::Error,
                    &format!("Error (received from error channel): {}", e),
                ),
                Err(_) => return,
            },
        }
    }
}

async fn record_summaries(
    scheduler: Scheduler,
    config: MonitorConfig,
    record: Record,
    stop: CancellationToken,
) {
    tokio::select! {
        _ = stop.cancelled() => return,
        _ = wait_for_start(&scheduler, config.interval) => {}
    }

    let started = Instant::now();
    let mut sequence = 1u64;
    let mut previous: Option<SchedSummary> = None;
    loop {
        let current = scheduler.summary("\t");
        if previous.as_ref().map_or(true, |prev| !current.same(prev)) {
            let rendered = if config.detail_summary {
                current.detail()
            } else {
                current.to_string()
            };
            record(
                RecordLevel::Info,
                &format!(
                    "Monitor - collected information [{}]:\n{}\tElapsed: {:?}\n",
                    sequence,
                    rendered,
                    started.elapsed()
                ),
            );
            previous = Some(current);
            sequence += 1;
        }

        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
