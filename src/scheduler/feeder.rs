//! Feeder: moves cached requests into the bounded request channel.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Span, trace};

use crate::channel::Channel;
use crate::model::Request;

use super::SCHEDULER_CODE;
use super::context::CrawlContext;

/// Every tick, drains as many requests from the cache as the request channel
/// has free slots, then exits for good once the stop sign is signed.
pub(crate) fn spawn_feeder(
    ctx: Arc<CrawlContext>,
    requests: Channel<Request>,
    span: Span,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(ctx.config.feed_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            trace!("Feeder started with interval {:?}", ctx.config.feed_interval());

            loop {
                let mut free = requests.free();
                while free > 0 {
                    let Some(request) = ctx.cache.get() else {
                        break;
                    };
                    if requests.tx.send(request).await.is_err() {
                        trace!("Request channel closed while feeding");
                        break;
                    }
                    free -= 1;
                }

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = ctx.stop_sign.cancelled() => {}
                }
                if ctx.stop_sign.signed() {
                    ctx.stop_sign.deal(SCHEDULER_CODE);
                    break;
                }
            }
            trace!("Feeder finished");
        }
        .instrument(span),
    )
}
