//! Item consumer: feeds every item from the item channel through the pipeline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, Span, error, trace};

use crate::channel::Channel;
use crate::error::panic_message;
use crate::model::Item;

use super::ITEM_PIPELINE_CODE;
use super::context::CrawlContext;

pub(crate) fn spawn_item_loop(
    ctx: Arc<CrawlContext>,
    items: Channel<Item>,
    span: Span,
) -> JoinHandle<()> {
    let task_span = span.clone();
    tokio::spawn(
        async move {
            let items = items.rx;
            // In-flight items are capped at the item channel capacity.
            let max_in_flight = ctx.config.channels.item;
            let mut tasks = JoinSet::new();
            trace!("Item loop started with at most {} items in flight", max_in_flight);

            loop {
                let item = tokio::select! {
                    _ = ctx.stop_sign.cancelled() => break,
                    received = items.recv() => match received {
                        Ok(item) => item,
                        Err(_) => {
                            trace!("Item channel closed, exiting item loop");
                            break;
                        }
                    },
                };

                while tasks.len() >= max_in_flight {
                    if let Some(Err(e)) = tasks.join_next().await {
                        error!("An item task failed: {:?}", e);
                    }
                }

                let ctx = Arc::clone(&ctx);
                tasks.spawn(
                    async move {
                        match AssertUnwindSafe(ctx.pipeline.send(item)).catch_unwind().await {
                            Ok(errors) => {
                                for e in errors {
                                    ctx.send_error(e, ITEM_PIPELINE_CODE);
                                }
                            }
                            Err(payload) => {
                                error!("Item processing panicked: {}", panic_message(payload));
                            }
                        }
                    }
                    .instrument(task_span.clone()),
                );

                while let Some(finished) = tasks.try_join_next() {
                    if let Err(e) = finished {
                        error!("An item task failed: {:?}", e);
                    }
                }
            }

            trace!("Waiting for {} items in the pipeline", tasks.len());
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    error!("An item task failed: {:?}", e);
                }
            }
            trace!("Item loop finished");
        }
        .instrument(span),
    )
}
