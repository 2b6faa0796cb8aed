//! Analysis dispatcher.
//!
//! Mirrors the download dispatcher on the response side: an analyzer is
//! checked out before the per-response task is spawned. Each datum the
//! analyzer produces is routed by kind: requests go through the acceptance
//! check into the request cache, items go to the item channel and errors go
//! to the error channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, Span, error, trace};

use crate::channel::Channel;
use crate::error::{CrawlerError, panic_message};
use crate::model::{Data, Response};
use crate::pool::Entity;

use super::context::CrawlContext;
use super::{ANALYZER_CODE, SCHEDULER_CODE, actor_code};

pub(crate) fn spawn_analyze_loop(
    ctx: Arc<CrawlContext>,
    responses: Channel<Response>,
    span: Span,
) -> JoinHandle<()> {
    let task_span = span.clone();
    tokio::spawn(
        async move {
            let responses = responses.rx;
            let mut tasks = JoinSet::new();
            trace!("Analyze loop started");

            loop {
                let response = tokio::select! {
                    _ = ctx.stop_sign.cancelled() => break,
                    received = responses.recv() => match received {
                        Ok(response) => response,
                        Err(_) => {
                            trace!("Response channel closed, exiting analyze loop");
                            break;
                        }
                    },
                };

                let analyzer = match ctx.analyzers.checkout().await {
                    Ok(analyzer) => analyzer,
                    Err(e) => {
                        ctx.send_error(
                            CrawlerError::PoolUnavailable(format!(
                                "analyzer pool: {} (url={})",
                                e,
                                response.url()
                            )),
                            SCHEDULER_CODE,
                        );
                        continue;
                    }
                };

                let ctx = Arc::clone(&ctx);
                tasks.spawn(
                    async move {
                        let code = actor_code(ANALYZER_CODE, analyzer.id());
                        let outcome = AssertUnwindSafe(analyzer.analyze(&ctx.parsers, &response))
                            .catch_unwind()
                            .await;
                        match outcome {
                            Ok((data, errors)) => {
                                route(&ctx, &response, data, errors, &code).await;
                            }
                            Err(payload) => {
                                let message = panic_message(payload);
                                error!("{} panicked analyzing {}: {}", code, response.url(), message);
                                ctx.send_error(
                                    CrawlerError::Panic(format!(
                                        "analysis of {} panicked: {}",
                                        response.url(),
                                        message
                                    )),
                                    SCHEDULER_CODE,
                                );
                            }
                        }
                        if let Err(e) = analyzer.release() {
                            ctx.send_error(e, SCHEDULER_CODE);
                        }
                    }
                    .instrument(task_span.clone()),
                );

                while let Some(finished) = tasks.try_join_next() {
                    if let Err(e) = finished {
                        error!("An analyze task failed: {:?}", e);
                    }
                }
            }

            trace!("Waiting for {} active analyze tasks", tasks.len());
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    error!("An analyze task failed: {:?}", e);
                }
            }
            trace!("Analyze loop finished");
        }
        .instrument(span),
    )
}

async fn route(
    ctx: &CrawlContext,
    response: &Response,
    data: Vec<Data>,
    errors: Vec<CrawlerError>,
    code: &str,
) {
    let (mut requests, mut items) = (0usize, 0usize);
    let next_depth = response.depth() + 1;
    for datum in data {
        match datum {
            Data::Request(request) => {
                // Depth counts hops from the seed whatever the analyzer returned.
                if ctx.accept_request(request.with_depth(next_depth), code) {
                    requests += 1;
                }
            }
            Data::Item(item) => {
                if ctx.send_item(item, code).await {
                    items += 1;
                }
            }
        }
    }
    trace!(
        "{} analyzed {}: {} requests accepted, {} items sent, {} errors",
        code,
        response.url(),
        requests,
        items,
        errors.len()
    );
    for e in errors {
        ctx.send_error(e, code);
    }
}
