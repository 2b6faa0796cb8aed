//! Download dispatcher.
//!
//! Receives requests from the request channel, checks a downloader out of the
//! pool and only then spawns the task that fetches the page, so the number of
//! live download tasks never exceeds the pool size. The finished task forwards
//! the response (or the failure) and gives the downloader back.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, Span, error, trace};

use crate::channel::Channel;
use crate::error::{CrawlerError, panic_message};
use crate::model::Request;
use crate::pool::Entity;

use super::context::CrawlContext;
use super::{DOWNLOADER_CODE, SCHEDULER_CODE, actor_code};

pub(crate) fn spawn_download_loop(
    ctx: Arc<CrawlContext>,
    requests: Channel<Request>,
    span: Span,
) -> JoinHandle<()> {
    let task_span = span.clone();
    tokio::spawn(
        async move {
            let requests = requests.rx;
            let mut tasks = JoinSet::new();
            trace!("Download loop started");

            loop {
                let request = tokio::select! {
                    _ = ctx.stop_sign.cancelled() => break,
                    received = requests.recv() => match received {
                        Ok(request) => request,
                        Err(_) => {
                            trace!("Request channel closed, exiting download loop");
                            break;
                        }
                    },
                };

                let downloader = match ctx.downloaders.checkout().await {
                    Ok(downloader) => downloader,
                    Err(e) => {
                        ctx.send_error(
                            CrawlerError::PoolUnavailable(format!(
                                "downloader pool: {} (url={})",
                                e,
                                request.url()
                            )),
                            SCHEDULER_CODE,
                        );
                        continue;
                    }
                };

                let ctx = Arc::clone(&ctx);
                tasks.spawn(
                    async move {
                        let code = actor_code(DOWNLOADER_CODE, downloader.id());
                        let outcome = AssertUnwindSafe(downloader.download(&request))
                            .catch_unwind()
                            .await;
                        match outcome {
                            Ok(Ok(response)) => {
                                trace!("{} fetched {}", code, response.url());
                                ctx.send_response(response, &code).await;
                            }
                            Ok(Err(e)) => {
                                ctx.send_error(e, &code);
                            }
                            Err(payload) => {
                                let message = panic_message(payload);
                                error!("{} panicked downloading {}: {}", code, request.url(), message);
                                ctx.send_error(
                                    CrawlerError::Panic(format!(
                                        "download of {} panicked: {}",
                                        request.url(),
                                        message
                                    )),
                                    SCHEDULER_CODE,
                                );
                            }
                        }
                        if let Err(e) = downloader.release() {
                            ctx.send_error(e, SCHEDULER_CODE);
                        }
                    }
                    .instrument(task_span.clone()),
                );

                while let Some(finished) = tasks.try_join_next() {
                    if let Err(e) = finished {
                        error!("A download task failed: {:?}", e);
                    }
                }
            }

            trace!("Waiting for {} active download tasks", tasks.len());
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    error!("A download task failed: {:?}", e);
                }
            }
            trace!("Download loop finished");
        }
        .instrument(span),
    )
}
