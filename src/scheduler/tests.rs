use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::*;
use crate::analyzer::{Analyzer, AnalyzerFactory, ParseResponse};
use crate::config::{ChannelArgs, PoolArgs};
use crate::downloader::{Downloader, DownloaderFactory};
use crate::error::ErrorKind;
use crate::item_pipeline::processor_fn;
use crate::model::{Data, Item, Response};
use crate::pool::{Entity, IdGenerator};

type Fetched = Arc<Mutex<Vec<(String, u32)>>>;

struct StubDownloader {
    id: u32,
    fetched: Fetched,
    fail: bool,
    panic: bool,
}

impl Entity for StubDownloader {
    fn id(&self) -> u32 {
        self.id
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn download(&self, request: &Request) -> Result<Response, CrawlerError> {
        if self.panic {
            panic!("stub downloader exploded");
        }
        if self.fail {
            return Err(CrawlerError::Download(format!(
                "connection refused (url={})",
                request.url()
            )));
        }
        self.fetched
            .lock()
            .push((request.url().to_string(), request.depth()));
        Ok(Response::for_request(request, 200, "<html></html>"))
    }
}

fn stub_downloaders(fetched: Fetched, fail: bool, panic: bool) -> DownloaderFactory {
    let ids = Arc::new(IdGenerator::new());
    Arc::new(move || {
        Box::new(StubDownloader {
            id: ids.next_id(),
            fetched: Arc::clone(&fetched),
            fail,
            panic,
        }) as Box<dyn Downloader>
    })
}

/// On the seed page: one same-domain link, one foreign link and one item.
fn seed_page_parser(response: &Response, depth: u32) -> (Vec<Data>, Vec<anyhow::Error>) {
    if response.url().path() != "/" {
        return (Vec::new(), Vec::new());
    }
    let mut item = Item::new();
    item.insert("text".to_string(), json!("hi"));
    let data = vec![
        Data::Request(Request::parse("http://example.com/a", depth).unwrap()),
        Data::Request(Request::parse("http://other.com/b", depth).unwrap()),
        Data::Item(item),
    ];
    (data, Vec::new())
}

/// Runs the parsers but keeps whatever depth they gave their requests.
struct PassThroughAnalyzer {
    id: u32,
}

impl Entity for PassThroughAnalyzer {
    fn id(&self) -> u32 {
        self.id
    }
}

#[async_trait]
impl Analyzer for PassThroughAnalyzer {
    async fn analyze(
        &self,
        parsers: &[ParseResponse],
        response: &Response,
    ) -> (Vec<Data>, Vec<CrawlerError>) {
        let mut data = Vec::new();
        for parser in parsers {
            data.extend(parser(response, response.depth()).0);
        }
        (data, Vec::new())
    }
}

fn pass_through_analyzers() -> AnalyzerFactory {
    let ids = Arc::new(IdGenerator::new());
    Arc::new(move || Box::new(PassThroughAnalyzer { id: ids.next_id() }) as Box<dyn Analyzer>)
}

fn dealt(scheduler: &Scheduler, code: &str) -> u32 {
    scheduler
        .summary("")
        .stop_sign
        .deals
        .iter()
        .find(|(dealer, _)| dealer == code)
        .map(|(_, count)| *count)
        .unwrap_or_default()
}

fn seed() -> Request {
    Request::parse("http://example.com/", 0).unwrap()
}

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
        .channel_args(ChannelArgs::new(4, 4, 4, 4))
        .pool_args(PoolArgs::new(2, 2))
        .max_depth(1)
        .feed_interval_ms(1)
}

fn job(fetched: Fetched) -> CrawlJob {
    CrawlJob::with_downloaders(seed(), stub_downloaders(fetched, false, false))
        .parser(seed_page_parser)
        .processor(processor_fn("noop", |_| Ok(None)))
}

fn processed(scheduler: &Scheduler) -> u64 {
    scheduler
        .summary("")
        .pipeline
        .map(|pipeline| pipeline.processed)
        .unwrap_or_default()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_error(errors: &kanal::AsyncReceiver<CrawlError>) -> CrawlError {
    tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .expect("no error reported in time")
        .expect("error channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crawl_follows_same_domain_links() {
    let fetched = Fetched::default();
    let scheduler = Scheduler::new();
    scheduler.start(config(), job(Arc::clone(&fetched))).unwrap();
    assert!(scheduler.running());

    wait_until(|| fetched.lock().len() == 2 && processed(&scheduler) == 1).await;
    wait_until(|| scheduler.idle()).await;

    let mut pages = fetched.lock().clone();
    pages.sort();
    assert_eq!(
        pages,
        vec![
            ("http://example.com/".to_string(), 0),
            ("http://example.com/a".to_string(), 1),
        ]
    );

    let summary = scheduler.summary("  ");
    assert_eq!(
        summary.urls,
        vec!["http://example.com/", "http://example.com/a"]
    );
    assert_eq!(summary.url_count, 2);
    assert_eq!(summary.downloader_pool, PoolUsage { used: 0, total: 2 });
    let pipeline = summary.pipeline.unwrap();
    assert_eq!((pipeline.sent, pipeline.accepted, pipeline.processed), (1, 1, 1));
    assert!(pipeline.fail_fast);

    assert!(scheduler.stop());
    assert!(scheduler.join(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rediscovered_url_is_rejected() {
    let fetched = Fetched::default();
    let scheduler = Scheduler::new();
    scheduler.start(config(), job(Arc::clone(&fetched))).unwrap();
    wait_until(|| fetched.lock().len() == 2).await;

    let ctx = scheduler.inner.context.read().clone().unwrap();
    let code = actor_code(ANALYZER_CODE, 0);
    assert!(!ctx.accept_request(Request::parse("http://example.com/a", 1).unwrap(), &code));
    assert!(!ctx.accept_request(Request::parse("http://example.com/a#top", 1).unwrap(), &code));
    assert!(!ctx.accept_request(Request::parse("http://other.com/c", 1).unwrap(), &code));
    assert!(!ctx.accept_request(Request::parse("ftp://example.com/c", 1).unwrap(), &code));
    assert!(!ctx.accept_request(Request::parse("http://example.com/deep", 2).unwrap(), &code));
    assert!(ctx.accept_request(Request::parse("http://example.com/c", 1).unwrap(), &code));
    assert!(!ctx.accept_request(Request::parse("http://example.com/c", 1).unwrap(), &code));

    assert!(scheduler.stop());
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_depth_limits_crawl() {
    let fetched = Fetched::default();
    let scheduler = Scheduler::new();
    scheduler
        .start(config().max_depth(0), job(Arc::clone(&fetched)))
        .unwrap();

    wait_until(|| processed(&scheduler) == 1).await;
    wait_until(|| scheduler.idle()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        fetched.lock().clone(),
        vec![("http://example.com/".to_string(), 0)]
    );
    assert_eq!(scheduler.summary("").url_count, 1);

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_is_idempotent() {
    let scheduler = Scheduler::new();
    assert!(!scheduler.stop(), "a scheduler that never started cannot stop");

    scheduler.start(config(), job(Fetched::default())).unwrap();
    assert!(scheduler.error_chan().is_some());

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    assert!(!scheduler.running());
    assert_eq!(scheduler.status(), SchedStatus::Stopped);
    assert!(scheduler.error_chan().is_none());

    assert!(scheduler.join(Duration::from_secs(2)).await);
    let summary = scheduler.summary("");
    assert!(summary.stop_sign.signed);
    assert!(
        summary
            .stop_sign
            .deals
            .iter()
            .any(|(code, _)| code == SCHEDULER_CODE),
        "the feeder reports the stop: {}",
        summary.stop_sign
    );
    assert!(summary.cache.unwrap().closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_errors_are_classified_by_origin() {
    let scheduler = Scheduler::new();
    let job = CrawlJob::with_downloaders(seed(), stub_downloaders(Fetched::default(), true, false))
        .parser(seed_page_parser);
    scheduler.start(config(), job).unwrap();

    let errors = scheduler.error_chan().unwrap();
    let error = next_error(&errors).await;
    assert_eq!(error.kind(), ErrorKind::Downloader);
    assert!(error.message().contains("connection refused"));
    assert!(error.to_string().starts_with("Crawler Error: Downloader Error: "));

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parser_and_processor_errors_reach_the_error_channel() {
    let scheduler = Scheduler::new();
    let job = CrawlJob::with_downloaders(seed(), stub_downloaders(Fetched::default(), false, false))
        .parser(|_: &Response, _: u32| {
            let mut item = Item::new();
            item.insert("text".to_string(), json!("hi"));
            (vec![Data::Item(item)], vec![anyhow::anyhow!("missing title")])
        })
        .processor(processor_fn("reject", |_| Err(anyhow::anyhow!("bad item"))));
    scheduler.start(config(), job).unwrap();

    let errors = scheduler.error_chan().unwrap();
    let mut kinds = vec![next_error(&errors).await.kind(), next_error(&errors).await.kind()];
    kinds.sort_by_key(|kind| kind.to_string());
    assert_eq!(kinds, vec![ErrorKind::Analyzer, ErrorKind::ItemProcessor]);

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_panic_is_reported_and_entity_returned() {
    let scheduler = Scheduler::new();
    let job = CrawlJob::with_downloaders(seed(), stub_downloaders(Fetched::default(), false, true))
        .parser(seed_page_parser);
    scheduler.start(config(), job).unwrap();

    let errors = scheduler.error_chan().unwrap();
    let error = next_error(&errors).await;
    assert_eq!(error.kind(), ErrorKind::Scheduler);
    assert!(error.message().contains("stub downloader exploded"));

    wait_until(|| scheduler.idle()).await;
    assert_eq!(scheduler.summary("").downloader_pool.used, 0);

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_invalid_start_leaves_scheduler_untouched() {
    let scheduler = Scheduler::new();

    let zero_pool = config().pool_args(PoolArgs::new(0, 2));
    assert!(matches!(
        scheduler.start(zero_pool, job(Fetched::default())),
        Err(CrawlerError::Config(_))
    ));
    assert_eq!(scheduler.status(), SchedStatus::NotStarted);
    assert!(scheduler.error_chan().is_none());

    let hostless = CrawlJob::with_downloaders(
        Request::parse("data:text/plain,hi", 0).unwrap(),
        stub_downloaders(Fetched::default(), false, false),
    );
    assert!(matches!(
        scheduler.start(config(), hostless),
        Err(CrawlerError::InvalidRequest(_))
    ));
    assert_eq!(scheduler.status(), SchedStatus::NotStarted);
}

#[tokio::test]
async fn test_factory_panic_becomes_error() {
    let scheduler = Scheduler::new();
    let exploding: DownloaderFactory =
        Arc::new(|| -> Box<dyn Downloader> { panic!("no downloader for you") });
    let result = scheduler.start(config(), CrawlJob::with_downloaders(seed(), exploding));
    match result {
        Err(CrawlerError::Panic(message)) => assert!(message.contains("no downloader for you")),
        other => panic!("expected a panic error, got {:?}", other),
    }
    assert!(!scheduler.running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_twice_is_rejected() {
    let scheduler = Scheduler::new();
    scheduler.start(config(), job(Fetched::default())).unwrap();
    assert!(matches!(
        scheduler.start(config(), job(Fetched::default())),
        Err(CrawlerError::AlreadyRunning)
    ));
    assert!(scheduler.running());

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_after_stop() {
    let scheduler = Scheduler::new();
    let first = Fetched::default();
    scheduler.start(config(), job(Arc::clone(&first))).unwrap();
    wait_until(|| first.lock().len() == 2).await;
    assert!(scheduler.stop());
    scheduler.join(Duration::from_secs(2)).await;

    let second = Fetched::default();
    scheduler.start(config(), job(Arc::clone(&second))).unwrap();
    assert!(!scheduler.summary("").stop_sign.signed);
    wait_until(|| second.lock().len() == 2).await;
    assert_eq!(scheduler.summary("").url_count, 2);

    assert!(scheduler.stop());
    assert!(scheduler.join(Duration::from_secs(2)).await);
}

#[test]
fn test_start_outside_runtime_fails() {
    let scheduler = Scheduler::new();
    assert!(matches!(
        scheduler.start(config(), job(Fetched::default())),
        Err(CrawlerError::Config(_))
    ));
    assert_eq!(scheduler.status(), SchedStatus::NotStarted);
}

#[test]
fn test_actor_codes_map_to_error_kinds() {
    assert_eq!(actor_code(DOWNLOADER_CODE, 7), "downloader-7");
    assert_eq!(
        ErrorKind::from_code(&actor_code(ANALYZER_CODE, 1)),
        ErrorKind::Analyzer
    );
    assert_eq!(ErrorKind::from_code(ITEM_PIPELINE_CODE), ErrorKind::ItemProcessor);
    assert_eq!(ErrorKind::from_code(SCHEDULER_CODE), ErrorKind::Scheduler);
}

#[tokio::test]
async fn test_summary_before_start() {
    let scheduler = Scheduler::new();
    let summary = scheduler.summary("");
    assert_eq!(summary.status, SchedStatus::NotStarted);
    assert!(summary.channels.is_none());
    assert!(scheduler.idle());
    assert!(summary.same(&scheduler.summary("> ")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_depth_is_counted_by_the_scheduler_for_custom_analyzers() {
    let fetched = Fetched::default();
    let scheduler = Scheduler::new();
    let job = job(Arc::clone(&fetched)).analyzers(pass_through_analyzers());
    scheduler.start(config().max_depth(0), job).unwrap();

    wait_until(|| processed(&scheduler) == 1).await;
    wait_until(|| scheduler.idle()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        fetched.lock().clone(),
        vec![("http://example.com/".to_string(), 0)]
    );

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_analyzer_requests_are_crawled_one_level_down() {
    let fetched = Fetched::default();
    let scheduler = Scheduler::new();
    let job = job(Arc::clone(&fetched)).analyzers(pass_through_analyzers());
    scheduler.start(config(), job).unwrap();

    wait_until(|| fetched.lock().len() == 2).await;
    let mut pages = fetched.lock().clone();
    pages.sort();
    assert_eq!(pages[1], ("http://example.com/a".to_string(), 1));

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_signed_stop_sign_drops_work_and_records_deals() {
    let scheduler = Scheduler::new();
    scheduler.start(config(), job(Fetched::default())).unwrap();
    let ctx = scheduler.inner.context.read().clone().unwrap();
    assert!(scheduler.stop());

    let analyzer = actor_code(ANALYZER_CODE, 999_999);
    let downloader = actor_code(DOWNLOADER_CODE, 999_999);
    assert!(!ctx.accept_request(Request::parse("http://example.com/late", 1).unwrap(), &analyzer));
    assert!(!ctx.send_error(CrawlerError::Analyze("too late".to_string()), &analyzer));
    assert!(!ctx.send_item(Item::new(), &analyzer).await);
    assert!(
        !ctx.send_response(
            Response::for_request(&seed(), 200, "late"),
            &downloader
        )
        .await
    );

    assert_eq!(dealt(&scheduler, &analyzer), 3);
    assert_eq!(dealt(&scheduler, &downloader), 1);
    assert!(
        !scheduler
            .summary("")
            .urls
            .contains(&"http://example.com/late".to_string())
    );

    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seed_is_crawled_at_depth_zero() {
    let fetched = Fetched::default();
    let scheduler = Scheduler::new();
    let job = CrawlJob::with_downloaders(
        Request::parse("http://example.com/", 3).unwrap(),
        stub_downloaders(Arc::clone(&fetched), false, false),
    )
    .parser(seed_page_parser);
    scheduler.start(config(), job).unwrap();

    wait_until(|| fetched.lock().len() == 2).await;
    let mut pages = fetched.lock().clone();
    pages.sort();
    assert_eq!(
        pages,
        vec![
            ("http://example.com/".to_string(), 0),
            ("http://example.com/a".to_string(), 1),
        ]
    );

    scheduler.stop();
    scheduler.join(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_previous_run_cannot_touch_restarted_run() {
    let scheduler = Scheduler::new();
    let first = Fetched::default();
    scheduler.start(config(), job(Arc::clone(&first))).unwrap();
    wait_until(|| first.lock().len() == 2).await;
    let old = scheduler.inner.context.read().clone().unwrap();
    assert!(scheduler.stop());

    // Restart without joining the first run's loops.
    let second = Fetched::default();
    scheduler.start(config(), job(Arc::clone(&second))).unwrap();

    let code = actor_code(ANALYZER_CODE, 1);
    assert!(old.stop_sign.signed());
    assert!(!old.accept_request(Request::parse("http://example.com/late", 1).unwrap(), &code));

    wait_until(|| second.lock().len() == 2).await;
    let summary = scheduler.summary("");
    assert!(!summary.stop_sign.signed);
    assert_eq!(dealt(&scheduler, &code), 0);
    assert_eq!(
        summary.urls,
        vec!["http://example.com/", "http://example.com/a"]
    );

    assert!(scheduler.stop());
    scheduler.join(Duration::from_secs(2)).await;
}
