use crawler::{write_ids_file, ApiPage, CrawlConfig, CrawlError, CrawlState, Crawler, FetchError, PageSource};
use parking_lot::Mutex;
use pressdex_core::{build_index, query_and, DocumentStore, LimiterConfig, TokenSequenceBuilder};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Serves canned pages; a missing page answers HTTP 500.
#[derive(Default)]
struct FakeSource {
    pages: HashMap<u32, ApiPage>,
    delays: HashMap<u32, Duration>,
    requested: Arc<Mutex<Vec<u32>>>,
}

impl FakeSource {
    fn page(mut self, page: u32, declared: u32, results: Vec<Value>) -> Self {
        self.pages.insert(page, ApiPage { pages: declared, results });
        self
    }

    fn delay(mut self, page: u32, delay: Duration) -> Self {
        self.delays.insert(page, delay);
        self
    }
}

impl PageSource for FakeSource {
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<ApiPage, FetchError>> + Send {
        self.requested.lock().push(page);
        let response = self.pages.get(&page).cloned();
        let delay = self.delays.get(&page).copied().unwrap_or_default();
        async move {
            tokio::time::sleep(delay).await;
            response.ok_or(FetchError::Status { page, status: 500 })
        }
    }
}

fn record(id: &str, body: &str) -> Value {
    json!({
        "id": format!("world/2017/{id}"),
        "webTitle": format!("Story {id}"),
        "webUrl": format!("https://www.theguardian.com/world/2017/{id}"),
        "sectionName": "World news",
        "blocks": { "body": [ { "id": format!("block-{id}"), "bodyTextSummary": body } ] }
    })
}

fn config(max_pages: u32) -> CrawlConfig {
    CrawlConfig { max_pages, limiter: LimiterConfig { max_concurrent: 4, min_delay: Duration::ZERO } }
}

#[tokio::test(start_paused = true)]
async fn failed_page_only_shrinks_the_corpus() {
    let source = FakeSource::default()
        .page(1, 3, vec![record("a", "the cat sat"), record("b", "the dog sat")])
        .page(2, 3, vec![record("c", "a cat ran")]);
    let store = Arc::new(DocumentStore::temporary().unwrap());
    let dir = tempfile::tempdir().unwrap();

    let crawler = Crawler::new(source, store.clone(), config(200));
    let report = crawler.run(|r| write_ids_file(dir.path(), &r.ids).map(|_| ())).await.unwrap();

    assert_eq!(crawler.state(), CrawlState::Done);
    assert_eq!(report.declared_pages, 3);
    assert_eq!(report.ingested_pages, BTreeSet::from([1, 2]));
    assert_eq!(report.failed_pages, vec![3]);
    assert_eq!(report.ids, vec!["block-a", "block-b", "block-c"]);
    assert_eq!(store.len(), 3);

    let artifact = dir.path().join("ids-block-a.json");
    let ids: Vec<String> = serde_json::from_str(&std::fs::read_to_string(artifact).unwrap()).unwrap();
    assert_eq!(ids, report.ids);

    let index = build_index(&store, &TokenSequenceBuilder::default()).unwrap();
    assert_eq!(query_and(&["cat"], &index).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn ids_follow_page_order_not_arrival_order() {
    let source = FakeSource::default()
        .page(1, 3, vec![record("p1", "x")])
        .page(2, 3, vec![record("p2", "x")])
        .page(3, 3, vec![record("p3", "x")])
        .delay(2, Duration::from_secs(5));
    let store = Arc::new(DocumentStore::temporary().unwrap());

    let report = Crawler::new(source, store.clone(), config(200)).run(|_| Ok(())).await.unwrap();
    assert_eq!(report.ids, vec!["block-p1", "block-p2", "block-p3"]);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn declared_page_count_is_capped() {
    let mut source = FakeSource::default();
    for page in 1..=10 {
        source = source.page(page, 500, vec![record(&format!("n{page}"), "x")]);
    }
    let requested = source.requested.clone();
    let store = Arc::new(DocumentStore::temporary().unwrap());

    let report = Crawler::new(source, store, config(5)).run(|_| Ok(())).await.unwrap();
    assert_eq!(report.requested_pages, 5);
    assert_eq!(report.ingested_pages.len(), 5);
    let mut seen = requested.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn first_page_failure_fails_the_run() {
    let store = Arc::new(DocumentStore::temporary().unwrap());
    let crawler = Crawler::new(FakeSource::default(), store.clone(), config(200));

    let mut completed = false;
    let err = crawler.run(|_| { completed = true; Ok(()) }).await.unwrap_err();
    assert!(matches!(err, CrawlError::FirstPage(FetchError::Status { page: 1, status: 500 })));
    assert_eq!(crawler.state(), CrawlState::Failed);
    assert!(!completed);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn bad_records_and_repeats_are_absorbed() {
    let mut incomplete = record("broken", "x");
    incomplete.as_object_mut().unwrap().remove("sectionName");
    let source = FakeSource::default()
        .page(1, 2, vec![record("a", "x"), incomplete])
        .page(2, 2, vec![record("a", "x"), record("b", "y")]);
    let store = Arc::new(DocumentStore::temporary().unwrap());

    let report = Crawler::new(source, store.clone(), config(200)).run(|_| Ok(())).await.unwrap();
    assert_eq!(report.documents_inserted, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.ids, vec!["block-a", "block-a", "block-b"]);
    assert_eq!(store.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn requests_respect_min_delay() {
    let mut source = FakeSource::default();
    for page in 1..=4 {
        source = source.page(page, 4, vec![record(&format!("t{page}"), "x")]);
    }
    let store = Arc::new(DocumentStore::temporary().unwrap());
    let cfg = CrawlConfig { max_pages: 200, limiter: LimiterConfig::crawler() };

    let start = tokio::time::Instant::now();
    Crawler::new(source, store, cfg).run(|_| Ok(())).await.unwrap();
    // four dispatches, 500ms apart
    assert!(start.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn concurrent_page_writes_on_a_single_worker() {
    let mut source = FakeSource::default();
    for page in 1..=12 {
        let results = (0..5).map(|i| record(&format!("q{page}-{i}"), "shared words")).collect();
        source = source.page(page, 12, results);
    }
    let store = Arc::new(DocumentStore::temporary().unwrap());

    let report = Crawler::new(source, store.clone(), config(200)).run(|_| Ok(())).await.unwrap();
    assert_eq!(report.ingested_pages.len(), 12);
    assert!(report.failed_pages.is_empty());
    assert_eq!(report.documents_inserted, 60);

    let keys: Vec<u64> = store.scan_all().map(|r| r.unwrap().doc_key).collect();
    assert_eq!(keys, (1..=60).collect::<Vec<u64>>());
    for page in 1..=12 {
        let first = store.get_by_external_id(&format!("block-q{page}-0")).unwrap().unwrap().doc_key;
        let last = store.get_by_external_id(&format!("block-q{page}-4")).unwrap().unwrap().doc_key;
        assert_eq!(last - first, 4, "page {page} was split across batches");
    }
}
