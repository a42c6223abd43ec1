//! End-to-end install / activate / fetch scenarios against in-memory storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use offline_worker::{
    CacheStorage, DiskCacheStorage, Error, FetchOutcome, InstallReport, MemoryCacheStorage,
    MessageData, MessageOutcome, Method, Network, OfflineWorker, Registration, Request,
    Response, ResponseSource, Result, WorkerConfig, WorkerMessage,
};
use proptest::prelude::*;

const ORIGIN: &str = "https://eco.test";

/// An origin server that can be taken down per URL.
#[derive(Default)]
struct FakeOrigin {
    pages: Mutex<HashMap<String, (u16, &'static str)>>,
    requests: Mutex<usize>,
}

impl FakeOrigin {
    fn new(pages: &[(&str, u16, &'static str)]) -> Arc<Self> {
        let origin = Self::default();
        {
            let mut map = origin.pages.lock().unwrap();
            for (path, status, body) in pages {
                map.insert(format!("{ORIGIN}{path}"), (*status, *body));
            }
        }
        Arc::new(origin)
    }

    fn take_down(&self, path: &str) {
        self.pages.lock().unwrap().remove(&format!("{ORIGIN}{path}"));
    }

    fn take_down_everything(&self) {
        self.pages.lock().unwrap().clear();
    }

    fn requests(&self) -> usize {
        *self.requests.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Network for FakeOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        *self.requests.lock().unwrap() += 1;
        let url = request.url.to_string();
        let page = self.pages.lock().unwrap().get(&url).copied();
        match page {
            Some((status, body)) => Ok(Response::new(status, url, body)),
            None => Err(Error::Network(format!("{url}: offline"))),
        }
    }
}

fn shell() -> Arc<FakeOrigin> {
    FakeOrigin::new(&[
        ("/", 200, "<home>"),
        ("/index.html", 200, "<home>"),
        ("/offline.html", 200, "<offline>"),
    ])
}

fn config(version: &str) -> WorkerConfig {
    WorkerConfig::new()
        .with_origin(ORIGIN)
        .with_version(version)
        .with_manifest(["/", "/index.html", "/offline.html"])
}

fn worker<S: CacheStorage + 'static>(
    origin: &Arc<FakeOrigin>,
    storage: &Arc<S>,
    version: &str,
) -> OfflineWorker<Arc<FakeOrigin>, S> {
    OfflineWorker::new(&config(version), Arc::clone(origin), Arc::clone(storage)).unwrap()
}

#[tokio::test]
async fn install_populates_static_partition() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    let w = worker(&origin, &storage, "v1");

    w.on_install().await.unwrap();

    let entries = storage.entries("eco-explorer-static-v1").await.unwrap();
    assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn activation_purges_previous_version() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());

    let v1 = worker(&origin, &storage, "v1");
    v1.on_install().await.unwrap();
    v1.on_activate().await.unwrap();
    storage.open("eco-explorer-dynamic-v1").await.unwrap();

    let v2 = worker(&origin, &storage, "v2");
    v2.on_install().await.unwrap();
    let outcome = v2.on_activate().await.unwrap();

    assert_eq!(outcome.deleted.len(), 2);
    assert!(!storage.has("eco-explorer-static-v1").await.unwrap());
    assert!(!storage.has("eco-explorer-dynamic-v1").await.unwrap());
    assert!(storage.has("eco-explorer-static-v2").await.unwrap());
}

#[tokio::test]
async fn visited_page_is_served_offline() {
    let origin = FakeOrigin::new(&[
        ("/", 200, "<home>"),
        ("/index.html", 200, "<home>"),
        ("/offline.html", 200, "<offline>"),
        ("/page.html", 200, "<page>"),
    ]);
    let storage = Arc::new(MemoryCacheStorage::new());
    let w = worker(&origin, &storage, "v1");
    w.on_install().await.unwrap();
    w.on_activate().await.unwrap();

    let page = Request::navigate(&format!("{ORIGIN}/page.html")).unwrap();
    let online = w.on_fetch(&page).await.unwrap();
    assert_eq!(online.source(), Some(ResponseSource::Network));
    w.flush_pending_writes().await;
    assert!(
        storage
            .match_in("eco-explorer-dynamic-v1", &page.cache_key())
            .await
            .unwrap()
            .is_some()
    );

    origin.take_down("/page.html");
    let offline = w.on_fetch(&page).await.unwrap();
    assert_eq!(offline.source(), Some(ResponseSource::Cache));
    assert_eq!(offline.response(), online.response());
}

#[tokio::test]
async fn unknown_navigation_offline_gets_offline_page() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    let w = worker(&origin, &storage, "v1");
    w.on_install().await.unwrap();
    origin.take_down_everything();

    let req = Request::navigate(&format!("{ORIGIN}/trails/new.html")).unwrap();
    let outcome = w.on_fetch(&req).await.unwrap();
    assert_eq!(outcome.source(), Some(ResponseSource::OfflineFallback));
    assert_eq!(outcome.response().unwrap().body, "<offline>");
}

#[tokio::test]
async fn missing_image_offline_is_an_error() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    let w = worker(&origin, &storage, "v1");
    w.on_install().await.unwrap();

    let img = Request::get(&format!("{ORIGIN}/missing.png")).unwrap();
    assert!(matches!(
        w.on_fetch(&img).await,
        Err(Error::NoFallback { .. })
    ));
}

#[tokio::test]
async fn activate_twice_leaves_same_partitions() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("eco-explorer-static-v0").await.unwrap();
    let w = worker(&origin, &storage, "v1");
    w.on_install().await.unwrap();

    w.on_activate().await.unwrap();
    let after_first = storage.keys().await.unwrap();
    w.on_activate().await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), after_first);
    assert_eq!(after_first, ["eco-explorer-static-v1"]);
}

#[tokio::test]
async fn cross_origin_requests_are_not_intercepted() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    let w = worker(&origin, &storage, "v1");

    let font = Request::get("https://fonts.example.com/inter.woff2").unwrap();
    assert_eq!(w.on_fetch(&font).await.unwrap(), FetchOutcome::Passthrough);
    assert_eq!(origin.requests(), 0);
}

#[tokio::test]
async fn failed_update_keeps_previous_worker_serving() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    let registration = Registration::new();
    assert_eq!(
        registration
            .install(worker(&origin, &storage, "v1"))
            .await
            .unwrap(),
        InstallReport::Activated
    );

    origin.take_down("/offline.html");
    assert!(
        registration
            .install(worker(&origin, &storage, "v2"))
            .await
            .is_err()
    );

    let active = registration.active().await.unwrap();
    assert_eq!(active.cache_names().static_name, "eco-explorer-static-v1");
    assert!(storage.has("eco-explorer-static-v1").await.unwrap());

    origin.take_down_everything();
    let nav = Request::navigate(&format!("{ORIGIN}/anything.html")).unwrap();
    let outcome = registration.fetch(&nav).await.unwrap();
    assert_eq!(outcome.source(), Some(ResponseSource::OfflineFallback));
}

#[tokio::test]
async fn foreign_origin_message_has_no_effect() {
    let origin = shell();
    let storage = Arc::new(MemoryCacheStorage::new());
    let registration = Registration::new();
    registration
        .install(worker(&origin, &storage, "v1"))
        .await
        .unwrap();
    registration.client_opened();
    registration
        .install(
            OfflineWorker::new(
                &config("v2").with_skip_waiting_on_install(false),
                Arc::clone(&origin),
                Arc::clone(&storage),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let msg = WorkerMessage::new("https://attacker.test", MessageData::SkipWaiting);
    assert_eq!(
        registration.post_message(&msg).await.unwrap(),
        MessageOutcome::Rejected
    );
    let waiting = registration.waiting().await.unwrap();
    assert!(!waiting.skip_waiting_requested());
    assert_eq!(
        registration.active().await.unwrap().cache_names().static_name,
        "eco-explorer-static-v1"
    );
}

#[tokio::test]
async fn disk_storage_survives_a_new_worker_instance() {
    let dir = tempfile::TempDir::new().unwrap();
    let origin = shell();
    let storage = Arc::new(DiskCacheStorage::new(dir.path()));

    let first = worker(&origin, &storage, "v1");
    first.on_install().await.unwrap();
    first.on_activate().await.unwrap();
    drop(first);

    origin.take_down_everything();
    let reopened = Arc::new(DiskCacheStorage::new(dir.path()));
    let second = worker(&origin, &reopened, "v1");
    let home = Request::navigate(&format!("{ORIGIN}/index.html")).unwrap();
    let outcome = second.on_fetch(&home).await.unwrap();
    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    assert_eq!(outcome.response().unwrap().body, "<home>");
}

fn mutating_method() -> impl Strategy<Value = Method> {
    prop_oneof![
        Just(Method::Post),
        Just(Method::Put),
        Just(Method::Delete),
        Just(Method::Patch),
        Just(Method::Head),
        Just(Method::Options),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn non_get_requests_never_touch_storage(
        method in mutating_method(),
        path in "/[a-z]{1,8}(\\.html|\\.png|/)?",
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let origin = shell();
            let storage = Arc::new(MemoryCacheStorage::new());
            let w = worker(&origin, &storage, "v1");

            let req = Request::get(&format!("{ORIGIN}{path}")).unwrap().with_method(method);
            let outcome = w.on_fetch(&req).await.unwrap();
            w.flush_pending_writes().await;

            assert_eq!(outcome, FetchOutcome::Passthrough);
            assert!(storage.keys().await.unwrap().is_empty());
            assert_eq!(origin.requests(), 0);
        });
    }
}
