mod common;

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use common::{Fixture, PACKAGE, boot, drive, host_params, publish, serve, fixture};
use ferry_core::operation::{ABORT_ERROR, OperationStatus};
use ferry_runtime::AssetRuntime;
use ferry_server::PackageServer;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves files like the package server but can fail one of them and slow
/// down the rest.
struct TestServer {
    root: PathBuf,
    failing: Option<String>,
    failing_status: StatusCode,
    delay: Duration,
    hits: Mutex<Vec<String>>,
}

impl TestServer {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            failing: None,
            failing_status: StatusCode::INTERNAL_SERVER_ERROR,
            delay: Duration::ZERO,
            hits: Mutex::new(Vec::new()),
        }
    }

    fn hits_of(&self, file_name: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|path| path.ends_with(file_name))
            .count()
    }

    fn bundle_hits(&self) -> Vec<String> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|path| path.ends_with(".bundle"))
            .cloned()
            .collect()
    }

    fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/{*path}", get(serve_file))
            .with_state(self.clone())
    }
}

async fn serve_file(State(server): State<Arc<TestServer>>, UrlPath(path): UrlPath<String>) -> Response {
    server.hits.lock().unwrap().push(path.clone());
    if server.failing.as_deref().is_some_and(|name| path.ends_with(name)) {
        return server.failing_status.into_response();
    }
    if path.ends_with(".bundle") && !server.delay.is_zero() {
        tokio::time::sleep(server.delay).await;
    }
    match tokio::fs::read(server.root.join(&path)).await {
        Ok(bytes) => bytes.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn build(base_url: &str, cache: &std::path::Path, buildin: &std::path::Path) -> AssetRuntime {
    AssetRuntime::builder(host_params(base_url, cache, buildin.to_path_buf()))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn downloads_every_missing_bundle() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(
        server_root.path(),
        "v1",
        &[fixture("a", 10, &[]), fixture("b", 20, &[]), fixture("c", 30, &[])],
    );
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    assert_eq!(boot(&runtime).await, "v1");

    let downloader = runtime.create_patch_downloader(10, 3).unwrap();
    assert_eq!(downloader.borrow().total_download_count(), 3);
    assert_eq!(downloader.borrow().total_download_bytes(), 60);

    runtime.begin_download(&downloader);
    drive(&runtime, || downloader.is_done()).await;
    assert_eq!(downloader.status(), OperationStatus::Succeed, "{}", downloader.error());
    assert_eq!(downloader.borrow().current_download_count(), 3);
    assert_eq!(downloader.borrow().current_download_bytes(), 60);
    assert_eq!(downloader.progress(), 1.0);
    assert_eq!(runtime.context().ledger().borrow().len(), 3);

    let again = runtime.create_patch_downloader(10, 3).unwrap();
    assert_eq!(again.borrow().total_download_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_skips_cached_bundles() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(
        server_root.path(),
        "v1",
        &[fixture("a", 10, &["base"]), fixture("b", 20, &["level"]), fixture("c", 30, &["level"])],
    );
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    {
        let runtime = build(&base, cache.path(), buildin.path());
        boot(&runtime).await;
        let downloader = runtime.create_patch_downloader_by_tags(&["base"], 10, 3).unwrap();
        assert_eq!(downloader.borrow().total_download_count(), 1);
        runtime.begin_download(&downloader);
        drive(&runtime, || downloader.is_done()).await;
        assert_eq!(downloader.status(), OperationStatus::Succeed);
    }

    // A fresh runtime rebuilds its ledger from disk.
    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;
    assert_eq!(runtime.context().ledger().borrow().len(), 1);
    assert!(!runtime.is_need_download_from_remote("assets/a").unwrap());
    assert!(runtime.is_need_download_from_remote("assets/b").unwrap());

    let downloader = runtime.create_patch_downloader(10, 3).unwrap();
    assert_eq!(downloader.borrow().total_download_count(), 2);
    assert_eq!(downloader.borrow().total_download_bytes(), 50);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_bundle_fails_the_downloader() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    // The coordinator takes bundles from the back of the list.
    let manifest = publish(
        server_root.path(),
        "v1",
        &[fixture("c", 30, &[]), fixture("b", 20, &[]), fixture("a", 10, &[])],
    );
    let failing = manifest.bundle("b.bundle").unwrap().file_name();

    let server = Arc::new(TestServer {
        failing: Some(failing.clone()),
        ..TestServer::new(server_root.path().to_path_buf())
    });
    let base = serve(server.router()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;

    let downloader = runtime.create_patch_downloader(1, 3).unwrap();
    let failed = Arc::new(Mutex::new(None));
    {
        let failed = failed.clone();
        downloader
            .borrow_mut()
            .set_on_download_file_failed(move |bundle_name, error| {
                *failed.lock().unwrap() = Some((bundle_name.to_string(), error.to_string()));
            });
    }
    runtime.begin_download(&downloader);
    drive(&runtime, || downloader.is_done()).await;

    assert_eq!(downloader.status(), OperationStatus::Failed);
    assert!(downloader.error().contains("b.bundle"), "{}", downloader.error());
    let (bundle_name, _) = failed.lock().unwrap().clone().unwrap();
    assert_eq!(bundle_name, "b.bundle");

    assert_eq!(server.hits_of(&failing), 4);
    let ledger = runtime.context().ledger();
    assert!(ledger.borrow().contains(&manifest.bundle("a.bundle").unwrap().file_hash));
    assert!(!ledger.borrow().contains(&manifest.bundle("c.bundle").unwrap().file_hash));
    assert_eq!(server.hits_of(&manifest.bundle("c.bundle").unwrap().file_name()), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_downloads_stay_under_the_cap() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    let names = ["a", "b", "c", "d", "e", "f"];
    let bundles: Vec<Fixture> = names.iter().map(|name| fixture(name, 64, &[])).collect();
    publish(server_root.path(), "v1", &bundles);

    let server = Arc::new(TestServer {
        delay: Duration::from_millis(30),
        ..TestServer::new(server_root.path().to_path_buf())
    });
    let base = serve(server.router()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;

    let downloader = runtime.create_patch_downloader(2, 0).unwrap();
    runtime.begin_download(&downloader);
    let mut peak = 0;
    while !downloader.is_done() {
        runtime.update();
        let active = downloader.borrow().downloading_count();
        assert!(active <= 2, "{active} downloads in flight");
        peak = peak.max(active);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(downloader.status(), OperationStatus::Succeed, "{}", downloader.error());
    assert_eq!(peak, 2);
    assert_eq!(runtime.context().ledger().borrow().len(), names.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_stops_new_downloads() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    let manifest = publish(
        server_root.path(),
        "v1",
        &[
            fixture("a", 16, &[]),
            fixture("b", 16, &[]),
            fixture("c", 16, &[]),
            fixture("d", 16, &[]),
            fixture("slow", 16, &[]),
            fixture("broken", 16, &[]),
        ],
    );
    let broken = manifest.bundle("broken.bundle").unwrap().file_name();
    let slow = manifest.bundle("slow.bundle").unwrap().file_name();

    let server = Arc::new(TestServer {
        failing: Some(broken.clone()),
        failing_status: StatusCode::NOT_FOUND,
        delay: Duration::from_millis(300),
        ..TestServer::new(server_root.path().to_path_buf())
    });
    let base = serve(server.router()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;

    let downloader = runtime.create_patch_downloader(2, 0).unwrap();
    runtime.begin_download(&downloader);
    drive(&runtime, || downloader.is_done()).await;

    assert_eq!(downloader.status(), OperationStatus::Failed);
    assert!(downloader.error().contains("broken.bundle"));

    // The in-flight download finishes; nothing new was started.
    let hits = server.bundle_hits();
    assert_eq!(hits.len(), 2, "{hits:?}");
    assert!(hits.iter().any(|path| path.ends_with(&broken)));
    assert!(hits.iter().any(|path| path.ends_with(&slow)));
    assert_eq!(runtime.context().ledger().borrow().len(), 1);
    assert!(!runtime.is_need_download_from_remote("assets/slow").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_stops_the_downloader() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 16, &[]), fixture("b", 16, &[])]);

    let server = Arc::new(TestServer {
        delay: Duration::from_secs(5),
        ..TestServer::new(server_root.path().to_path_buf())
    });
    let base = serve(server.router()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;

    let downloader = runtime.create_patch_downloader(2, 0).unwrap();
    let over = Arc::new(Mutex::new(None));
    {
        let over = over.clone();
        downloader
            .borrow_mut()
            .set_on_download_over(move |succeed| *over.lock().unwrap() = Some(succeed));
    }
    runtime.begin_download(&downloader);
    for _ in 0..5 {
        runtime.update();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    downloader.borrow_mut().cancel_download();

    assert_eq!(downloader.status(), OperationStatus::Failed);
    assert_eq!(downloader.error(), "User cancel.");
    assert_eq!(*over.lock().unwrap(), Some(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn clearing_the_package_aborts_running_downloads() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 16, &[]), fixture("b", 16, &[]), fixture("c", 16, &[])]);

    let server = Arc::new(TestServer {
        delay: Duration::from_secs(5),
        ..TestServer::new(server_root.path().to_path_buf())
    });
    let base = serve(server.router()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;

    let downloader = runtime.create_patch_downloader(2, 0).unwrap();
    let over = Arc::new(Mutex::new(Vec::new()));
    {
        let over = over.clone();
        downloader
            .borrow_mut()
            .set_on_download_over(move |succeed| over.lock().unwrap().push(succeed));
    }
    runtime.begin_download(&downloader);
    for _ in 0..5 {
        runtime.update();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(downloader.borrow().downloading_count(), 2);
    assert_eq!(runtime.context().downloads().len(), 2);

    runtime.operations().clear_package_operation(PACKAGE);

    assert_eq!(downloader.status(), OperationStatus::Failed);
    assert_eq!(downloader.error(), ABORT_ERROR);
    assert_eq!(*over.lock().unwrap(), [false]);
    assert_eq!(downloader.borrow().downloading_count(), 0);

    for _ in 0..5 {
        runtime.update();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(runtime.context().downloads().is_empty());
    assert_eq!(*over.lock().unwrap(), [false]);
    assert!(runtime.context().ledger().borrow().is_empty());
}
