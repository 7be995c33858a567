mod common;

use common::{PACKAGE, boot, drive, host_params, publish, serve, fixture, write_version};
use ferry_core::naming;
use ferry_core::operation::OperationStatus;
use ferry_runtime::{AssetRuntime, InitializeParameters, PlayMode, RuntimeError};
use ferry_server::PackageServer;

fn build(base_url: &str, cache: &std::path::Path, buildin: &std::path::Path) -> AssetRuntime {
    AssetRuntime::builder(host_params(base_url, cache, buildin.to_path_buf()))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_manifest_is_loaded_from_the_sandbox() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    {
        let runtime = build(&base, cache.path(), buildin.path());
        boot(&runtime).await;
        assert_eq!(runtime.package_version().as_deref(), Some("v1"));
    }

    // Only the hash file is left on the server.
    std::fs::remove_file(
        server_root
            .path()
            .join(PACKAGE)
            .join(naming::manifest_file_name(PACKAGE, "v1")),
    )
    .unwrap();

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;
    assert_eq!(runtime.package_version().as_deref(), Some("v1"));
    assert!(runtime.check_location_valid("assets/a"));
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_manifest_keeps_the_previous_one() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;

    write_version(server_root.path(), "v2", b"{\"FileVersion\": 7");
    let version = runtime.update_package_version();
    drive(&runtime, || version.is_done()).await;
    assert_eq!(version.borrow().package_version(), "v2");

    let manifest = runtime.update_manifest("v2");
    drive(&runtime, || manifest.is_done()).await;
    assert_eq!(manifest.status(), OperationStatus::Failed);
    assert!(manifest.error().contains("deserialize"), "{}", manifest.error());
    assert_eq!(runtime.package_version().as_deref(), Some("v1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn manifest_must_match_its_hash_file() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &[])]);
    let v2 = publish(server_root.path(), "v2", &[fixture("a", 12, &[])]);
    std::fs::write(
        server_root
            .path()
            .join(PACKAGE)
            .join(naming::manifest_hash_file_name(PACKAGE, "v2")),
        "0000",
    )
    .unwrap();
    assert_eq!(v2.human_readable_version, "v2");
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    let init = runtime.initialize();
    drive(&runtime, || init.is_done()).await;

    let manifest = runtime.update_manifest("v2");
    drive(&runtime, || manifest.is_done()).await;
    assert_eq!(manifest.status(), OperationStatus::Failed);
    assert!(manifest.error().contains("hash mismatch"), "{}", manifest.error());
    assert_eq!(runtime.package_version(), None);

    let manifest = runtime.update_manifest("v1");
    drive(&runtime, || manifest.is_done()).await;
    assert_eq!(manifest.status(), OperationStatus::Succeed, "{}", manifest.error());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_host_fails_version_request() {
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    let server_root = tempfile::tempdir().unwrap();
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    let init = runtime.initialize();
    drive(&runtime, || init.is_done()).await;
    assert_eq!(init.status(), OperationStatus::Succeed, "{}", init.error());

    let version = runtime.update_package_version();
    drive(&runtime, || version.is_done()).await;
    assert_eq!(version.status(), OperationStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_mode_needs_buildin_content() {
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();

    let params = InitializeParameters {
        play_mode: PlayMode::Offline,
        cache_root: cache.path().to_path_buf(),
        buildin_root: buildin.path().join("missing"),
        ..Default::default()
    };
    let runtime = AssetRuntime::builder(params.clone()).build().unwrap();
    let init = runtime.initialize();
    drive(&runtime, || init.is_done()).await;
    assert_eq!(init.status(), OperationStatus::Failed);

    // Built-in content is published the same way as remote content.
    publish(buildin.path(), "v7", &[fixture("a", 10, &[])]);
    let params = InitializeParameters {
        buildin_root: buildin.path().join(PACKAGE),
        ..params
    };
    let runtime = AssetRuntime::builder(params).build().unwrap();
    let init = runtime.initialize();
    drive(&runtime, || init.is_done()).await;
    assert_eq!(init.status(), OperationStatus::Succeed, "{}", init.error());
    assert_eq!(runtime.package_version().as_deref(), Some("v7"));
    assert!(!runtime.is_need_download_from_remote("assets/a").unwrap());

    let version = runtime.update_package_version();
    drive(&runtime, || version.is_done()).await;
    assert_eq!(version.borrow().package_version(), "v7");
}

#[tokio::test(flavor = "multi_thread")]
async fn pre_download_fills_the_cache_without_switching_versions() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &[]), fixture("b", 20, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = build(&base, cache.path(), buildin.path());
    boot(&runtime).await;
    let downloader = runtime.create_patch_downloader(4, 0).unwrap();
    runtime.begin_download(&downloader);
    drive(&runtime, || downloader.is_done()).await;
    assert_eq!(downloader.status(), OperationStatus::Succeed, "{}", downloader.error());

    let v2 = publish(server_root.path(), "v2", &[fixture("a", 10, &[]), fixture("c", 30, &["dlc"])]);

    let pre = runtime.pre_download_content("v2");
    assert!(matches!(
        pre.borrow().create_patch_downloader(4, 0),
        Err(RuntimeError::ManifestNotLoaded(version)) if version == "v2"
    ));
    drive(&runtime, || pre.is_done()).await;
    assert_eq!(pre.status(), OperationStatus::Succeed, "{}", pre.error());

    // "a" is shared with v1 and already cached.
    let downloader = pre.borrow().create_patch_downloader(4, 0).unwrap();
    assert_eq!(downloader.borrow().total_download_count(), 1);
    assert_eq!(pre.borrow().create_patch_downloader_by_tags(&["dlc"], 4, 0).unwrap().borrow().total_download_count(), 1);
    runtime.begin_download(&downloader);
    drive(&runtime, || downloader.is_done()).await;
    assert_eq!(downloader.status(), OperationStatus::Succeed, "{}", downloader.error());

    assert_eq!(runtime.package_version().as_deref(), Some("v1"));
    assert!(!runtime.check_location_valid("assets/c"));
    assert!(runtime.check_location_valid("assets/b"));
    let ledger = runtime.context().ledger();
    assert!(ledger.borrow().contains(&v2.bundle("c.bundle").unwrap().file_hash));

    // Switching later finds everything local.
    let manifest = runtime.update_manifest("v2");
    drive(&runtime, || manifest.is_done()).await;
    assert_eq!(manifest.status(), OperationStatus::Succeed, "{}", manifest.error());
    assert!(!runtime.is_need_download_from_remote("assets/c").unwrap());
    assert_eq!(runtime.create_patch_downloader(4, 0).unwrap().borrow().total_download_count(), 0);
}
