mod common;

use common::{PACKAGE, boot, drive, host_params, publish, serve, fixture};
use ferry_core::naming;
use ferry_core::operation::OperationStatus;
use ferry_runtime::{
    AssetRuntime, ClearCacheMode, InitializeParameters, PlayMode, ProviderStatus, RuntimeError,
};
use ferry_server::PackageServer;
use std::cell::Cell;
use std::rc::Rc;

#[tokio::test(flavor = "multi_thread")]
async fn editor_simulation_loads_source_files() {
    let package_root = tempfile::tempdir().unwrap();
    let asset_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let a = fixture("a", 10, &[]);
    std::fs::create_dir_all(asset_root.path().join("assets")).unwrap();
    std::fs::write(asset_root.path().join("assets/a"), &a.bytes).unwrap();
    publish(package_root.path(), "dev", &[a]);

    let params = InitializeParameters {
        play_mode: PlayMode::EditorSimulate {
            manifest_path: package_root
                .path()
                .join(PACKAGE)
                .join(naming::manifest_file_name(PACKAGE, "dev")),
            asset_root: asset_root.path().to_path_buf(),
        },
        cache_root: cache.path().to_path_buf(),
        ..Default::default()
    };
    let runtime = AssetRuntime::builder(params).build().unwrap();
    let init = runtime.initialize();
    drive(&runtime, || init.is_done()).await;
    assert_eq!(init.status(), OperationStatus::Succeed, "{}", init.error());

    let first = runtime.load_asset_async::<Vec<u8>>("assets/a").unwrap();
    let second = runtime.load_asset_sync::<Vec<u8>>("assets/a").unwrap();
    assert_eq!(runtime.assets().provider_count(), 1);
    assert_eq!(second.status(), ProviderStatus::Success);
    assert_eq!(second.asset::<Vec<u8>>().unwrap().as_slice(), b"a:\x00\x01\x02\x03\x04\x05\x06\x07");

    let completed = Rc::new(Cell::new(false));
    {
        let completed = completed.clone();
        first.on_completed(move |load| completed.set(load.is_succeed()));
    }
    drive(&runtime, || completed.get()).await;
    assert!(first.is_done());

    first.release().unwrap();
    assert_eq!(runtime.unload_unused_assets(), 0);
    second.release().unwrap();
    assert_eq!(runtime.unload_unused_assets(), 1);
    assert_eq!(runtime.assets().provider_count(), 0);
    assert!(first.release().is_err());
    assert!(!second.is_valid());

    assert!(matches!(
        runtime.load_asset_async::<Vec<u8>>("assets/missing"),
        Err(RuntimeError::LocationNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn async_load_downloads_its_bundle() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &[]), fixture("b", 20, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = AssetRuntime::builder(host_params(&base, cache.path(), buildin.path().to_path_buf()))
        .build()
        .unwrap();
    boot(&runtime).await;

    let sync = runtime.load_asset_sync::<Vec<u8>>("assets/a").unwrap();
    assert_eq!(sync.status(), ProviderStatus::Fail);
    assert!(sync.last_error().contains("a.bundle"), "{}", sync.last_error());
    sync.release().unwrap();
    assert_eq!(runtime.unload_unused_assets(), 1);

    let handle = runtime.load_asset_async::<Vec<u8>>("assets/b").unwrap();
    assert!(!handle.is_done());
    let task = handle.task();
    drive(&runtime, || handle.is_done()).await;
    assert_eq!(task.await, ProviderStatus::Success);
    let bytes = handle.asset::<Vec<u8>>().unwrap();
    assert_eq!(bytes.len(), 20);
    assert!(bytes.starts_with(b"b:"));
    assert!(!runtime.is_need_download_from_remote("assets/b").unwrap());

    // Wrong content type for the loaded object.
    assert!(handle.asset::<String>().is_none());
    handle.release().unwrap();

    let unused = runtime.clear_cache(ClearCacheMode::Unused).unwrap();
    drive(&runtime, || unused.is_done()).await;
    assert_eq!(unused.status(), OperationStatus::Succeed);
    assert_eq!(runtime.context().ledger().borrow().len(), 1);

    let all = runtime.clear_cache(ClearCacheMode::All).unwrap();
    drive(&runtime, || all.is_done()).await;
    assert_eq!(all.status(), OperationStatus::Succeed, "{}", all.error());
    assert!(runtime.context().ledger().borrow().is_empty());
    assert!(runtime.is_need_download_from_remote("assets/b").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn raw_file_is_downloaded_and_copied() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    let copy_dir = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("config", 24, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = AssetRuntime::builder(host_params(&base, cache.path(), buildin.path().to_path_buf()))
        .build()
        .unwrap();
    boot(&runtime).await;

    let copy_path = copy_dir.path().join("config.bin");
    let raw = runtime.get_raw_file("assets/config", Some(copy_path.clone())).unwrap();
    drive(&runtime, || raw.is_done()).await;
    assert_eq!(raw.status(), OperationStatus::Succeed, "{}", raw.error());

    let raw = raw.borrow();
    assert_eq!(raw.file_path(), copy_path.as_path());
    let data = raw.file_data().unwrap();
    assert_eq!(data.len(), 24);
    assert!(data.starts_with(b"config:"));
    assert_eq!(std::fs::read(&copy_path).unwrap(), data);
    assert_eq!(runtime.context().ledger().borrow().len(), 1);
    drop(raw);

    // A leftover copy of another version is replaced from the cache.
    std::fs::write(&copy_path, b"config from an older build").unwrap();
    let again = runtime.get_raw_file("assets/config", Some(copy_path.clone())).unwrap();
    drive(&runtime, || again.is_done()).await;
    assert_eq!(again.status(), OperationStatus::Succeed, "{}", again.error());
    assert_eq!(std::fs::read(&copy_path).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn asset_infos_of_a_bundle() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &["base"]), fixture("b", 20, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = AssetRuntime::builder(host_params(&base, cache.path(), buildin.path().to_path_buf()))
        .build()
        .unwrap();
    boot(&runtime).await;

    let info = runtime.get_bundle_info("assets/b").unwrap();
    assert_eq!(info.bundle_name(), "b.bundle");
    let assets = runtime.asset_infos_by_bundle(&info).unwrap();
    let paths: Vec<_> = assets.iter().map(|asset| asset.asset_path.as_str()).collect();
    assert_eq!(paths, ["assets/b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn destroy_forgets_everything() {
    let server_root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let buildin = tempfile::tempdir().unwrap();
    publish(server_root.path(), "v1", &[fixture("a", 10, &[])]);
    let base = serve(PackageServer::new(server_root.path()).build()).await;

    let runtime = AssetRuntime::builder(host_params(&base, cache.path(), buildin.path().to_path_buf()))
        .build()
        .unwrap();
    boot(&runtime).await;
    let handle = runtime.load_asset_async::<Vec<u8>>("assets/a").unwrap();

    runtime.destroy();
    runtime.destroy();
    assert_eq!(runtime.assets().provider_count(), 0);
    assert!(!handle.is_valid());
    assert!(handle.release().is_err());
    assert!(runtime.context().ledger().borrow().is_empty());
}
