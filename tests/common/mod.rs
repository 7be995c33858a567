#![allow(dead_code)]

use axum::Router;
use ferry_core::manifest::{MANIFEST_FILE_VERSION, ManifestData, PackageAsset, PackageBundle, PackageManifest};
use ferry_core::naming;
use ferry_runtime::{AssetRuntime, InitializeParameters, PlayMode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const PACKAGE: &str = "DefaultPackage";

pub struct Fixture<'a> {
    pub name: &'a str,
    pub bytes: Vec<u8>,
    pub tags: &'a [&'a str],
}

pub fn fixture<'a>(name: &'a str, size: usize, tags: &'a [&'a str]) -> Fixture<'a> {
    // Name first so no two bundles share a content hash.
    let mut bytes = format!("{name}:").into_bytes();
    bytes.extend((0..).map(|i: u32| i as u8).take(size.saturating_sub(bytes.len())));
    bytes.truncate(size);
    Fixture { name, bytes, tags }
}

pub fn sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes bundle files, manifest, hash file and version file of one package
/// version to `{root}/{PACKAGE}`. Every bundle holds one asset
/// `assets/{name}`.
pub fn publish(root: &Path, version: &str, bundles: &[Fixture]) -> PackageManifest {
    let package_root = root.join(PACKAGE);
    std::fs::create_dir_all(&package_root).unwrap();

    let mut bundle_list = Vec::new();
    let mut asset_list = Vec::new();
    for (index, fixture) in bundles.iter().enumerate() {
        let bundle = PackageBundle::new(
            format!("{}.bundle", fixture.name),
            sha256(&fixture.bytes),
            crc32fast::hash(&fixture.bytes),
            fixture.bytes.len() as u64,
            fixture.tags.iter().map(|tag| tag.to_string()).collect(),
        )
        .with_flags(true, false);
        std::fs::write(package_root.join(bundle.file_name()), &fixture.bytes).unwrap();
        bundle_list.push(bundle);
        asset_list.push(PackageAsset {
            address: String::new(),
            asset_path: format!("assets/{}", fixture.name),
            asset_tags: Vec::new(),
            bundle_id: index,
            depend_ids: Vec::new(),
        });
    }

    let manifest = PackageManifest::try_from(ManifestData {
        file_version: MANIFEST_FILE_VERSION.to_string(),
        enable_addressable: false,
        package_name: PACKAGE.to_string(),
        human_readable_version: version.to_string(),
        published_at: chrono::Utc::now(),
        published_by: "tests".to_string(),
        bundle_list,
        asset_list,
    })
    .unwrap();

    let bytes = manifest.to_bytes().unwrap();
    write_version(root, version, &bytes);
    manifest
}

/// Replaces the manifest of `version` with raw bytes, keeping the hash
/// file consistent with them.
pub fn write_version(root: &Path, version: &str, manifest_bytes: &[u8]) {
    let package_root = root.join(PACKAGE);
    std::fs::write(package_root.join(naming::manifest_file_name(PACKAGE, version)), manifest_bytes).unwrap();
    std::fs::write(
        package_root.join(naming::manifest_hash_file_name(PACKAGE, version)),
        sha256(manifest_bytes),
    )
    .unwrap();
    std::fs::write(package_root.join(naming::package_version_file_name(PACKAGE)), version).unwrap();
}

pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn host_params(base_url: &str, cache_root: &Path, buildin_root: PathBuf) -> InitializeParameters {
    let host = format!("{base_url}/{PACKAGE}");
    InitializeParameters {
        package_name: PACKAGE.to_string(),
        play_mode: PlayMode::Host {
            default_host: host.clone(),
            fallback_host: host,
        },
        cache_root: cache_root.to_path_buf(),
        buildin_root,
        retry_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

/// Ticks `runtime` until `done` holds. Panics after ten seconds.
pub async fn drive(runtime: &AssetRuntime, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "runtime did not finish in time");
        runtime.update();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Initializes, requests the latest version and installs its manifest.
pub async fn boot(runtime: &AssetRuntime) -> String {
    let init = runtime.initialize();
    drive(runtime, || init.is_done()).await;
    assert_eq!(init.status(), ferry_core::operation::OperationStatus::Succeed, "{}", init.error());

    let version = runtime.update_package_version();
    drive(runtime, || version.is_done()).await;
    assert_eq!(version.status(), ferry_core::operation::OperationStatus::Succeed, "{}", version.error());
    let package_version = version.borrow().package_version().to_string();

    let manifest = runtime.update_manifest(&package_version);
    drive(runtime, || manifest.is_done()).await;
    assert_eq!(manifest.status(), ferry_core::operation::OperationStatus::Succeed, "{}", manifest.error());
    package_version
}
