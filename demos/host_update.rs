//! Publishes a tiny package to a temp directory, serves it and brings a
//! fresh cache up to date, then loads one asset out of it.
//!
//! ```sh
//! RUST_LOG=info cargo run --example host_update --features full
//! ```

use anyhow::{Context, bail};
use ferry::manifest::{MANIFEST_FILE_VERSION, ManifestData, PackageAsset, PackageBundle, PackageManifest};
use ferry::naming;
use ferry::operation::OperationStatus;
use ferry::prelude::*;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;

const PACKAGE: &str = "DefaultPackage";
const VERSION: &str = "2024-06-01";

fn publish(root: &Path) -> anyhow::Result<()> {
    let files: [(&str, &[u8], &str); 3] = [
        ("config/game.json", br#"{"difficulty":"normal"}"#, "config"),
        ("levels/one.txt", b"#####\n#...#\n#####\n", "levels"),
        ("levels/two.txt", b"#######\n#.....#\n#######\n", "levels"),
    ];
    std::fs::create_dir_all(root)?;

    let mut bundle_list = Vec::new();
    let mut asset_list = Vec::new();
    for (index, (path, bytes, tag)) in files.iter().enumerate() {
        let bundle = PackageBundle::new(
            format!("{}.bundle", path.replace('/', "_")),
            hex::encode(Sha256::digest(bytes)),
            crc32fast::hash(bytes),
            bytes.len() as u64,
            vec![tag.to_string()],
        )
        .with_flags(true, false);
        std::fs::write(root.join(bundle.file_name()), bytes)?;
        bundle_list.push(bundle);
        asset_list.push(PackageAsset {
            address: String::new(),
            asset_path: path.to_string(),
            asset_tags: vec![tag.to_string()],
            bundle_id: index,
            depend_ids: Vec::new(),
        });
    }

    let manifest = PackageManifest::try_from(ManifestData {
        file_version: MANIFEST_FILE_VERSION.to_string(),
        enable_addressable: false,
        package_name: PACKAGE.to_string(),
        human_readable_version: VERSION.to_string(),
        published_at: chrono::Utc::now(),
        published_by: "demo".to_string(),
        bundle_list,
        asset_list,
    })?;
    let bytes = manifest.to_bytes()?;
    std::fs::write(root.join(naming::manifest_file_name(PACKAGE, VERSION)), &bytes)?;
    std::fs::write(
        root.join(naming::manifest_hash_file_name(PACKAGE, VERSION)),
        hex::encode(Sha256::digest(&bytes)),
    )?;
    std::fs::write(root.join(naming::package_version_file_name(PACKAGE)), VERSION)?;
    Ok(())
}

async fn tick_until(runtime: &AssetRuntime, done: impl Fn() -> bool) {
    while !done() {
        runtime.update();
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let server_root = tempfile::tempdir()?;
    let cache_root = tempfile::tempdir()?;
    publish(&server_root.path().join(PACKAGE))?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let host = format!("http://{}/{PACKAGE}", listener.local_addr()?);
    let router = PackageServer::new(server_root.path()).build();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let runtime = AssetRuntime::builder(InitializeParameters {
        package_name: PACKAGE.to_string(),
        play_mode: PlayMode::Host {
            default_host: host.clone(),
            fallback_host: host,
        },
        cache_root: cache_root.path().to_path_buf(),
        buildin_root: cache_root.path().join("buildin"),
        ..Default::default()
    })
    .build()?;

    let init = runtime.initialize();
    tick_until(&runtime, || init.is_done()).await;

    let version = runtime.update_package_version();
    tick_until(&runtime, || version.is_done()).await;
    if version.status() == OperationStatus::Failed {
        bail!("{}", version.error());
    }
    let package_version = version.borrow().package_version().to_string();

    let manifest = runtime.update_manifest(&package_version);
    tick_until(&runtime, || manifest.is_done()).await;
    if manifest.status() == OperationStatus::Failed {
        bail!("{}", manifest.error());
    }

    let downloader = runtime.create_patch_downloader_by_tags(&["levels"], 4, 3)?;
    println!(
        "Downloading {} files, {} bytes",
        downloader.borrow().total_download_count(),
        downloader.borrow().total_download_bytes()
    );
    runtime.begin_download(&downloader);
    tick_until(&runtime, || downloader.is_done()).await;
    if downloader.status() == OperationStatus::Failed {
        bail!("{}", downloader.error());
    }

    let level = runtime.load_asset_sync::<Vec<u8>>("levels/one.txt")?;
    let bytes = level.asset::<Vec<u8>>().context("level one is not loaded")?;
    println!("levels/one.txt:\n{}", String::from_utf8_lossy(&bytes));
    level.release()?;

    // Not part of the patch above, so it still lives on the host only.
    println!(
        "config needs download: {}",
        runtime.is_need_download_from_remote("config/game.json")?
    );
    Ok(())
}
