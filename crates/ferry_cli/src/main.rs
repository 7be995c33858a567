use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ferry_core::manifest::PackageManifest;
use ferry_core::operation::{OperationStatus, OperationSystem};
use ferry_fs::{
    CacheLayout, CacheLedger, ClearAllCacheFilesOperation, ClearUnusedCacheFilesOperation,
    FindCacheFilesOperation, VerifierKind, VerifyCacheFilesOperation, VerifyLevel,
};
use ferry_runtime::{AssetRuntime, InitializeParameters, PlayMode};
use ferry_server::PackageServer;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

mod publish;

const TICK: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Publish, serve and update ferry content packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Package name
    #[arg(short, long, default_value = "DefaultPackage")]
    package: String,

    /// Local cache root
    #[arg(long, env = "FERRY_CACHE", default_value = "./ferry_cache")]
    cache: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a directory as a new package version
    Publish {
        /// The directory containing assets (e.g., "./assets")
        #[arg(long)]
        dir: PathBuf,

        /// Output directory, served as the package root
        #[arg(long)]
        out: PathBuf,

        /// The version string (e.g., "0.1.0" or git sha)
        #[arg(long)]
        version: String,

        /// Address assets by file stem
        #[arg(long)]
        addressable: bool,
    },
    /// Serve published packages over HTTP
    Serve {
        /// Directory holding the published packages
        #[arg(long, default_value = ".")]
        root: PathBuf,

        #[arg(long, default_value = "127.0.0.1:8088")]
        addr: String,
    },
    /// Bring the local cache up to date with the latest package version
    Update {
        /// Package root on the host, e.g. http://127.0.0.1:8088/DefaultPackage
        #[arg(short, long, env = "FERRY_URL")]
        url: String,

        /// Fallback package root, defaults to the main one
        #[arg(long)]
        fallback: Option<String>,

        /// Only download bundles with one of these tags (comma separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(long, default_value_t = 10)]
        max_downloads: usize,

        #[arg(long, default_value_t = 3)]
        retry: usize,
    },
    /// Verify every cached file and drop the corrupt ones
    Verify {
        #[arg(long)]
        strict: bool,
    },
    /// Delete cached files
    Clear {
        /// Keep files the given manifest still references
        #[arg(long)]
        unused: Option<PathBuf>,
    },
    /// Print a summary of a manifest file
    Inspect { manifest: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Publish {
            dir,
            out,
            version,
            addressable,
        } => {
            println!("🚀 Publishing version '{version}' from {dir:?}...");
            let options = publish::PublishOptions {
                package_name: &cli.package,
                version: &version,
                addressable,
            };
            let manifest = publish::publish(&dir, &out.join(&cli.package), &options)?;
            println!(
                "✅ Successfully published version {version} with {} bundles.",
                manifest.bundle_list.len()
            );
        }
        Commands::Serve { root, addr } => {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            println!("🌐 Serving {root:?} on http://{}", listener.local_addr()?);
            axum::serve(listener, PackageServer::new(root).build()).await?;
        }
        Commands::Update {
            url,
            fallback,
            tags,
            max_downloads,
            retry,
        } => {
            let params = InitializeParameters {
                package_name: cli.package.clone(),
                play_mode: PlayMode::Host {
                    fallback_host: fallback.unwrap_or_else(|| url.clone()),
                    default_host: url,
                },
                cache_root: cli.cache,
                download_failed_try_again: retry,
                ..Default::default()
            };
            update(params, &tags, max_downloads, retry).await?;
        }
        Commands::Verify { strict } => {
            let level = if strict { VerifyLevel::Strict } else { VerifyLevel::High };
            let layout = CacheLayout::new(&cli.cache, &cli.package);
            let ledger = CacheLedger::shared();
            let system = OperationSystem::default();

            let (succeed, failed) = scan_and_verify(&system, &layout, &ledger, level).await?;
            println!("✅ Verified {succeed} files, removed {failed} corrupt files.");
        }
        Commands::Clear { unused } => {
            let layout = CacheLayout::new(&cli.cache, &cli.package);
            let ledger = CacheLedger::shared();
            let system = OperationSystem::default();

            match unused {
                Some(manifest_path) => {
                    let manifest = read_manifest(&manifest_path)?;
                    scan_and_verify(&system, &layout, &ledger, VerifyLevel::Low).await?;
                    let clear = system.start_operation(
                        &cli.package,
                        ClearUnusedCacheFilesOperation::new(ledger.clone(), Rc::new(manifest)),
                    );
                    drive(&system, || clear.is_done()).await;
                    println!("🧹 Cleared {} unused files.", clear.borrow().cleared_count());
                }
                None => {
                    let clear = system.start_operation(
                        &cli.package,
                        ClearAllCacheFilesOperation::new(layout.clone(), ledger.clone()),
                    );
                    drive(&system, || clear.is_done()).await;
                    if clear.status() == OperationStatus::Failed {
                        bail!("Failed to clear cache: {}", clear.error());
                    }
                    println!("🧹 Cleared cache of {}.", cli.package);
                }
            }
        }
        Commands::Inspect { manifest } => {
            let manifest = read_manifest(&manifest)?;
            let total: u64 = manifest.bundle_list.iter().map(|bundle| bundle.file_size).sum();
            println!("📦 {} {}", manifest.package_name, manifest.human_readable_version);
            println!(
                "Published {} by {}",
                manifest.published_at, manifest.published_by
            );
            println!(
                "{} bundles, {} assets, {total} bytes",
                manifest.bundle_list.len(),
                manifest.asset_list.len()
            );
            for bundle in &manifest.bundle_list {
                println!(
                    "  {} {} {} [{}]",
                    bundle.file_hash,
                    bundle.file_size,
                    bundle.bundle_name,
                    bundle.tags.join(",")
                );
            }
        }
    }

    Ok(())
}

fn read_manifest(path: &PathBuf) -> anyhow::Result<PackageManifest> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;
    Ok(PackageManifest::from_bytes(&bytes)?)
}

async fn drive(system: &OperationSystem, done: impl Fn() -> bool) {
    while !done() {
        system.update();
        tokio::time::sleep(TICK).await;
    }
}

async fn scan_and_verify(
    system: &OperationSystem,
    layout: &CacheLayout,
    ledger: &ferry_fs::SharedLedger,
    level: VerifyLevel,
) -> anyhow::Result<(usize, usize)> {
    let package = layout.package_name().to_string();
    let find = system.start_operation(&package, FindCacheFilesOperation::new(layout.clone(), ledger.clone()));
    drive(system, || find.is_done()).await;

    let elements = find.borrow_mut().take_elements();
    let verifier = VerifierKind::detect().create(level, &Handle::current());
    let verify = system.start_operation(
        &package,
        VerifyCacheFilesOperation::new(ledger.clone(), verifier, elements),
    );
    drive(system, || verify.is_done()).await;
    if verify.status() == OperationStatus::Failed {
        bail!("Verification failed: {}", verify.error());
    }
    let verify = verify.borrow();
    Ok((verify.succeed_count(), verify.failed_count()))
}

async fn update(
    params: InitializeParameters,
    tags: &[String],
    max_downloads: usize,
    retry: usize,
) -> anyhow::Result<()> {
    let runtime = AssetRuntime::builder(params).build()?;

    let init = runtime.initialize();
    drive_runtime(&runtime, || init.is_done()).await;
    if init.status() == OperationStatus::Failed {
        bail!("Initialization failed: {}", init.error());
    }

    let version = runtime.update_package_version();
    drive_runtime(&runtime, || version.is_done()).await;
    if version.status() == OperationStatus::Failed {
        bail!("Failed to request package version: {}", version.error());
    }
    let package_version = version.borrow().package_version().to_string();
    println!("🔍 Latest package version: {package_version}");

    let manifest = runtime.update_manifest(&package_version);
    drive_runtime(&runtime, || manifest.is_done()).await;
    if manifest.status() == OperationStatus::Failed {
        bail!("Failed to update manifest: {}", manifest.error());
    }

    let downloader = if tags.is_empty() {
        runtime.create_patch_downloader(max_downloads, retry)?
    } else {
        runtime.create_patch_downloader_by_tags(tags, max_downloads, retry)?
    };
    {
        let mut operation = downloader.borrow_mut();
        println!(
            "⬇️  {} files, {} bytes to download",
            operation.total_download_count(),
            operation.total_download_bytes()
        );
        operation.set_on_download_progress(|progress| {
            println!(
                "  {}/{} files, {}/{} bytes",
                progress.current_download_count,
                progress.total_download_count,
                progress.current_download_bytes,
                progress.total_download_bytes
            );
        });
        operation.set_on_download_file_failed(|bundle_name, error| {
            eprintln!("❌ {bundle_name}: {error}");
        });
    }
    runtime.begin_download(&downloader);
    drive_runtime(&runtime, || downloader.is_done()).await;
    if downloader.status() == OperationStatus::Failed {
        bail!("Download failed: {}", downloader.error());
    }

    println!("✅ Package is up to date at version {package_version}.");
    Ok(())
}

async fn drive_runtime(runtime: &AssetRuntime, done: impl Fn() -> bool) {
    while !done() {
        runtime.update();
        tokio::time::sleep(TICK).await;
    }
}
