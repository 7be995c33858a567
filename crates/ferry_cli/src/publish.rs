use anyhow::Context;
use chrono::Utc;
use ferry_core::manifest::{MANIFEST_FILE_VERSION, ManifestData, PackageAsset, PackageBundle, PackageManifest};
use ferry_core::naming;
use ferry_fs::atomic_write;
use ferry_fs::integrity::{bytes_sha256, digest_file};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub struct PublishOptions<'a> {
    pub package_name: &'a str,
    pub version: &'a str,
    pub addressable: bool,
}

/// Publishes every file below `dir` as its own raw bundle into `out`.
///
/// The first directory level becomes the bundle tag. Writes the content
/// files, the manifest, its hash file and the version file.
pub fn publish(dir: &Path, out: &Path, options: &PublishOptions) -> anyhow::Result<PackageManifest> {
    fs::create_dir_all(out)?;

    let mut bundle_list = Vec::new();
    let mut asset_list = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let relative_path = path
            .strip_prefix(dir)?
            .to_string_lossy()
            .replace('\\', "/");
        debug!("Processing: {relative_path}");

        let (crc, hash) = digest_file(path, true)?;
        let hash = hash.context("missing file hash")?;
        let size = entry.metadata()?.len();
        let tags = match relative_path.split_once('/') {
            Some((tag, _)) => vec![tag.to_string()],
            None => Vec::new(),
        };

        let bundle = PackageBundle::new(
            format!("{}.bundle", relative_path.replace('/', "_")),
            hash,
            crc,
            size,
            tags.clone(),
        )
        .with_flags(true, false);
        fs::copy(path, out.join(bundle.file_name()))?;

        let address = if options.addressable {
            Path::new(&relative_path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };
        asset_list.push(PackageAsset {
            address,
            asset_path: relative_path,
            asset_tags: tags,
            bundle_id: bundle_list.len(),
            depend_ids: Vec::new(),
        });
        bundle_list.push(bundle);
    }

    let manifest = PackageManifest::try_from(ManifestData {
        file_version: MANIFEST_FILE_VERSION.to_string(),
        enable_addressable: options.addressable,
        package_name: options.package_name.to_string(),
        human_readable_version: options.version.to_string(),
        published_at: Utc::now(),
        published_by: whoami::username()?,
        bundle_list,
        asset_list,
    })?;

    let bytes = manifest.to_bytes()?;
    atomic_write(
        &out.join(naming::manifest_file_name(options.package_name, options.version)),
        &bytes,
    )?;
    atomic_write(
        &out.join(naming::manifest_hash_file_name(options.package_name, options.version)),
        bytes_sha256(&bytes).as_bytes(),
    )?;
    atomic_write(
        &out.join(naming::package_version_file_name(options.package_name)),
        options.version.as_bytes(),
    )?;
    Ok(manifest)
}
