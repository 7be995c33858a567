//! File names shared by publishers, the content server and the runtime.

/// The small "static version" file holding the latest package version.
pub fn package_version_file_name(package_name: &str) -> String {
    format!("{package_name}_version.txt")
}

/// Hex SHA-256 of the manifest file, used for cheap staleness checks.
pub fn manifest_hash_file_name(package_name: &str, package_version: &str) -> String {
    format!("{package_name}_{package_version}.hash")
}

pub fn manifest_file_name(package_name: &str, package_version: &str) -> String {
    format!("{package_name}_{package_version}.json")
}

/// Joins a host root and a file name with exactly one slash.
pub fn remote_url(host: &str, file_name: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), file_name.trim_start_matches('/'))
}
