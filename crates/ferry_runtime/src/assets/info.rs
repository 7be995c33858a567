use ferry_core::manifest::PackageAsset;
use ferry_core::traits::ContentKind;

/// Caller-facing description of one asset of the active manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub asset_path: String,
    pub address: String,
    pub asset_tags: Vec<String>,
    /// `std::any::type_name` of the requested type, if any.
    pub asset_type: Option<&'static str>,
}

impl AssetInfo {
    pub fn new(asset: &PackageAsset, asset_type: Option<&'static str>) -> Self {
        Self {
            asset_path: asset.asset_path.clone(),
            address: asset.address.clone(),
            asset_tags: asset.asset_tags.clone(),
            asset_type,
        }
    }

    /// Key of the provider that serves this asset as `kind`.
    pub fn provider_guid(&self, kind: ContentKind) -> String {
        let asset_type = self.asset_type.unwrap_or("null");
        match kind {
            ContentKind::Asset => format!("{}[{asset_type}]", self.asset_path),
            ContentKind::SubAssets => format!("{}[{asset_type}]+sub", self.asset_path),
            ContentKind::Scene => format!("{}[scene]", self.asset_path),
        }
    }
}
