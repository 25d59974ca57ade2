use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::hash::IdentifierHasher;

use super::bundle::BundleBehavior;
use super::bundle::MaybeBundleBehavior;
use super::environment::Environment;
use super::file_type::FileType;
use super::json::JSONObject;
use super::json::META_SHOULD_WRAP;

pub type AssetId = String;

#[derive(Debug)]
pub struct CreateAssetIdParams<'a> {
  pub environment_id: &'a str,
  pub file_path: &'a str,
  pub file_type: &'a FileType,
  pub unique_key: Option<&'a str>,
}

pub fn create_asset_id(params: CreateAssetIdParams) -> String {
  let CreateAssetIdParams {
    environment_id,
    file_path,
    file_type,
    unique_key,
  } = params;

  let mut hasher = IdentifierHasher::default();

  environment_id.hash(&mut hasher);
  file_path.hash(&mut hasher);
  file_type.hash(&mut hasher);
  unique_key.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

/// An asset is a file or part of a file that may represent any data type
/// including source code, binary data, etc.
///
/// Assets are produced upstream by resolution and transformation; the
/// bundler treats them as read-only apart from the `meta` bag.
#[derive(Default, PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
  /// The main identity hash for the asset. It is consistent for the entire
  /// build and between builds.
  pub id: AssetId,

  /// Controls which bundle the asset is placed into
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the asset
  pub env: Arc<Environment>,

  /// The file path to the asset
  pub file_path: PathBuf,

  /// The file type of the asset, which may change during transformation
  #[serde(rename = "type")]
  pub file_type: FileType,

  /// Plugin specific metadata for the asset
  pub meta: JSONObject,

  /// Statistics about the asset
  pub stats: AssetStats,

  /// Whether this asset can be omitted if none of its exports are being used
  pub side_effects: bool,

  /// Indicates if the asset is used as a bundle entry
  ///
  /// This controls whether a bundle can be split into multiple, or whether
  /// all of the dependencies must be placed in a single bundle.
  pub is_bundle_splittable: bool,

  /// A unique key that identifies an asset when a transformer returns
  /// several assets for one file
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unique_key: Option<String>,
}

impl Asset {
  pub fn new(env: Arc<Environment>, file_path: PathBuf, size: u32) -> Self {
    let file_type =
      FileType::from_extension(file_path.extension().and_then(|s| s.to_str()).unwrap_or(""));

    let id = create_asset_id(CreateAssetIdParams {
      environment_id: &env.id(),
      file_path: &file_path.to_string_lossy(),
      file_type: &file_type,
      unique_key: None,
    });

    Self {
      env,
      file_path,
      file_type,
      id,
      is_bundle_splittable: true,
      side_effects: true,
      stats: AssetStats { size, time: 0 },
      ..Asset::default()
    }
  }

  /// Must not share a bundle with assets loaded by an ancestor.
  pub fn is_isolated(&self) -> bool {
    self.bundle_behavior == Some(BundleBehavior::Isolated)
  }

  /// Embedded directly into its parent bundle rather than emitted on its own.
  pub fn is_inline(&self) -> bool {
    self.bundle_behavior == Some(BundleBehavior::Inline)
  }

  pub fn should_wrap(&self) -> bool {
    matches!(self.meta.get(META_SHOULD_WRAP), Some(Value::Bool(true)))
  }

  pub fn set_should_wrap(&mut self) {
    self.meta.insert(META_SHOULD_WRAP.into(), Value::Bool(true));
  }
}

/// Statistics that pertain to an asset
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct AssetStats {
  pub size: u32,
  pub time: u32,
}
