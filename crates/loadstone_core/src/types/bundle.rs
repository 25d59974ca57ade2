use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use crate::hash::hash_string;

use super::asset::AssetId;
use super::environment::Environment;
use super::file_type::FileType;
use super::target::Target;

/// Controls the placement of an asset relative to the bundle that would
/// otherwise contain it.
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum BundleBehavior {
  /// Embedded into the parent bundle instead of being emitted separately
  Inline = 0,
  /// Placed in its own bundle group, never sharing a bundle with ancestors
  Isolated = 1,
}

pub type MaybeBundleBehavior = Option<BundleBehavior>;

pub fn create_bundle_id(entry_or_unique_key: &str, target: &Target) -> String {
  hash_string(&format!(
    "bundle:{}:{}",
    entry_or_unique_key,
    target.dist_dir.to_string_lossy()
  ))
}

/// An output unit holding assets of a single type, rooted at a main entry
///
/// Bundles are created by the bundling passes and never destroyed, though
/// optimization may leave them empty or unreachable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
  pub id: String,

  /// Short client-facing id, assigned when the bundle enters the graph
  #[serde(skip_serializing_if = "Option::is_none")]
  pub public_id: Option<String>,

  #[serde(rename = "type")]
  pub file_type: FileType,

  pub env: Arc<Environment>,

  pub target: Target,

  /// The asset this bundle was created for. Generated bundles, identified
  /// by a `unique_key` instead, have none.
  pub main_entry_id: Option<AssetId>,

  /// Whether the bundle was created for an entry dependency
  pub is_entry: bool,

  /// Whether the bundle is embedded into its parent rather than emitted
  pub is_inline: bool,

  /// Whether the optimizer may move assets out of this bundle
  pub is_splittable: bool,

  /// Stable identity for bundles not rooted at an asset
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unique_key: Option<String>,
}

/// A set of bundles that the runtime loads together to satisfy one load
/// point, e.g. all bundles required by one async import.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleGroup {
  pub target: Target,
  pub entry_asset_id: AssetId,
}

impl BundleGroup {
  /// Content key of the group node. Two dependencies resolving to the same
  /// asset under the same target share a group.
  pub fn id(&self) -> String {
    format!("bundle_group:{}:{}", self.target.name, self.entry_asset_id)
  }
}
