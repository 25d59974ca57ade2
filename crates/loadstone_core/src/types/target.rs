use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use super::EnvironmentRef;
use super::environment::Environment;
use super::source::SourceLocation;

/// A target represents how and where a set of bundles is emitted
///
/// Bundles inherit the target of the bundle group they belong to, which in
/// turn comes from the entry dependency that opened the group.
#[derive(PartialEq, Clone, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
  /// The output folder for compiled bundles
  pub dist_dir: PathBuf,

  /// The output filename of the entry
  pub dist_entry: Option<PathBuf>,

  /// The environment the code will run in
  pub env: EnvironmentRef,

  /// The location that declared the target, e.g. a package.json field
  pub loc: Option<SourceLocation>,

  /// The name of the target
  pub name: String,

  /// The URL bundles will be loaded with at runtime
  pub public_url: String,
}

impl Default for Target {
  fn default() -> Self {
    Self {
      dist_dir: PathBuf::from("dist"),
      dist_entry: None,
      env: Arc::new(Environment::default()),
      loc: None,
      name: String::from("default"),
      public_url: String::from("/"),
    }
  }
}
