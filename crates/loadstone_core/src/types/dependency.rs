use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use derive_builder::Builder;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use crate::hash::IdentifierHasher;

use super::asset::AssetId;
use super::bundle::MaybeBundleBehavior;
use super::environment::Environment;
use super::json::JSONObject;
use super::json::META_SHOULD_WRAP;
use super::source::SourceLocation;
use super::target::Target;

pub fn create_dependency_id(
  source_asset_id: Option<&AssetId>,
  specifier: &str,
  environment_id: &str,
  target: Option<&Target>,
  bundle_behavior: &MaybeBundleBehavior,
  priority: &Priority,
) -> String {
  let mut hasher = IdentifierHasher::new();

  source_asset_id.hash(&mut hasher);
  specifier.hash(&mut hasher);
  environment_id.hash(&mut hasher);
  target.hash(&mut hasher);
  bundle_behavior.hash(&mut hasher);
  priority.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

/// A dependency denotes a connection between two assets
#[derive(PartialEq, Clone, Debug, Default, Builder)]
#[builder(build_fn(skip), pattern = "owned", setter(strip_option))]
// Dependencies should not be created directly, so we can ensure that an ID
// exists. DependencyBuilder::build() should be used instead.
#[non_exhaustive]
pub struct Dependency {
  #[builder(setter(skip))]
  pub id: String,

  /// Controls the behavior of the bundle the resolved asset is placed into
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the dependency
  pub env: Arc<Environment>,

  /// The location within the source file where the dependency was found
  pub loc: Option<SourceLocation>,

  /// Plugin-specific metadata for the dependency
  pub meta: JSONObject,

  /// Determines when the dependency should be loaded
  pub priority: Priority,

  /// The id of the asset with this dependency
  pub source_asset_id: Option<AssetId>,

  /// The file path of the asset with this dependency
  pub source_path: Option<PathBuf>,

  /// The import or export specifier that connects two assets together
  pub specifier: String,

  /// The target associated with an entry, if any
  pub target: Option<Box<Target>>,

  /// Whether the dependency is an entry
  pub is_entry: bool,

  /// Whether the dependency is optional
  ///
  /// If an optional dependency cannot be resolved, it will not fail the build.
  pub is_optional: bool,

  /// Indicates that the name should be stable over time, even when the
  /// content of the bundle changes
  pub needs_stable_name: bool,
}

impl DependencyBuilder {
  pub fn build(self) -> Dependency {
    // These properties are required to generate an ID
    let specifier = self.specifier.expect("specifier is required");
    let env = self.env.expect("env is required");
    let priority = self.priority.unwrap_or_default();

    // These are part of ID generation, but can be optional
    let source_asset_id = self.source_asset_id.flatten();
    let target = self.target.flatten();
    let bundle_behavior = self.bundle_behavior.flatten();

    let id = create_dependency_id(
      source_asset_id.as_ref(),
      &specifier,
      &env.id(),
      target.as_deref(),
      &bundle_behavior,
      &priority,
    );

    Dependency {
      id,

      specifier,
      env,
      priority,
      bundle_behavior,
      source_asset_id,
      target,

      loc: self.loc.flatten(),
      meta: self.meta.unwrap_or_default(),
      source_path: self.source_path.flatten(),
      is_entry: self.is_entry.unwrap_or_default(),
      is_optional: self.is_optional.unwrap_or_default(),
      needs_stable_name: self.needs_stable_name.unwrap_or_default(),
    }
  }
}

impl Dependency {
  pub fn id(&self) -> String {
    self.id.clone()
  }

  pub fn entry(entry: String, target: Target) -> Dependency {
    DependencyBuilder::default()
      .env(target.env.clone())
      .is_entry(true)
      .needs_stable_name(true)
      .specifier(entry)
      .target(Box::new(target))
      .priority(Priority::default())
      .build()
  }

  /// Whether this is a dynamic import, loaded through its own bundle group
  /// at runtime.
  pub fn is_async(&self) -> bool {
    self.priority == Priority::Lazy
  }

  pub fn should_wrap(&self) -> bool {
    matches!(self.meta.get(META_SHOULD_WRAP), Some(Value::Bool(true)))
  }
}

/// Determines when a dependency should load
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u32)]
#[derive(Default)]
pub enum Priority {
  /// Resolves the dependency synchronously, placing the resolved asset in
  /// the same bundle as the parent or another bundle already on the page
  #[default]
  Sync = 0,
  /// Places the dependency in a separate bundle loaded in parallel with the
  /// current bundle
  Parallel = 1,
  /// The dependency should be placed in a separate bundle that is loaded later
  Lazy = 2,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_produces_stable_ids() {
    let make = || {
      DependencyBuilder::default()
        .env(Arc::new(Environment::default()))
        .specifier("./util".to_string())
        .source_asset_id("aaaabbbbccccdddd".to_string())
        .priority(Priority::Sync)
        .build()
    };

    assert_eq!(make().id, make().id);

    let lazy = DependencyBuilder::default()
      .env(Arc::new(Environment::default()))
      .specifier("./util".to_string())
      .source_asset_id("aaaabbbbccccdddd".to_string())
      .priority(Priority::Lazy)
      .build();
    assert_ne!(make().id, lazy.id);
    assert!(lazy.is_async());
  }

  #[test]
  fn entry_dependencies_carry_their_target() {
    let dependency = Dependency::entry("src/index.js".to_string(), Target::default());

    assert!(dependency.is_entry);
    assert!(dependency.needs_stable_name);
    assert!(!dependency.is_async());
    assert_eq!(
      dependency.target.as_ref().map(|t| t.name.as_str()),
      Some("default")
    );
  }

  #[test]
  fn wrap_flag_is_read_from_meta() {
    let mut meta = JSONObject::new();
    meta.insert(META_SHOULD_WRAP.into(), Value::Bool(true));

    let dependency = DependencyBuilder::default()
      .env(Arc::new(Environment::default()))
      .specifier("./wrapped".to_string())
      .meta(meta)
      .build();

    assert!(dependency.should_wrap());
  }
}
