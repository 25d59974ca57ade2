use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

use super::source::SourceLocation;

pub type EnvironmentRef = Arc<Environment>;

/// The environment the built code will run in
///
/// This decides which bundles can share a runtime scope: code running in a
/// worker or worklet cannot reach modules loaded by the page that spawned
/// it, so such environments are treated as isolated by the bundler.
#[derive(Clone, Debug, Default, Deserialize, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
  /// The context the output should run in
  pub context: EnvironmentContext,

  /// Determines what type of module to output
  pub output_format: OutputFormat,

  pub source_type: SourceType,

  /// Determines whether the output should be optimised
  pub should_optimize: bool,

  pub loc: Option<SourceLocation>,
}

impl Environment {
  pub fn id(&self) -> String {
    let mut hasher = IdentifierHasher::new();
    self.context.hash(&mut hasher);
    self.output_format.hash(&mut hasher);
    self.source_type.hash(&mut hasher);
    self.should_optimize.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
  }

  /// Whether code in this environment runs in its own scope, unable to
  /// share modules with bundles loaded by an ancestor.
  pub fn is_isolated(&self) -> bool {
    self.context.is_worker() || self.context.is_worklet()
  }
}

impl Hash for Environment {
  fn hash<H: Hasher>(&self, state: &mut H) {
    // Hashing intentionally does not include loc
    self.context.hash(state);
    self.output_format.hash(state);
    self.source_type.hash(state);
    self.should_optimize.hash(state);
  }
}

impl PartialEq for Environment {
  fn eq(&self, other: &Self) -> bool {
    // Equality intentionally does not include loc
    self.context == other.context
      && self.output_format == other.output_format
      && self.source_type == other.source_type
      && self.should_optimize == other.should_optimize
  }
}

/// The context the output should run in
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
  #[default]
  Browser,
  Node,
  ServiceWorker,
  WebWorker,
  Worklet,
}

impl EnvironmentContext {
  pub fn is_node(&self) -> bool {
    matches!(self, EnvironmentContext::Node)
  }

  pub fn is_browser(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, Browser | WebWorker | ServiceWorker | Worklet)
  }

  pub fn is_worker(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, WebWorker | ServiceWorker)
  }

  pub fn is_worklet(&self) -> bool {
    matches!(self, EnvironmentContext::Worklet)
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
  #[default]
  Global,
  #[serde(rename = "commonjs")]
  CommonJS,
  #[serde(rename = "esmodule")]
  EsModule,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SourceType {
  #[default]
  #[serde(rename = "module")]
  Module,
  #[serde(rename = "script")]
  Script,
}
