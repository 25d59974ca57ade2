//! Bundling passes that convert a resolved asset graph into a bundle graph:
//! groups of bundles shipped to the client.
//!
//! Three passes run in a fixed pipeline, each mutating the shared
//! [`BundleGraph`] in place:
//!
//! 1. [`PrimaryBundler`] splits the asset graph into bundles at explicit
//!    split points (entries, async imports, isolated assets, type changes).
//! 2. [`OptimizingBundler`] rewrites the result: hoisting duplicated entry
//!    subgraphs, deduplicating assets already provided by ancestors,
//!    extracting shared bundles, internalizing resolvable async imports and
//!    pruning orphaned bundle groups.
//! 3. [`WrapMarker`] propagates the wrap flag from dependencies onto the
//!    assets packagers must wrap in a module closure.

use anyhow::Context;

use loadstone_core::bundle_graph::BundleGraph;

pub mod optimize;
pub mod primary;
pub mod wrap;

pub use optimize::OptimizingBundler;
pub use primary::PrimaryBundler;
pub use wrap::WrapMarker;

/// Number of bundles an asset must appear in before it becomes a shared
/// bundle candidate.
pub const MIN_BUNDLES: usize = 1;

/// Smallest total size worth the extra request of a shared bundle.
pub const MIN_BUNDLE_SIZE: u64 = 30_000;

/// Maximum number of bundles the runtime may fetch for one bundle group.
pub const MAX_PARALLEL_REQUESTS: usize = 5;

/// Limits applied by the optimizing pass.
#[derive(Clone, Copy, Debug)]
pub struct BundlerConfig {
  pub min_bundles: usize,
  pub min_bundle_size: u64,
  pub max_parallel_requests: usize,
}

impl Default for BundlerConfig {
  fn default() -> Self {
    Self {
      min_bundles: MIN_BUNDLES,
      min_bundle_size: MIN_BUNDLE_SIZE,
      max_parallel_requests: MAX_PARALLEL_REQUESTS,
    }
  }
}

/// Fatal conditions raised by the bundling passes. Everything else is soft:
/// the pass skips the work and moves on.
#[derive(Debug, thiserror::Error)]
pub enum BundlingError {
  /// An intra-group dependency was reached without an open bundle group,
  /// meaning the caller handed over a malformed asset graph.
  #[error("dependency {dependency_id} was visited without an enclosing bundle group")]
  MissingContext { dependency_id: String },

  /// A bundle group was opened by a dependency without a target and outside
  /// of any group whose target could be inherited.
  #[error("bundle group opened by dependency {dependency_id} has no target")]
  MissingTarget { dependency_id: String },

  /// An async dependency's external resolution was expected to be a bundle
  /// group, which the upstream contract guarantees.
  #[error("async dependency {dependency_id} does not resolve to a bundle group")]
  ExternalResolutionMismatch { dependency_id: String },
}

/// Bundler algorithms take a bundle graph seeded with asset graph contents
/// and assign its assets and dependencies to bundles.
pub trait Bundler {
  fn bundle(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()>;
}

/// The standard pipeline: primary bundling, optimization, wrap marking.
#[derive(Debug, Default)]
pub struct DefaultBundler {
  pub config: BundlerConfig,
}

impl DefaultBundler {
  pub fn new(config: BundlerConfig) -> Self {
    Self { config }
  }
}

impl Bundler for DefaultBundler {
  fn bundle(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()> {
    PrimaryBundler::new()
      .run(bundle_graph)
      .context("primary bundling")?;
    OptimizingBundler::new(self.config)
      .run(bundle_graph)
      .context("optimizing bundles")?;
    WrapMarker::new()
      .run(bundle_graph)
      .context("marking wrapped assets")?;
    Ok(())
  }
}
