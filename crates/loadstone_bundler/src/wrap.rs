//! Wrap-flag propagation: a fix-point pass marking the assets that must be
//! wrapped in a module closure at packaging time.
//!
//! Within each bundle the dependency subgraph is walked from the bundle
//! roots, carrying a flag that turns on at any dependency bearing
//! `shouldWrap` and stays on for everything below it.

use std::collections::HashMap;

use tracing::debug;
use tracing::instrument;

use loadstone_core::bundle_graph::{BundleGraph, NodeId};

#[derive(Debug, Default)]
pub struct WrapMarker;

impl WrapMarker {
  pub fn new() -> Self {
    Self
  }

  #[instrument(level = "debug", skip_all)]
  pub fn run(&self, graph: &mut BundleGraph) -> anyhow::Result<()> {
    let bundles = graph.bundles_postorder();
    for bundle in &bundles {
      self.mark_bundle(graph, *bundle);
    }
    debug!(bundles = bundles.len(), "propagated wrap flags");
    Ok(())
  }

  fn mark_bundle(&self, graph: &mut BundleGraph, bundle: NodeId) {
    // A node visited without the flag may be reached again with it; the
    // reverse never needs a revisit.
    let mut visited: HashMap<NodeId, bool> = HashMap::new();
    for root in graph.get_bundle_roots(bundle) {
      self.mark_asset(graph, bundle, root, false, &mut visited);
    }
  }

  fn mark_asset(
    &self,
    graph: &mut BundleGraph,
    bundle: NodeId,
    asset: NodeId,
    should_wrap: bool,
    visited: &mut HashMap<NodeId, bool>,
  ) {
    if !record_visit(visited, asset, should_wrap) {
      return;
    }

    for dependency in graph.get_asset_dependencies(asset) {
      if graph.bundle_has_dependency(bundle, dependency) {
        self.mark_dependency(graph, bundle, dependency, should_wrap, visited);
      }
    }
  }

  fn mark_dependency(
    &self,
    graph: &mut BundleGraph,
    bundle: NodeId,
    dependency: NodeId,
    inherited: bool,
    visited: &mut HashMap<NodeId, bool>,
  ) {
    let should_wrap = inherited
      || graph
        .get_dependency(dependency)
        .is_some_and(|dependency| dependency.should_wrap());

    if !record_visit(visited, dependency, should_wrap) {
      return;
    }

    if should_wrap {
      if let Some(resolved) = graph.get_dependency_resolution(dependency) {
        graph.set_asset_should_wrap(resolved);
      }
    }

    for child in graph.get_dependency_assets(dependency) {
      if graph.bundle_has_asset(bundle, child) {
        self.mark_asset(graph, bundle, child, should_wrap, visited);
      }
    }
  }
}

/// Returns whether the node still needs visiting with this flag value.
fn record_visit(visited: &mut HashMap<NodeId, bool>, node: NodeId, should_wrap: bool) -> bool {
  match visited.get(&node) {
    Some(true) => false,
    Some(false) if !should_wrap => false,
    _ => {
      visited.insert(node, should_wrap);
      true
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Arc;

  use loadstone_core::asset_graph::AssetGraph;
  use loadstone_core::types::{
    Asset, Dependency, DependencyBuilder, Environment, JSONObject, META_SHOULD_WRAP, Priority,
    Target,
  };

  use crate::PrimaryBundler;

  use super::*;

  fn environment() -> Arc<Environment> {
    Arc::new(Environment::default())
  }

  fn asset(path: &str, size: u32) -> Arc<Asset> {
    Arc::new(Asset::new(environment(), PathBuf::from(path), size))
  }

  fn dependency(source: &Asset, specifier: &str, should_wrap: bool) -> Dependency {
    let mut builder = DependencyBuilder::default()
      .env(environment())
      .specifier(specifier.to_string())
      .source_asset_id(source.id.clone())
      .priority(Priority::Sync);

    if should_wrap {
      let mut meta = JSONObject::new();
      meta.insert(META_SHOULD_WRAP.into(), serde_json::Value::Bool(true));
      builder = builder.meta(meta);
    }

    builder.build()
  }

  /// a -> b (shouldWrap) -> c, plus an unaffected d.
  #[test]
  fn wrap_flags_propagate_down_the_subtree() {
    let mut asset_graph = AssetGraph::new();

    let entry_dep =
      asset_graph.add_entry_dependency(Dependency::entry("a.js".to_string(), Target::default()));
    let a = asset("a.js", 100);
    let a_node = asset_graph.add_asset(a.clone());
    asset_graph.add_edge(&entry_dep, &a_node);

    let b = asset("b.js", 50);
    let b_node = asset_graph.add_asset(b.clone());
    let wrap_dep = asset_graph.add_dependency(dependency(&a, "./b", true));
    asset_graph.add_edge(&a_node, &wrap_dep);
    asset_graph.add_edge(&wrap_dep, &b_node);

    let c = asset("c.js", 25);
    let c_node = asset_graph.add_asset(c.clone());
    let plain_dep = asset_graph.add_dependency(dependency(&b, "./c", false));
    asset_graph.add_edge(&b_node, &plain_dep);
    asset_graph.add_edge(&plain_dep, &c_node);

    let d = asset("d.js", 25);
    let d_node = asset_graph.add_asset(d.clone());
    let d_dep = asset_graph.add_dependency(dependency(&a, "./d", false));
    asset_graph.add_edge(&a_node, &d_dep);
    asset_graph.add_edge(&d_dep, &d_node);

    let mut graph = BundleGraph::from_asset_graph(&asset_graph);
    PrimaryBundler::new().run(&mut graph).unwrap();
    WrapMarker::new().run(&mut graph).unwrap();

    let lookup = |id: &str| {
      graph
        .get_asset(*graph.get_node_id_by_content_key(id).unwrap())
        .unwrap()
    };

    assert!(!lookup(&a.id).should_wrap());
    assert!(lookup(&b.id).should_wrap());
    assert!(lookup(&c.id).should_wrap());
    assert!(!lookup(&d.id).should_wrap());
  }
}
