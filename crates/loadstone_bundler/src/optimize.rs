//! Optimization: five sequential rewrites over the bundle graph produced by
//! primary bundling. Every step materializes its working set before it
//! mutates, and skips work whose preconditions no longer hold rather than
//! failing; the pass improves a graph, it does not validate one.

use std::collections::HashMap;

use tracing::debug;
use tracing::instrument;

use loadstone_core::bundle_graph::{BundleGraph, BundleGraphNode, ExternalResolution, NodeId};
use loadstone_core::hash::fingerprint_string;

use crate::BundlerConfig;
use crate::BundlingError;

/// Assets appearing in the same set of bundles, accumulated into one
/// shared-bundle candidate keyed by that set.
#[derive(Debug, Default)]
struct SharedBundleCandidate {
  assets: Vec<NodeId>,
  source_bundles: Vec<NodeId>,
  size: u64,
}

#[derive(Debug, Default)]
pub struct OptimizingBundler {
  config: BundlerConfig,
}

impl OptimizingBundler {
  pub fn new(config: BundlerConfig) -> Self {
    Self { config }
  }

  #[instrument(level = "debug", skip_all)]
  pub fn run(&self, graph: &mut BundleGraph) -> anyhow::Result<()> {
    self.hoist_single_origin_bundles(graph);
    self.deduplicate_ancestors(graph);
    self.extract_shared_bundles(graph);
    let async_groups = self.internalize_async_dependencies(graph)?;
    self.remove_orphaned_bundle_groups(graph, async_groups);
    Ok(())
  }

  /// Step 1: when a bundle's main entry is duplicated inside another
  /// bundle, prefer loading the bundle (and its siblings) alongside that
  /// other bundle's groups over carrying the duplicate, request budget
  /// permitting.
  fn hoist_single_origin_bundles(&self, graph: &mut BundleGraph) {
    for bundle_node in graph.bundles() {
      let Some(bundle) = graph.get_bundle(bundle_node) else {
        continue;
      };
      if bundle.is_inline || !bundle.is_splittable {
        continue;
      }
      let Some(main_entry) = graph.get_main_entry(bundle_node) else {
        continue;
      };

      let candidates: Vec<NodeId> = graph
        .find_bundles_with_asset(main_entry)
        .into_iter()
        .filter(|&candidate| candidate != bundle_node)
        .filter(|&candidate| {
          graph.get_bundle(candidate).is_some_and(|candidate| {
            !candidate.is_entry && !candidate.is_inline && candidate.is_splittable
          })
        })
        .collect();

      let siblings: Vec<NodeId> = graph
        .get_sibling_bundles(bundle_node)
        .into_iter()
        .filter(|&sibling| {
          graph
            .get_bundle(sibling)
            .is_some_and(|sibling| !sibling.is_inline && sibling.is_splittable)
        })
        .collect();

      for candidate in candidates {
        let groups = graph.get_bundle_groups_containing_bundle(candidate);
        let within_budget = groups.iter().all(|&group| {
          graph.get_bundles_in_bundle_group(group).len() < self.config.max_parallel_requests
        });
        if !within_budget {
          continue;
        }

        graph.remove_asset_graph_from_bundle(main_entry, candidate);
        for group in groups {
          graph.add_bundle_to_bundle_group(bundle_node, group);
          for &sibling in &siblings {
            graph.add_bundle_to_bundle_group(sibling, group);
          }
        }
      }
    }
  }

  /// Step 2: drop assets that every load path already provides, deepest
  /// bundles first.
  fn deduplicate_ancestors(&self, graph: &mut BundleGraph) {
    for bundle in graph.bundles_postorder() {
      self.deduplicate(graph, bundle);
    }
  }

  fn deduplicate(&self, graph: &mut BundleGraph, bundle: NodeId) {
    let Some(value) = graph.get_bundle(bundle) else {
      return;
    };
    // An isolated environment cannot reach the ancestor's runtime scope, so
    // it keeps its duplicates.
    if !value.is_splittable || value.env.is_isolated() {
      return;
    }

    for dependency in graph.get_dependencies_in_bundle(bundle) {
      for asset in graph.get_dependency_assets(dependency) {
        if graph.bundle_has_asset(bundle, asset)
          && graph.is_asset_in_ancestor_bundles(bundle, asset)
        {
          graph.remove_asset_graph_from_bundle(asset, bundle);
        }
      }
    }
  }

  /// Step 3: pull assets duplicated across several bundles into shared
  /// bundles attached to all of the affected groups, largest savings first.
  fn extract_shared_bundles(&self, graph: &mut BundleGraph) {
    let candidates = self.collect_shared_bundle_candidates(graph);
    let mut created = 0usize;

    for candidate in candidates {
      let mut groups: Vec<NodeId> = Vec::new();
      for &bundle in &candidate.source_bundles {
        for group in graph.get_bundle_groups_containing_bundle(bundle) {
          if !groups.contains(&group) {
            groups.push(group);
          }
        }
      }

      // Budget check against the pre-move counts; the attach below may land
      // a group exactly at the limit.
      if groups.iter().any(|&group| {
        graph.get_bundles_in_bundle_group(group).len() >= self.config.max_parallel_requests
      }) {
        continue;
      }

      let Some(&first) = candidate.source_bundles.first() else {
        continue;
      };
      let Some(first_bundle) = graph.get_bundle(first).cloned() else {
        continue;
      };

      let mut source_ids: Vec<String> = candidate
        .source_bundles
        .iter()
        .filter_map(|&bundle| graph.get_bundle(bundle).map(|bundle| bundle.id.clone()))
        .collect();
      source_ids.sort_unstable();
      let unique_key = fingerprint_string(&source_ids.join(":"));

      let shared = graph.create_shared_bundle(
        unique_key,
        first_bundle.file_type.clone(),
        first_bundle.env.clone(),
        first_bundle.target.clone(),
      );

      for &asset in &candidate.assets {
        graph.add_asset_graph_to_bundle(asset, shared);
        for &bundle in &candidate.source_bundles {
          graph.remove_asset_graph_from_bundle(asset, bundle);
        }
      }

      for &group in &groups {
        graph.add_bundle_to_bundle_group(shared, group);
      }

      self.deduplicate(graph, shared);
      created += 1;
    }

    debug!(shared_bundles = created, "extracted shared bundles");
  }

  fn collect_shared_bundle_candidates(&self, graph: &BundleGraph) -> Vec<SharedBundleCandidate> {
    let mut candidates: HashMap<String, SharedBundleCandidate> = HashMap::new();

    graph.traverse_contents(&mut |node, payload, actions| {
      if !matches!(payload, BundleGraphNode::Asset(_)) {
        return;
      }

      let containing: Vec<NodeId> = graph
        .find_bundles_with_asset(node)
        .into_iter()
        .filter(|&bundle| {
          graph.get_main_entry(bundle) != Some(node)
            && graph
              .get_bundle(bundle)
              .is_some_and(|bundle| bundle.is_splittable)
        })
        .collect();

      if containing.len() <= self.config.min_bundles {
        return;
      }

      let mut ids: Vec<&str> = containing
        .iter()
        .filter_map(|&bundle| graph.get_bundle(bundle).map(|bundle| bundle.id.as_str()))
        .collect();
      ids.sort_unstable();
      let key = ids.join(":");

      let candidate = candidates.entry(key).or_default();
      candidate.size += graph.get_total_size(node);
      candidate.assets.push(node);
      for bundle in containing {
        if !candidate.source_bundles.contains(&bundle) {
          candidate.source_bundles.push(bundle);
        }
      }

      // Shared subsets of this asset's children would be subsumed by this
      // candidate anyway.
      actions.skip_children();
    });

    let mut sorted: Vec<(String, SharedBundleCandidate)> = candidates
      .into_iter()
      .filter(|(_, candidate)| candidate.size >= self.config.min_bundle_size)
      .collect();
    // Largest first maximizes bytes saved before request budgets run out;
    // ties break on the key for a deterministic order.
    sorted.sort_by(|(key_a, a), (key_b, b)| b.size.cmp(&a.size).then_with(|| key_a.cmp(key_b)));

    sorted.into_iter().map(|(_, candidate)| candidate).collect()
  }

  /// Step 4: async dependencies whose resolution is already loaded wherever
  /// the dependency appears resolve locally, without loading their group.
  fn internalize_async_dependencies(&self, graph: &mut BundleGraph) -> anyhow::Result<Vec<NodeId>> {
    let mut async_groups: Vec<NodeId> = Vec::new();

    for dependency in collect_async_dependencies(graph) {
      let Some(resolution) = graph.get_dependency_resolution(dependency) else {
        continue;
      };

      match graph.resolve_external_dependency(dependency) {
        Some(ExternalResolution::BundleGroup(group)) => {
          if !async_groups.contains(&group) {
            async_groups.push(group);
          }
        }
        _ => {
          let dependency_id = graph
            .get_dependency(dependency)
            .map(|dependency| dependency.id())
            .unwrap_or_default();
          return Err(BundlingError::ExternalResolutionMismatch { dependency_id }.into());
        }
      }

      for bundle in graph.find_bundles_with_dependency(dependency) {
        if graph.bundle_has_asset(bundle, resolution)
          || graph.is_asset_in_ancestor_bundles(bundle, resolution)
        {
          graph.internalize_async_dependency(bundle, dependency);
        }
      }
    }

    Ok(async_groups)
  }

  /// Step 5: drop async bundle groups that no bundle loads anymore.
  fn remove_orphaned_bundle_groups(&self, graph: &mut BundleGraph, groups: Vec<NodeId>) {
    for group in groups {
      if graph.get_parent_bundles_of_bundle_group(group).is_empty() {
        graph.remove_bundle_group(group);
      }
    }
  }
}

fn collect_async_dependencies(graph: &BundleGraph) -> Vec<NodeId> {
  let mut dependencies = Vec::new();
  graph.traverse_contents(&mut |node, payload, _| {
    if let BundleGraphNode::Dependency(dependency) = payload {
      if dependency.is_async() && !dependency.is_entry {
        dependencies.push(node);
      }
    }
  });
  dependencies
}
