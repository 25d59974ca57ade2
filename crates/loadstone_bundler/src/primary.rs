//! Primary bundling: walks the asset contents in preorder and creates
//! bundles and bundle groups at the explicit split points, attaching every
//! asset to the bundles that own it.

use std::collections::HashMap;

use anyhow::anyhow;
use tracing::debug;
use tracing::instrument;

use loadstone_core::bundle_graph::{
  BundleGraph, BundleGraphNode, GraphVisitor, NodeId, TraversalActions,
};
use loadstone_core::types::FileType;

use crate::BundlingError;

/// Context carried down the traversal stack.
#[derive(Clone, Copy, Debug)]
pub struct BundleContext {
  /// The enclosing bundle group.
  bundle_group: NodeId,
  /// The dependency that opened the enclosing group.
  bundle_group_dependency: NodeId,
  /// The previously visited node; an asset whenever a dependency is being
  /// visited.
  parent_node: NodeId,
}

/// Creates bundle groups and bundles at split points: entries, async
/// imports, and isolated or inline assets. Type changes inside a group
/// produce additional bundles within the same group.
#[derive(Debug, Default)]
pub struct PrimaryBundler {
  /// Root assets recorded per bundle, in creation order. Attached together
  /// with their subgraphs once the traversal is done.
  bundle_roots: Vec<(NodeId, Vec<NodeId>)>,
  bundle_root_index: HashMap<NodeId, usize>,

  /// Bundles created per group, keyed by asset type.
  bundle_by_type: HashMap<NodeId, HashMap<FileType, NodeId>>,

  /// Per-asset memo of the bundles created while descending through the
  /// asset. A shared subtree is visited once, but the type-switch bundles
  /// it spawned must still reach every group arriving at it later.
  ///
  /// Lists are aliased between parent and child assets, so they live in an
  /// arena and are referred to by index.
  sibling_lists: Vec<Vec<NodeId>>,
  sibling_list_by_asset: HashMap<NodeId, usize>,
}

impl PrimaryBundler {
  pub fn new() -> Self {
    Self::default()
  }

  #[instrument(level = "debug", skip_all)]
  pub fn run(mut self, graph: &mut BundleGraph) -> anyhow::Result<()> {
    graph.traverse(&mut self)?;

    // Attach each bundle's roots together with their reachable subgraphs.
    for (bundle, roots) in &self.bundle_roots {
      for root in roots {
        graph.add_asset_graph_to_bundle(*root, *bundle);
      }
    }

    debug!(
      bundles = self.bundle_roots.len(),
      "created bundles at split points"
    );
    Ok(())
  }

  fn record_bundle_root(&mut self, bundle: NodeId, asset: NodeId) {
    match self.bundle_root_index.get(&bundle) {
      Some(&index) => {
        let roots = &mut self.bundle_roots[index].1;
        if !roots.contains(&asset) {
          roots.push(asset);
        }
      }
      None => {
        self.bundle_root_index.insert(bundle, self.bundle_roots.len());
        self.bundle_roots.push((bundle, vec![asset]));
      }
    }
  }

  fn new_sibling_list(&mut self) -> usize {
    self.sibling_lists.push(Vec::new());
    self.sibling_lists.len() - 1
  }

  /// The sibling list of an asset, created lazily for assets the traversal
  /// never explicitly seeded (e.g. children of a type-switch root).
  fn sibling_list_for(&mut self, asset: NodeId) -> usize {
    if let Some(&list) = self.sibling_list_by_asset.get(&asset) {
      return list;
    }
    let list = self.new_sibling_list();
    self.sibling_list_by_asset.insert(asset, list);
    list
  }

  fn visit_dependency(
    &mut self,
    graph: &mut BundleGraph,
    node: NodeId,
    context: Option<&BundleContext>,
  ) -> anyhow::Result<Option<BundleContext>> {
    let dependency = graph
      .get_dependency(node)
      .cloned()
      .ok_or_else(|| anyhow!("traversal delivered a non-dependency node"))?;

    let assets = graph.get_dependency_assets(node);
    if assets.is_empty() {
      return Ok(context.map(|context| BundleContext {
        parent_node: node,
        ..*context
      }));
    }

    let opens_group = dependency.is_entry
      || dependency.is_async()
      || assets.iter().any(|&asset| {
        graph
          .get_asset(asset)
          .is_some_and(|asset| asset.is_isolated() || asset.is_inline())
      });

    if opens_group {
      let target = dependency
        .target
        .as_deref()
        .cloned()
        .or_else(|| {
          context.and_then(|context| {
            graph
              .get_bundle_group(context.bundle_group)
              .map(|group| group.target.clone())
          })
        })
        .ok_or_else(|| BundlingError::MissingTarget {
          dependency_id: dependency.id(),
        })?;

      let group = graph.create_bundle_group(node, target.clone())?;
      let mut bundle_by_type = HashMap::new();

      for asset_node in assets {
        let asset = graph
          .get_asset(asset_node)
          .cloned()
          .ok_or_else(|| anyhow!("dependency resolved to a non-asset node"))?;

        let bundle = graph.create_bundle(
          asset_node,
          target.clone(),
          dependency.is_entry && !asset.is_isolated(),
          asset.is_inline(),
        )?;

        bundle_by_type.insert(asset.file_type.clone(), bundle);
        graph.add_bundle_to_bundle_group(bundle, group);
        self.record_bundle_root(bundle, asset_node);

        let list = self.new_sibling_list();
        self.sibling_list_by_asset.insert(asset_node, list);
      }

      self.bundle_by_type.insert(group, bundle_by_type);

      return Ok(Some(BundleContext {
        bundle_group: group,
        bundle_group_dependency: node,
        parent_node: node,
      }));
    }

    // Continuing inside the enclosing group.
    let context = context.ok_or_else(|| BundlingError::MissingContext {
      dependency_id: dependency.id(),
    })?;

    let parent_type = graph
      .get_asset(context.parent_node)
      .map(|asset| asset.file_type.clone())
      .ok_or_else(|| BundlingError::MissingContext {
        dependency_id: dependency.id(),
      })?;

    let all_same_type = assets.iter().all(|&asset| {
      graph
        .get_asset(asset)
        .is_some_and(|asset| asset.file_type == parent_type)
    });

    let parent_list = self.sibling_list_for(context.parent_node);

    for asset_node in assets {
      let asset = graph
        .get_asset(asset_node)
        .cloned()
        .ok_or_else(|| anyhow!("dependency resolved to a non-asset node"))?;

      if asset.file_type == parent_type {
        match self.sibling_list_by_asset.get(&asset_node) {
          Some(&list) if all_same_type => {
            // Revisited shared subtree: the bundles it spawned elsewhere
            // must load with this group as well.
            for bundle in self.sibling_lists[list].clone() {
              graph.add_bundle_to_bundle_group(bundle, context.bundle_group);
            }
          }
          None => {
            let list = if all_same_type {
              parent_list
            } else {
              self.new_sibling_list()
            };
            self.sibling_list_by_asset.insert(asset_node, list);
          }
          Some(_) => {}
        }
        continue;
      }

      // The asset switches type within the group.
      let existing = self
        .bundle_by_type
        .get(&context.bundle_group)
        .and_then(|bundles| bundles.get(&asset.file_type))
        .copied();

      if let Some(bundle) = existing {
        // A bundle of this type already exists in the group; this subgraph
        // becomes another root of it.
        self.record_bundle_root(bundle, asset_node);
        graph.create_asset_reference(node, asset_node);
      } else {
        let target = graph
          .get_bundle_group(context.bundle_group)
          .map(|group| group.target.clone())
          .ok_or_else(|| anyhow!("bundle group is missing from the graph"))?;
        let group_dependency_is_entry = graph
          .get_dependency(context.bundle_group_dependency)
          .is_some_and(|dependency| dependency.is_entry);

        let bundle = graph.create_bundle(
          asset_node,
          target,
          group_dependency_is_entry,
          asset.is_inline(),
        )?;

        self
          .bundle_by_type
          .entry(context.bundle_group)
          .or_default()
          .insert(asset.file_type.clone(), bundle);
        self.record_bundle_root(bundle, asset_node);
        self.sibling_lists[parent_list].push(bundle);
        graph.create_asset_reference(node, asset_node);
        graph.add_bundle_to_bundle_group(bundle, context.bundle_group);
      }
    }

    Ok(Some(BundleContext {
      parent_node: node,
      ..*context
    }))
  }
}

impl GraphVisitor for PrimaryBundler {
  type Context = BundleContext;

  fn enter(
    &mut self,
    graph: &mut BundleGraph,
    node: NodeId,
    context: Option<&BundleContext>,
    _actions: &mut TraversalActions,
  ) -> anyhow::Result<Option<BundleContext>> {
    if matches!(graph.get_node(node), Some(BundleGraphNode::Dependency(_))) {
      return self.visit_dependency(graph, node, context);
    }

    if matches!(graph.get_node(node), Some(BundleGraphNode::Asset(_))) {
      return Ok(context.map(|context| BundleContext {
        parent_node: node,
        ..*context
      }));
    }

    Ok(None)
  }
}
